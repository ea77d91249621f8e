//! Program Representation
//!
//! Handles and operand shapes shared by every program model backend.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ports::ProgramModel;

/// Opaque handle to a procedure in a program model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcedureId(pub u32);

/// A call instruction, identified by its containing procedure and its
/// position among that procedure's call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallSiteId {
    pub caller: ProcedureId,
    pub index: u32,
}

impl CallSiteId {
    pub fn new(caller: ProcedureId, index: u32) -> Self {
        Self { caller, index }
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}#{}", self.caller.0, self.index)
    }
}

/// What a call site invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Statically known callee.
    Direct(ProcedureId),
    /// Runtime-computed callee (function pointer, vtable slot, ...).
    Indirect,
}

/// An operand value as seen at a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Reference to a named global variable.
    Global(String),
    /// Function pointer.
    Function(ProcedureId),
    /// Pointer cast wrapping another value.
    Cast(Box<Value>),
    Int(i64),
    /// Anything computed at runtime.
    Opaque,
}

impl Value {
    /// Peel off pointer-cast wrappers.
    pub fn strip_pointer_casts(&self) -> &Value {
        let mut value = self;
        while let Value::Cast(inner) = value {
            value = inner;
        }
        value
    }
}

/// Initializer of a global variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initializer {
    /// Constant character array.
    CString(String),
    Function(ProcedureId),
    Other,
}

/// A constant extracted from a call-site operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantOperand {
    Str(String),
    Procedure(ProcedureId),
}

impl ConstantOperand {
    /// Inspect `value` as a compile-time constant.
    ///
    /// Globals are dereferenced to their initializer: a character array gives
    /// a string (cut at the first NUL), a function initializer gives a
    /// procedure. Bare function pointers give a procedure. Everything else
    /// yields `None`.
    pub fn extract(program: &dyn ProgramModel, value: &Value) -> Option<Self> {
        match program.strip_pointer_casts(value) {
            Value::Function(id) => Some(ConstantOperand::Procedure(*id)),
            Value::Global(name) => match program.global_initializer(name)? {
                Initializer::CString(raw) => {
                    let text = raw.split('\0').next().unwrap_or_default();
                    Some(ConstantOperand::Str(text.to_string()))
                }
                Initializer::Function(id) => Some(ConstantOperand::Procedure(*id)),
                Initializer::Other => None,
            },
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            ConstantOperand::Str(s) => Some(s),
            ConstantOperand::Procedure(_) => None,
        }
    }
}

/// String constant passed as argument `index` of `call`.
pub fn string_argument(program: &dyn ProgramModel, call: CallSiteId, index: usize) -> Option<String> {
    let value = program.arguments(call).get(index)?;
    ConstantOperand::extract(program, value)?.into_string()
}

/// Function pointer passed as argument `index` of `call`.
///
/// Only a direct function reference counts here; a global holding a
/// function pointer is not a handler argument.
pub fn procedure_argument(
    program: &dyn ProgramModel,
    call: CallSiteId,
    index: usize,
) -> Option<ProcedureId> {
    let value = program.arguments(call).get(index)?;
    match program.strip_pointer_casts(value) {
        Value::Function(id) => Some(*id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryProgram;

    #[test]
    fn test_strip_pointer_casts() {
        let v = Value::Cast(Box::new(Value::Cast(Box::new(Value::Int(7)))));
        assert_eq!(v.strip_pointer_casts(), &Value::Int(7));
        assert_eq!(Value::Opaque.strip_pointer_casts(), &Value::Opaque);
    }

    #[test]
    fn test_extract_string_through_cast() {
        let mut program = InMemoryProgram::default();
        program.add_global(".str", Initializer::CString("worker\0".to_string()));
        let value = Value::Cast(Box::new(Value::Global(".str".to_string())));

        let extracted = ConstantOperand::extract(&program, &value);
        assert_eq!(extracted, Some(ConstantOperand::Str("worker".to_string())));
    }

    #[test]
    fn test_extract_rejects_non_constants() {
        let mut program = InMemoryProgram::default();
        program.add_global("counter", Initializer::Other);

        assert_eq!(ConstantOperand::extract(&program, &Value::Opaque), None);
        assert_eq!(
            ConstantOperand::extract(&program, &Value::Global("counter".to_string())),
            None
        );
        assert_eq!(
            ConstantOperand::extract(&program, &Value::Global("missing".to_string())),
            None
        );
    }

    #[test]
    fn test_procedure_argument() {
        let mut program = InMemoryProgram::default();
        let main = program.add_procedure("main", Some(0));
        let handler = program.add_procedure("on_ping", Some(1));
        let call = program.add_call(
            main,
            CallTarget::Indirect,
            vec![Value::Opaque, Value::Cast(Box::new(Value::Function(handler)))],
        );

        assert_eq!(procedure_argument(&program, call, 1), Some(handler));
        assert_eq!(procedure_argument(&program, call, 0), None);
        assert_eq!(procedure_argument(&program, call, 5), None);
    }
}
