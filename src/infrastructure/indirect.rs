use std::collections::BTreeSet;

use crate::domain::program::{CallSiteId, ProcedureId};
use crate::ports::{IndirectCallResolver, ProgramModel};

/// Fallback for indirect calls nothing else could resolve: any procedure
/// whose address is taken and whose arity fits the argument count.
///
/// Calling a function with extra arguments is generally harmless, so only
/// procedures declaring *more* parameters than supplied are excluded.
#[derive(Debug, Default)]
pub struct AddressTakenResolver;

impl IndirectCallResolver for AddressTakenResolver {
    fn resolve(
        &self,
        program: &dyn ProgramModel,
        call: CallSiteId,
        merged: &BTreeSet<ProcedureId>,
    ) -> BTreeSet<ProcedureId> {
        if !merged.is_empty() {
            return merged.clone();
        }
        let nargs = program.arguments(call).len();
        program
            .address_taken()
            .into_iter()
            .filter(|p| program.arity(*p).map_or(true, |arity| arity <= nargs))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::program::{CallTarget, Value};
    use crate::infrastructure::InMemoryProgram;

    #[test]
    fn test_fallback_only_for_empty_sets() {
        let mut program = InMemoryProgram::default();
        let main = program.add_procedure("main", Some(0));
        let one = program.add_procedure("one_arg", Some(1));
        let three = program.add_procedure("three_args", Some(3));
        let unknown = program.add_procedure("unknown_arity", None);
        program.add_call(
            main,
            CallTarget::Direct(main),
            vec![Value::Function(one), Value::Function(three), Value::Function(unknown)],
        );
        let fp = program.add_call(main, CallTarget::Indirect, vec![Value::Opaque, Value::Opaque]);

        let resolver = AddressTakenResolver;
        let resolved = resolver.resolve(&program, fp, &BTreeSet::new());
        assert_eq!(resolved, BTreeSet::from([one, unknown]));

        let known = BTreeSet::from([three]);
        assert_eq!(resolver.resolve(&program, fp, &known), known);
    }
}
