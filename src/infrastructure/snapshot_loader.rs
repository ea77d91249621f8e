use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::domain::program::{CallSiteId, CallTarget, Initializer, ProcedureId, Value};
use crate::error::{Error, Result};
use crate::infrastructure::memory_model::{InMemoryProgram, InMemorySandboxes};
use crate::ports::{ProgramModel, SandboxModel};

/// On-disk description of a program and its sandbox partitioning.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramSnapshot {
    pub procedures: Vec<RawProcedure>,
    #[serde(default)]
    pub globals: BTreeMap<String, RawInitializer>,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
    #[serde(default)]
    pub sandboxes: Vec<RawSandbox>,
    /// Defaults to every procedure outside all sandboxes.
    #[serde(default)]
    pub privileged: Option<Vec<String>>,
    /// Defaults to `main` when the program has one.
    #[serde(default)]
    pub privileged_entry_points: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RawProcedure {
    pub name: String,
    #[serde(default)]
    pub arity: Option<usize>,
    #[serde(default)]
    pub calls: Vec<RawCall>,
}

#[derive(Debug, Deserialize)]
pub struct RawCall {
    pub target: RawTarget,
    #[serde(default)]
    pub args: Vec<RawValue>,
    /// Sandbox whose sandboxed block physically contains this call.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTarget {
    Direct(String),
    Indirect,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawValue {
    Global(String),
    Function(String),
    Cast(Box<RawValue>),
    Int(i64),
    Opaque,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawInitializer {
    Cstring(String),
    Function(String),
    Other,
}

#[derive(Debug, Deserialize)]
pub struct RawAnnotation {
    pub procedure: String,
    pub call_index: u32,
    pub targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawSandbox {
    pub name: String,
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub procedures: Vec<String>,
}

pub struct SnapshotLoader;

impl SnapshotLoader {
    /// Load a program snapshot from a JSON file.
    pub fn load_file(path: &Path) -> Result<(InMemoryProgram, InMemorySandboxes)> {
        let content = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: ProgramSnapshot =
            serde_json::from_str(&content).map_err(|source| Error::Json {
                path: path.to_path_buf(),
                source,
            })?;
        let models = Self::build(snapshot)?;
        info!(
            path = %path.display(),
            procedures = models.0.procedures().len(),
            "loaded program snapshot"
        );
        Ok(models)
    }

    /// Resolve names in a parsed snapshot into in-memory models.
    ///
    /// Callees and function references that are never defined are declared
    /// as external procedures with no body. Names used by annotations,
    /// sandboxes, and the privileged lists must already be defined.
    pub fn build(snapshot: ProgramSnapshot) -> Result<(InMemoryProgram, InMemorySandboxes)> {
        let mut program = InMemoryProgram::default();

        let mut seen = HashSet::new();
        for raw in &snapshot.procedures {
            if !seen.insert(raw.name.as_str()) {
                return Err(Error::DuplicateProcedure(raw.name.clone()));
            }
            program.add_procedure(&raw.name, raw.arity);
        }

        for (name, raw) in &snapshot.globals {
            let initializer = match raw {
                RawInitializer::Cstring(text) => Initializer::CString(text.clone()),
                RawInitializer::Function(target) => {
                    Initializer::Function(program.add_procedure(target, None))
                }
                RawInitializer::Other => Initializer::Other,
            };
            program.add_global(name, initializer);
        }

        let mut regions: Vec<(String, CallSiteId)> = Vec::new();
        for raw in &snapshot.procedures {
            let caller = lookup(&program, &raw.name)?;
            for call in &raw.calls {
                let target = match &call.target {
                    RawTarget::Direct(name) => CallTarget::Direct(program.add_procedure(name, None)),
                    RawTarget::Indirect => CallTarget::Indirect,
                };
                let args = call.args.iter().map(|v| convert_value(&mut program, v)).collect();
                let id = program.add_call(caller, target, args);
                if let Some(sandbox) = &call.region {
                    regions.push((sandbox.clone(), id));
                }
            }
        }

        for annotation in &snapshot.annotations {
            let caller = lookup(&program, &annotation.procedure)?;
            let call = CallSiteId::new(caller, annotation.call_index);
            if !program.contains_call(call) {
                return Err(Error::UnknownCallSite {
                    procedure: annotation.procedure.clone(),
                    index: annotation.call_index,
                });
            }
            let targets = lookup_all(&program, &annotation.targets)?;
            program.annotate(call, targets);
        }

        let mut sandboxes = InMemorySandboxes::default();
        let mut sandboxed: HashSet<ProcedureId> = HashSet::new();
        for raw in &snapshot.sandboxes {
            let procedures = lookup_all(&program, &raw.procedures)?;
            let entry_points = lookup_all(&program, &raw.entry_points)?;
            sandboxed.extend(procedures.iter().copied());
            sandboxes.add_sandbox(&program, &raw.name, &procedures, &entry_points);
        }
        for (name, call) in regions {
            let sandbox = sandboxes
                .sandbox_by_name(&name)
                .ok_or(Error::UnknownSandbox(name))?;
            sandboxes.add_region_call(sandbox, call);
        }

        let privileged = match &snapshot.privileged {
            Some(names) => lookup_all(&program, names)?,
            None => program
                .procedures()
                .into_iter()
                .filter(|p| !sandboxed.contains(p))
                .collect(),
        };
        sandboxes.set_privileged(privileged);

        let entry_points = match &snapshot.privileged_entry_points {
            Some(names) => lookup_all(&program, names)?,
            None => program.procedure_by_name("main").into_iter().collect(),
        };
        sandboxes.set_privileged_entry_points(entry_points);

        Ok((program, sandboxes))
    }
}

fn lookup(program: &InMemoryProgram, name: &str) -> Result<ProcedureId> {
    program
        .procedure_by_name(name)
        .ok_or_else(|| Error::UnknownProcedure(name.to_string()))
}

fn lookup_all(program: &InMemoryProgram, names: &[String]) -> Result<Vec<ProcedureId>> {
    names.iter().map(|name| lookup(program, name)).collect()
}

fn convert_value(program: &mut InMemoryProgram, raw: &RawValue) -> Value {
    match raw {
        RawValue::Global(name) => Value::Global(name.clone()),
        RawValue::Function(name) => Value::Function(program.add_procedure(name, None)),
        RawValue::Cast(inner) => Value::Cast(Box::new(convert_value(program, inner))),
        RawValue::Int(n) => Value::Int(*n),
        RawValue::Opaque => Value::Opaque,
    }
}
