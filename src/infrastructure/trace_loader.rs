use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::program::{CallSiteId, ProcedureId};
use crate::error::{Error, Result};
use crate::ports::{DynamicEdgeSource, ProgramModel};

/// One observed call in a dynamic trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEdge {
    pub caller: String,
    pub call_index: u32,
    pub callee: String,
}

/// Dynamic call graph recorded as a JSON array of [`TraceEdge`].
pub struct TraceFileSource {
    path: PathBuf,
}

impl TraceFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DynamicEdgeSource for TraceFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load_edges(&self, program: &dyn ProgramModel) -> Result<Vec<(CallSiteId, ProcedureId)>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no dynamic trace recorded");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| Error::Read {
            path: self.path.clone(),
            source,
        })?;
        let raw: Vec<TraceEdge> = serde_json::from_str(&content).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut edges = Vec::with_capacity(raw.len());
        for edge in raw {
            let (Some(caller), Some(callee)) = (
                program.procedure_by_name(&edge.caller),
                program.procedure_by_name(&edge.callee),
            ) else {
                warn!(caller = %edge.caller, callee = %edge.callee, "trace edge names unknown procedure");
                continue;
            };
            let call = CallSiteId::new(caller, edge.call_index);
            if !program.contains_call(call) {
                warn!(caller = %edge.caller, index = edge.call_index, "trace edge names unknown call site");
                continue;
            }
            edges.push((call, callee));
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::program::CallTarget;
    use crate::infrastructure::InMemoryProgram;
    use tempfile::tempdir;

    fn program() -> (InMemoryProgram, ProcedureId, ProcedureId) {
        let mut program = InMemoryProgram::default();
        let main = program.add_procedure("main", None);
        let target = program.add_procedure("target", None);
        program.add_call(main, CallTarget::Indirect, vec![]);
        (program, main, target)
    }

    #[test]
    fn test_missing_trace_is_empty() {
        let dir = tempdir().unwrap();
        let (program, _, _) = program();
        let source = TraceFileSource::new(dir.path().join("absent.json"));
        assert!(source.load_edges(&program).unwrap().is_empty());
    }

    #[test]
    fn test_trace_edges_resolved_by_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.json");
        fs::write(
            &path,
            r#"[
                {"caller": "main", "call_index": 0, "callee": "target"},
                {"caller": "main", "call_index": 9, "callee": "target"},
                {"caller": "ghost", "call_index": 0, "callee": "target"}
            ]"#,
        )
        .unwrap();

        let (program, main, target) = program();
        let edges = TraceFileSource::new(&path).load_edges(&program).unwrap();
        assert_eq!(edges, vec![(CallSiteId::new(main, 0), target)]);
    }

    #[test]
    fn test_malformed_trace_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.json");
        fs::write(&path, "not json").unwrap();

        let (program, _, _) = program();
        let result = TraceFileSource::new(&path).load_edges(&program);
        assert!(matches!(result, Err(Error::Json { .. })));
    }
}
