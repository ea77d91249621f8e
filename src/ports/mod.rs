use std::collections::BTreeSet;
use std::path::Path;

use crate::domain::callgraph::CallGraphResolver;
use crate::domain::context::{Context, SandboxId, PRIVILEGED_CONTEXT_NAME};
use crate::domain::program::{CallSiteId, CallTarget, Initializer, ProcedureId, Value};
use crate::domain::rpc::RpcGraph;
use crate::error::{Error, Result};

pub mod rpc_dot_exporter;
pub mod rpc_report;

/// Read-only view of a compiled program.
pub trait ProgramModel {
    fn procedures(&self) -> Vec<ProcedureId>;
    fn procedure_name(&self, id: ProcedureId) -> &str;
    fn procedure_by_name(&self, name: &str) -> Option<ProcedureId>;
    /// Declared parameter count, when the front end knows it.
    fn arity(&self, id: ProcedureId) -> Option<usize>;
    fn call_count(&self, id: ProcedureId) -> usize;
    fn call_target(&self, call: CallSiteId) -> CallTarget;
    fn arguments(&self, call: CallSiteId) -> &[Value];
    fn global_initializer(&self, name: &str) -> Option<&Initializer>;
    /// Procedures whose address escapes into an operand or a global.
    fn address_taken(&self) -> BTreeSet<ProcedureId>;

    /// Programmer-declared targets of indirect call sites.
    fn annotated_targets(&self) -> Vec<(CallSiteId, Vec<ProcedureId>)> {
        Vec::new()
    }

    fn call_sites(&self, id: ProcedureId) -> Vec<CallSiteId> {
        (0..self.call_count(id) as u32)
            .map(|index| CallSiteId::new(id, index))
            .collect()
    }

    fn contains_call(&self, call: CallSiteId) -> bool {
        (call.index as usize) < self.call_count(call.caller)
    }

    fn strip_pointer_casts<'v>(&self, value: &'v Value) -> &'v Value {
        value.strip_pointer_casts()
    }

    /// `name#index` label used in logs and traces.
    fn describe_call(&self, call: CallSiteId) -> String {
        format!("{}#{}", self.procedure_name(call.caller), call.index)
    }
}

/// Partitioning of a program into sandboxes and the privileged context.
pub trait SandboxModel {
    fn sandboxes(&self) -> Vec<SandboxId>;
    fn sandbox_name(&self, id: SandboxId) -> &str;
    fn sandbox_calls(&self, id: SandboxId) -> &[CallSiteId];
    fn entry_points(&self, id: SandboxId) -> &[ProcedureId];
    fn privileged_procedures(&self) -> Vec<ProcedureId>;
    fn privileged_entry_points(&self) -> Vec<ProcedureId>;
    /// True when the call physically sits inside a sandboxed block.
    fn in_sandboxed_region(&self, call: CallSiteId) -> bool;

    fn is_entry_point(&self, id: SandboxId, procedure: ProcedureId) -> bool {
        self.entry_points(id).contains(&procedure)
    }

    fn sandbox_by_name(&self, name: &str) -> Option<SandboxId> {
        self.sandboxes()
            .into_iter()
            .find(|id| self.sandbox_name(*id) == name)
    }

    /// Call sites of `procedure` that run privileged, skipping sandboxed
    /// sub-regions.
    fn privileged_call_sites(
        &self,
        program: &dyn ProgramModel,
        procedure: ProcedureId,
    ) -> Vec<CallSiteId> {
        program
            .call_sites(procedure)
            .into_iter()
            .filter(|call| !self.in_sandboxed_region(*call))
            .collect()
    }

    fn context_name(&self, context: Context) -> &str {
        match context {
            Context::Privileged => PRIVILEGED_CONTEXT_NAME,
            Context::Sandboxed(id) => self.sandbox_name(id),
        }
    }

    fn context_entry_points(&self, context: Context) -> Vec<ProcedureId> {
        match context {
            Context::Privileged => self.privileged_entry_points(),
            Context::Sandboxed(id) => self.entry_points(id).to_vec(),
        }
    }

    /// Every call site executing in `context`.
    fn context_call_sites(
        &self,
        program: &dyn ProgramModel,
        context: Context,
    ) -> BTreeSet<CallSiteId> {
        match context {
            Context::Privileged => self
                .privileged_procedures()
                .into_iter()
                .flat_map(|procedure| self.privileged_call_sites(program, procedure))
                .collect(),
            Context::Sandboxed(id) => self.sandbox_calls(id).iter().copied().collect(),
        }
    }
}

/// Recorded (call site, observed callee) pairs from dynamic tracing.
pub trait DynamicEdgeSource {
    fn describe(&self) -> String;
    fn load_edges(&self, program: &dyn ProgramModel) -> Result<Vec<(CallSiteId, ProcedureId)>>;
}

/// Strategy refining the merged target set of an indirect call.
pub trait IndirectCallResolver {
    fn resolve(
        &self,
        program: &dyn ProgramModel,
        call: CallSiteId,
        merged: &BTreeSet<ProcedureId>,
    ) -> BTreeSet<ProcedureId>;
}

/// Renders a finished RPC graph into a file format.
pub trait RpcGraphExporter {
    fn render(
        &self,
        graph: &RpcGraph,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        resolver: &mut CallGraphResolver,
    ) -> Result<String>;

    /// Render and overwrite `path`.
    fn export(
        &self,
        graph: &RpcGraph,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        resolver: &mut CallGraphResolver,
        path: &Path,
    ) -> Result<()> {
        let content = self.render(graph, program, sandboxes, resolver)?;
        std::fs::write(path, content).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
