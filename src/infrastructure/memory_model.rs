use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::context::SandboxId;
use crate::domain::program::{CallSiteId, CallTarget, Initializer, ProcedureId, Value};
use crate::ports::{ProgramModel, SandboxModel};

// ============================================================================
// InMemoryProgram - program model held entirely in memory
// ============================================================================

#[derive(Debug, Clone)]
struct ProcedureData {
    name: String,
    arity: Option<usize>,
    calls: Vec<CallData>,
}

#[derive(Debug, Clone)]
struct CallData {
    target: CallTarget,
    args: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProgram {
    procedures: Vec<ProcedureData>,
    by_name: HashMap<String, ProcedureId>,
    globals: HashMap<String, Initializer>,
    annotations: BTreeMap<CallSiteId, Vec<ProcedureId>>,
}

impl InMemoryProgram {
    /// Declare a procedure, or return the existing one with that name.
    pub fn add_procedure(&mut self, name: &str, arity: Option<usize>) -> ProcedureId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = ProcedureId(self.procedures.len() as u32);
        self.procedures.push(ProcedureData {
            name: name.to_string(),
            arity,
            calls: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Append a call site to `caller`.
    pub fn add_call(&mut self, caller: ProcedureId, target: CallTarget, args: Vec<Value>) -> CallSiteId {
        let data = &mut self.procedures[caller.0 as usize];
        let index = data.calls.len() as u32;
        data.calls.push(CallData { target, args });
        CallSiteId::new(caller, index)
    }

    pub fn add_global(&mut self, name: &str, initializer: Initializer) {
        self.globals.insert(name.to_string(), initializer);
    }

    /// Declare the possible targets of an indirect call site.
    pub fn annotate(&mut self, call: CallSiteId, targets: Vec<ProcedureId>) {
        self.annotations.entry(call).or_default().extend(targets);
    }

    fn call(&self, call: CallSiteId) -> Option<&CallData> {
        self.procedures
            .get(call.caller.0 as usize)?
            .calls
            .get(call.index as usize)
    }
}

impl ProgramModel for InMemoryProgram {
    fn procedures(&self) -> Vec<ProcedureId> {
        (0..self.procedures.len() as u32).map(ProcedureId).collect()
    }

    fn procedure_name(&self, id: ProcedureId) -> &str {
        self.procedures
            .get(id.0 as usize)
            .map(|p| p.name.as_str())
            .unwrap_or("<unknown>")
    }

    fn procedure_by_name(&self, name: &str) -> Option<ProcedureId> {
        self.by_name.get(name).copied()
    }

    fn arity(&self, id: ProcedureId) -> Option<usize> {
        self.procedures.get(id.0 as usize)?.arity
    }

    fn call_count(&self, id: ProcedureId) -> usize {
        self.procedures.get(id.0 as usize).map_or(0, |p| p.calls.len())
    }

    fn call_target(&self, call: CallSiteId) -> CallTarget {
        self.call(call).map_or(CallTarget::Indirect, |c| c.target)
    }

    fn arguments(&self, call: CallSiteId) -> &[Value] {
        self.call(call).map(|c| c.args.as_slice()).unwrap_or_default()
    }

    fn global_initializer(&self, name: &str) -> Option<&Initializer> {
        self.globals.get(name)
    }

    fn address_taken(&self) -> BTreeSet<ProcedureId> {
        let from_args = self
            .procedures
            .iter()
            .flat_map(|p| p.calls.iter())
            .flat_map(|c| c.args.iter())
            .filter_map(|v| match v.strip_pointer_casts() {
                Value::Function(id) => Some(*id),
                _ => None,
            });
        let from_globals = self.globals.values().filter_map(|init| match init {
            Initializer::Function(id) => Some(*id),
            _ => None,
        });
        from_args.chain(from_globals).collect()
    }

    fn annotated_targets(&self) -> Vec<(CallSiteId, Vec<ProcedureId>)> {
        self.annotations
            .iter()
            .map(|(call, targets)| (*call, targets.clone()))
            .collect()
    }
}

// ============================================================================
// InMemorySandboxes - sandbox partitioning held entirely in memory
// ============================================================================

#[derive(Debug, Clone)]
struct SandboxData {
    name: String,
    entry_points: Vec<ProcedureId>,
    calls: Vec<CallSiteId>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySandboxes {
    sandboxes: Vec<SandboxData>,
    privileged: Vec<ProcedureId>,
    privileged_entry_points: Vec<ProcedureId>,
    regions: HashSet<CallSiteId>,
}

impl InMemorySandboxes {
    /// Register a sandbox owning every call site of `procedures`.
    pub fn add_sandbox(
        &mut self,
        program: &dyn ProgramModel,
        name: &str,
        procedures: &[ProcedureId],
        entry_points: &[ProcedureId],
    ) -> SandboxId {
        let id = SandboxId(self.sandboxes.len() as u32);
        let calls = procedures
            .iter()
            .flat_map(|p| program.call_sites(*p))
            .collect();
        self.sandboxes.push(SandboxData {
            name: name.to_string(),
            entry_points: entry_points.to_vec(),
            calls,
        });
        id
    }

    /// Hand a call site that physically sits inside a sandboxed block of
    /// privileged code over to `sandbox`.
    pub fn add_region_call(&mut self, sandbox: SandboxId, call: CallSiteId) {
        if let Some(data) = self.sandboxes.get_mut(sandbox.0 as usize) {
            if !data.calls.contains(&call) {
                data.calls.push(call);
            }
            self.regions.insert(call);
        }
    }

    pub fn set_privileged(&mut self, procedures: Vec<ProcedureId>) {
        self.privileged = procedures;
    }

    pub fn set_privileged_entry_points(&mut self, procedures: Vec<ProcedureId>) {
        self.privileged_entry_points = procedures;
    }
}

impl SandboxModel for InMemorySandboxes {
    fn sandboxes(&self) -> Vec<SandboxId> {
        (0..self.sandboxes.len() as u32).map(SandboxId).collect()
    }

    fn sandbox_name(&self, id: SandboxId) -> &str {
        self.sandboxes
            .get(id.0 as usize)
            .map(|s| s.name.as_str())
            .unwrap_or("<unknown>")
    }

    fn sandbox_calls(&self, id: SandboxId) -> &[CallSiteId] {
        self.sandboxes
            .get(id.0 as usize)
            .map(|s| s.calls.as_slice())
            .unwrap_or_default()
    }

    fn entry_points(&self, id: SandboxId) -> &[ProcedureId] {
        self.sandboxes
            .get(id.0 as usize)
            .map(|s| s.entry_points.as_slice())
            .unwrap_or_default()
    }

    fn privileged_procedures(&self) -> Vec<ProcedureId> {
        self.privileged.clone()
    }

    fn privileged_entry_points(&self) -> Vec<ProcedureId> {
        self.privileged_entry_points.clone()
    }

    fn in_sandboxed_region(&self, call: CallSiteId) -> bool {
        self.regions.contains(&call)
    }
}
