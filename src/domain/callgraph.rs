//! Call Graph Resolver
//!
//! Answers "what can this call site invoke?" and "who can invoke this
//! procedure?" for a single program, including indirect calls. Edges come
//! from three places:
//!
//! 1. direct calls, read straight from the program model;
//! 2. a dynamic trace of observed (call site, callee) pairs;
//! 3. programmer annotations on indirect call sites.
//!
//! An optional [`IndirectCallResolver`] gets the last word on every indirect
//! call site. The cache is filled lazily on the first query and is read-only
//! afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::domain::context::Context;
use crate::domain::program::{CallSiteId, CallTarget, ProcedureId};
use crate::ports::{DynamicEdgeSource, IndirectCallResolver, ProgramModel, SandboxModel};

/// Bidirectional call-site/procedure cache for one program.
pub struct CallGraphResolver {
    populated: bool,
    call_to_callees: BTreeMap<CallSiteId, BTreeSet<ProcedureId>>,
    callee_to_calls: BTreeMap<ProcedureId, BTreeSet<CallSiteId>>,
    dynamic_source: Option<Box<dyn DynamicEdgeSource>>,
    use_annotations: bool,
    indirect_resolver: Option<Box<dyn IndirectCallResolver>>,
    // Call sites per context, computed on first reachability query.
    scopes: HashMap<Context, BTreeSet<CallSiteId>>,
}

impl Default for CallGraphResolver {
    fn default() -> Self {
        Self {
            populated: false,
            call_to_callees: BTreeMap::new(),
            callee_to_calls: BTreeMap::new(),
            dynamic_source: None,
            use_annotations: true,
            indirect_resolver: None,
            scopes: HashMap::new(),
        }
    }
}

impl CallGraphResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dynamic_source(mut self, source: Box<dyn DynamicEdgeSource>) -> Self {
        self.dynamic_source = Some(source);
        self
    }

    pub fn with_annotations(mut self, enabled: bool) -> Self {
        self.use_annotations = enabled;
        self
    }

    pub fn with_indirect_resolver(mut self, resolver: Box<dyn IndirectCallResolver>) -> Self {
        self.indirect_resolver = Some(resolver);
        self
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn edge_count(&self) -> usize {
        self.call_to_callees.values().map(BTreeSet::len).sum()
    }

    /// Fill both directions of the cache. Runs once; later calls return
    /// immediately.
    pub fn populate_call_callee_caches(&mut self, program: &dyn ProgramModel) {
        if self.populated {
            return;
        }

        let mut indirect_calls = Vec::new();
        for procedure in program.procedures() {
            for call in program.call_sites(procedure) {
                match program.call_target(call) {
                    CallTarget::Direct(target) => {
                        self.add_edge(call, target);
                    }
                    CallTarget::Indirect => {
                        self.call_to_callees.entry(call).or_default();
                        indirect_calls.push(call);
                    }
                }
            }
        }
        let direct_edges = self.edge_count();

        self.load_dynamic_call_graph_edges(program);
        if self.use_annotations {
            self.load_annotated_call_graph_edges(program);
        }

        let refinements: Vec<(CallSiteId, BTreeSet<ProcedureId>)> = match &self.indirect_resolver {
            Some(resolver) => indirect_calls
                .iter()
                .filter_map(|call| {
                    let merged = self.call_to_callees.get(call).cloned().unwrap_or_default();
                    let refined = resolver.resolve(program, *call, &merged);
                    (refined != merged).then_some((*call, refined))
                })
                .collect(),
            None => Vec::new(),
        };
        for (call, targets) in refinements {
            debug!(call = %program.describe_call(call), targets = targets.len(), "indirect call refined");
            self.replace_callees(call, targets);
        }

        self.populated = true;
        info!(
            direct_edges,
            total_edges = self.edge_count(),
            indirect_calls = indirect_calls.len(),
            "call graph cache populated"
        );
    }

    /// Merge edges from the configured dynamic trace. A missing trace adds
    /// nothing; an unreadable one is logged and adds nothing.
    pub fn load_dynamic_call_graph_edges(&mut self, program: &dyn ProgramModel) {
        let loaded = match &self.dynamic_source {
            Some(source) => source
                .load_edges(program)
                .map(|edges| (source.describe(), edges))
                .map_err(|e| (source.describe(), e)),
            None => {
                debug!("no dynamic call graph source configured");
                return;
            }
        };

        match loaded {
            Ok((origin, edges)) => {
                let added = self.merge_edges(program, edges, "dynamic");
                info!(source = %origin, added, "loaded dynamic call graph edges");
            }
            Err((origin, e)) => {
                warn!(source = %origin, error = %e, "ignoring unreadable dynamic call graph");
            }
        }
    }

    /// Merge edges declared by annotations on indirect call sites.
    pub fn load_annotated_call_graph_edges(&mut self, program: &dyn ProgramModel) {
        let edges: Vec<(CallSiteId, ProcedureId)> = program
            .annotated_targets()
            .into_iter()
            .flat_map(|(call, targets)| targets.into_iter().map(move |target| (call, target)))
            .collect();
        let added = self.merge_edges(program, edges, "annotation");
        info!(added, "loaded annotated call graph edges");
    }

    /// Every indirect call site with its currently cached targets. Entries
    /// are also logged at debug level.
    pub fn list_fp_calls(&self, program: &dyn ProgramModel) -> Vec<(CallSiteId, Vec<ProcedureId>)> {
        let mut listing = Vec::new();
        for procedure in program.procedures() {
            for call in program.call_sites(procedure) {
                if program.call_target(call) != CallTarget::Indirect {
                    continue;
                }
                let targets: Vec<ProcedureId> = self
                    .call_to_callees
                    .get(&call)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default();
                let names: Vec<&str> = targets.iter().map(|p| program.procedure_name(*p)).collect();
                debug!(call = %program.describe_call(call), targets = ?names, "function pointer call");
                listing.push((call, targets));
            }
        }
        listing
    }

    /// The name of every procedure, each also logged at debug level.
    pub fn list_all_funcs(&self, program: &dyn ProgramModel) -> Vec<String> {
        program
            .procedures()
            .into_iter()
            .map(|procedure| {
                let name = program.procedure_name(procedure).to_string();
                debug!(function = %name, calls = program.call_count(procedure), "function");
                name
            })
            .collect()
    }

    /// Procedures `call` may invoke.
    pub fn callees(&mut self, call: CallSiteId, program: &dyn ProgramModel) -> Vec<ProcedureId> {
        self.populate_call_callee_caches(program);
        match program.call_target(call) {
            CallTarget::Direct(target) => vec![target],
            CallTarget::Indirect => self
                .call_to_callees
                .get(&call)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// Call sites that may invoke `procedure`.
    pub fn callers(&mut self, procedure: ProcedureId, program: &dyn ProgramModel) -> Vec<CallSiteId> {
        self.populate_call_callee_caches(program);
        self.callee_to_calls
            .get(&procedure)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True iff a non-empty chain of calls leads from `from` to `to` using
    /// only call sites that execute in `context`.
    pub fn is_reachable_from(
        &mut self,
        from: ProcedureId,
        to: ProcedureId,
        context: Context,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
    ) -> bool {
        self.populate_call_callee_caches(program);
        self.ensure_scope(context, program, sandboxes);
        let Some(scope) = self.scopes.get(&context) else {
            return false;
        };

        let mut visited = HashSet::from([from]);
        let mut worklist = VecDeque::from([from]);
        while let Some(current) = worklist.pop_front() {
            for call in program.call_sites(current) {
                if !scope.contains(&call) {
                    continue;
                }
                for &callee in self.call_to_callees.get(&call).into_iter().flatten() {
                    if callee == to {
                        return true;
                    }
                    if visited.insert(callee) {
                        worklist.push_back(callee);
                    }
                }
            }
        }
        false
    }

    /// Shortest chain of call sites leading from an entry point of `context`
    /// down to `procedure`, innermost call first.
    ///
    /// Empty if `procedure` is itself an entry point or no entry point
    /// reaches it within the context.
    pub fn call_trace(
        &mut self,
        procedure: ProcedureId,
        context: Context,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
    ) -> Vec<CallSiteId> {
        self.populate_call_callee_caches(program);
        self.ensure_scope(context, program, sandboxes);
        let Some(scope) = self.scopes.get(&context) else {
            return Vec::new();
        };

        let entries: BTreeSet<ProcedureId> =
            sandboxes.context_entry_points(context).into_iter().collect();
        if entries.contains(&procedure) {
            return Vec::new();
        }

        // caller -> (call site in caller, procedure it leads to)
        let mut toward: HashMap<ProcedureId, (CallSiteId, ProcedureId)> = HashMap::new();
        let mut visited = HashSet::from([procedure]);
        let mut worklist = VecDeque::from([procedure]);
        while let Some(current) = worklist.pop_front() {
            for &call in self.callee_to_calls.get(&current).into_iter().flatten() {
                if !scope.contains(&call) || !visited.insert(call.caller) {
                    continue;
                }
                toward.insert(call.caller, (call, current));
                if entries.contains(&call.caller) {
                    let mut trace = Vec::new();
                    let mut step = call.caller;
                    while let Some(&(site, next)) = toward.get(&step) {
                        trace.push(site);
                        step = next;
                    }
                    trace.reverse();
                    return trace;
                }
                worklist.push_back(call.caller);
            }
        }
        Vec::new()
    }

    fn ensure_scope(
        &mut self,
        context: Context,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
    ) {
        self.scopes
            .entry(context)
            .or_insert_with(|| sandboxes.context_call_sites(program, context));
    }

    fn add_edge(&mut self, call: CallSiteId, target: ProcedureId) -> bool {
        let added = self.call_to_callees.entry(call).or_default().insert(target);
        self.callee_to_calls.entry(target).or_default().insert(call);
        added
    }

    fn replace_callees(&mut self, call: CallSiteId, targets: BTreeSet<ProcedureId>) {
        if let Some(previous) = self.call_to_callees.insert(call, BTreeSet::new()) {
            for target in previous {
                if let Some(calls) = self.callee_to_calls.get_mut(&target) {
                    calls.remove(&call);
                }
            }
        }
        for target in targets {
            self.add_edge(call, target);
        }
    }

    /// Merge extra edges for indirect call sites. Edges naming a call site
    /// the program lacks, or a direct call, are dropped.
    fn merge_edges(
        &mut self,
        program: &dyn ProgramModel,
        edges: Vec<(CallSiteId, ProcedureId)>,
        origin: &str,
    ) -> usize {
        let mut added = 0;
        for (call, target) in edges {
            if !program.contains_call(call) {
                warn!(origin, call = %call, "edge for unknown call site dropped");
                continue;
            }
            if let CallTarget::Direct(_) = program.call_target(call) {
                debug!(origin, call = %program.describe_call(call), "edge for direct call ignored");
                continue;
            }
            if self.add_edge(call, target) {
                added += 1;
            }
        }
        added
    }
}
