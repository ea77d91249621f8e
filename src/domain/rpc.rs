//! RPC Graph Builder
//!
//! Finds message sends and receives by the helper naming convention, pulls
//! destination and message type out of constant operands, and pairs every
//! send with the handler registered for its (destination, message type).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::context::{Context, PRIVILEGED_CONTEXT_NAME};
use crate::domain::program::{procedure_argument, string_argument, CallSiteId, CallTarget, ProcedureId};
use crate::ports::{ProgramModel, SandboxModel};

/// Name prefixes of the message helper functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConventions {
    pub send_prefix: String,
    pub recv_prefix: String,
    pub recv_sync_prefix: String,
}

impl Default for RpcConventions {
    fn default() -> Self {
        Self {
            send_prefix: "__soaap_rpc_send_helper".to_string(),
            recv_prefix: "__soaap_rpc_recv_helper".to_string(),
            recv_sync_prefix: "__soaap_rpc_recv_sync_helper".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOperation {
    /// `send(destination, message_type, ...)`
    Send,
    /// `recv(_, message_type, handler, ...)`
    Receive,
    /// `recv_sync(_, message_type, ...)`, handled by the calling procedure.
    ReceiveSync,
}

impl RpcConventions {
    /// The operation whose prefix `callee_name` starts with. When several
    /// prefixes match (`ipc_recv` and `ipc_recv_sync`), the longest wins.
    /// Empty prefixes never match.
    pub fn classify(&self, callee_name: &str) -> Option<RpcOperation> {
        [
            (self.send_prefix.as_str(), RpcOperation::Send),
            (self.recv_prefix.as_str(), RpcOperation::Receive),
            (self.recv_sync_prefix.as_str(), RpcOperation::ReceiveSync),
        ]
        .into_iter()
        .filter(|(prefix, _)| !prefix.is_empty() && callee_name.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, operation)| operation)
    }
}

/// One send and what (if anything) handles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCallRecord {
    /// The sending call site.
    pub call: CallSiteId,
    pub message_type: String,
    /// `None` when the destination name matches no context.
    pub destination: Option<Context>,
    /// `None` when no receive matched.
    pub handler: Option<ProcedureId>,
}

impl RpcCallRecord {
    pub fn sender(&self) -> ProcedureId {
        self.call.caller
    }
}

/// A receive registration that replaced an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateHandler {
    pub context: Context,
    pub message_type: String,
    pub replaced: ProcedureId,
    pub by: ProcedureId,
}

/// Sends grouped by the context they are issued from.
#[derive(Debug, Clone, Default)]
pub struct RpcGraph {
    links: BTreeMap<Context, Vec<RpcCallRecord>>,
    duplicate_handlers: Vec<DuplicateHandler>,
}

impl RpcGraph {
    pub fn contexts(&self) -> impl Iterator<Item = Context> + '_ {
        self.links.keys().copied()
    }

    pub fn records(&self, context: Context) -> &[RpcCallRecord] {
        self.links.get(&context).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every record with its sending context, in graph order.
    pub fn iter(&self) -> impl Iterator<Item = (Context, &RpcCallRecord)> + '_ {
        self.links
            .iter()
            .flat_map(|(context, records)| records.iter().map(move |r| (*context, r)))
    }

    pub fn missing_handlers(&self) -> impl Iterator<Item = (Context, &RpcCallRecord)> + '_ {
        self.iter().filter(|(_, record)| record.handler.is_none())
    }

    pub fn duplicate_handlers(&self) -> &[DuplicateHandler] {
        &self.duplicate_handlers
    }

    pub fn len(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RpcGraphBuilder<'a> {
    conventions: &'a RpcConventions,
}

impl<'a> RpcGraphBuilder<'a> {
    pub fn new(conventions: &'a RpcConventions) -> Self {
        Self { conventions }
    }

    /// Build the graph from scratch.
    pub fn build(&self, program: &dyn ProgramModel, sandboxes: &dyn SandboxModel) -> RpcGraph {
        let mut populations: Vec<(Context, Vec<CallSiteId>)> = vec![(
            Context::Privileged,
            sandboxes
                .privileged_procedures()
                .into_iter()
                .flat_map(|procedure| sandboxes.privileged_call_sites(program, procedure))
                .collect(),
        )];
        for sandbox in sandboxes.sandboxes() {
            populations.push((Context::Sandboxed(sandbox), sandboxes.sandbox_calls(sandbox).to_vec()));
        }

        let mut graph = RpcGraph::default();
        let mut senders: BTreeMap<Context, Vec<CallSiteId>> = BTreeMap::new();
        let mut receivers: HashMap<Context, HashMap<String, ProcedureId>> = HashMap::new();

        for (context, calls) in &populations {
            let context_name = sandboxes.context_name(*context);
            for &call in calls {
                let CallTarget::Direct(callee) = program.call_target(call) else {
                    continue;
                };
                let operation = match self.conventions.classify(program.procedure_name(callee)) {
                    Some(operation) => operation,
                    None => continue,
                };
                match operation {
                    RpcOperation::Send => {
                        debug!(context = context_name, call = %program.describe_call(call), "send");
                        senders.entry(*context).or_default().push(call);
                    }
                    RpcOperation::Receive | RpcOperation::ReceiveSync => {
                        debug!(context = context_name, call = %program.describe_call(call), "receive");
                        let Some(message_type) = string_argument(program, call, 1) else {
                            warn!(call = %program.describe_call(call), "receive with non-constant message type skipped");
                            continue;
                        };
                        let handler = if operation == RpcOperation::Receive {
                            procedure_argument(program, call, 2)
                        } else {
                            Some(call.caller)
                        };
                        let Some(handler) = handler else {
                            warn!(call = %program.describe_call(call), "receive without a resolvable handler skipped");
                            continue;
                        };
                        debug!(message_type = %message_type, handler = program.procedure_name(handler), "handler registered");

                        let index = receivers.entry(*context).or_default();
                        if let Some(replaced) = index.insert(message_type.clone(), handler) {
                            if replaced != handler {
                                warn!(
                                    context = context_name,
                                    message_type = %message_type,
                                    replaced = program.procedure_name(replaced),
                                    by = program.procedure_name(handler),
                                    "duplicate handler, later registration wins"
                                );
                                graph.duplicate_handlers.push(DuplicateHandler {
                                    context: *context,
                                    message_type,
                                    replaced,
                                    by: handler,
                                });
                            }
                        }
                    }
                }
            }
        }

        for (context, calls) in senders {
            for call in calls {
                let Some(message_type) = string_argument(program, call, 1) else {
                    warn!(call = %program.describe_call(call), "send with non-constant message type skipped");
                    continue;
                };
                let destination = self.resolve_destination(program, sandboxes, call);
                let handler = destination
                    .and_then(|d| receivers.get(&d))
                    .and_then(|index| index.get(&message_type))
                    .copied();
                debug!(
                    call = %program.describe_call(call),
                    message_type = %message_type,
                    matched = handler.is_some(),
                    "send resolved"
                );
                graph.links.entry(context).or_default().push(RpcCallRecord {
                    call,
                    message_type,
                    destination,
                    handler,
                });
            }
        }

        info!(
            records = graph.len(),
            missing = graph.missing_handlers().count(),
            duplicates = graph.duplicate_handlers.len(),
            "rpc graph built"
        );
        graph
    }

    fn resolve_destination(
        &self,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        call: CallSiteId,
    ) -> Option<Context> {
        let Some(name) = string_argument(program, call, 0) else {
            warn!(call = %program.describe_call(call), "send with non-constant destination");
            return None;
        };
        if name == PRIVILEGED_CONTEXT_NAME {
            return Some(Context::Privileged);
        }
        let destination = sandboxes.sandbox_by_name(&name).map(Context::Sandboxed);
        if destination.is_none() {
            debug!(destination = %name, "send to unknown context");
        }
        destination
    }
}
