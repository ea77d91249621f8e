//! RPC Report Exporters
//!
//! Structured (JSON) and plain-text renderings of a finished RPC graph.

use serde::Serialize;

use crate::domain::callgraph::CallGraphResolver;
use crate::domain::rpc::RpcGraph;
use crate::error::Result;
use crate::ports::{ProgramModel, RpcGraphExporter, SandboxModel};

/// Marker emitted in place of the receiver when no handler matched.
pub const HANDLER_MISSING: &str = "<handler missing>";

#[derive(Debug, Serialize)]
pub struct RpcReport {
    pub rpc_call: Vec<RpcCallEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicate_handler: Vec<DuplicateHandlerEntry>,
}

#[derive(Debug, Serialize)]
pub struct RpcCallEntry {
    pub sender_func: String,
    pub sender_sandbox: String,
    pub message_type: String,
    #[serde(flatten)]
    pub receiver: ReceiverEntry,
    /// Innermost call first, ending in an entry point.
    pub call_trace: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReceiverEntry {
    Handled {
        receiver_sandbox: String,
        receiver_func: String,
    },
    Missing {
        receiver: &'static str,
    },
}

#[derive(Debug, Serialize)]
pub struct DuplicateHandlerEntry {
    pub sandbox: String,
    pub message_type: String,
    pub replaced: String,
    pub by: String,
}

impl RpcReport {
    /// Flatten the graph into report entries, in graph order.
    pub fn from_graph(
        graph: &RpcGraph,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        resolver: &mut CallGraphResolver,
    ) -> Self {
        let mut rpc_call = Vec::with_capacity(graph.len());
        for (context, record) in graph.iter() {
            let sender = record.sender();
            let receiver = match (record.destination, record.handler) {
                (Some(destination), Some(handler)) => ReceiverEntry::Handled {
                    receiver_sandbox: sandboxes.context_name(destination).to_string(),
                    receiver_func: program.procedure_name(handler).to_string(),
                },
                _ => ReceiverEntry::Missing {
                    receiver: HANDLER_MISSING,
                },
            };
            let call_trace = resolver
                .call_trace(sender, context, program, sandboxes)
                .into_iter()
                .map(|call| program.describe_call(call))
                .collect();
            rpc_call.push(RpcCallEntry {
                sender_func: program.procedure_name(sender).to_string(),
                sender_sandbox: sandboxes.context_name(context).to_string(),
                message_type: record.message_type.clone(),
                receiver,
                call_trace,
            });
        }

        let duplicate_handler = graph
            .duplicate_handlers()
            .iter()
            .map(|d| DuplicateHandlerEntry {
                sandbox: sandboxes.context_name(d.context).to_string(),
                message_type: d.message_type.clone(),
                replaced: program.procedure_name(d.replaced).to_string(),
                by: program.procedure_name(d.by).to_string(),
            })
            .collect();

        Self {
            rpc_call,
            duplicate_handler,
        }
    }

    /// Human-readable rendering, one line per send plus its call trace.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        for entry in &self.rpc_call {
            let receiver = match &entry.receiver {
                ReceiverEntry::Handled {
                    receiver_sandbox,
                    receiver_func,
                } => format!("{} (handled by {})", receiver_sandbox, receiver_func),
                ReceiverEntry::Missing { receiver } => receiver.to_string(),
            };
            lines.push(format!(
                "{} ({}) ---{}--> {}",
                entry.sender_func, entry.sender_sandbox, entry.message_type, receiver
            ));
            for frame in &entry.call_trace {
                lines.push(format!("    called from {}", frame));
            }
        }
        for dup in &self.duplicate_handler {
            lines.push(format!(
                "duplicate handler for {} in {}: {} replaced by {}",
                dup.message_type, dup.sandbox, dup.replaced, dup.by
            ));
        }
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

pub struct JsonReportExporter;

impl RpcGraphExporter for JsonReportExporter {
    fn render(
        &self,
        graph: &RpcGraph,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        resolver: &mut CallGraphResolver,
    ) -> Result<String> {
        let report = RpcReport::from_graph(graph, program, sandboxes, resolver);
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

pub struct TextReportExporter;

impl RpcGraphExporter for TextReportExporter {
    fn render(
        &self,
        graph: &RpcGraph,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        resolver: &mut CallGraphResolver,
    ) -> Result<String> {
        Ok(RpcReport::from_graph(graph, program, sandboxes, resolver).to_text())
    }
}
