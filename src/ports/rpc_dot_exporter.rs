//! RPC Graph DOT Exporter
//!
//! Exports an RpcGraph as Graphviz DOT: one cluster per context holding the
//! procedures that send or handle messages there, dashed edges for matched
//! messages.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::callgraph::CallGraphResolver;
use crate::domain::context::Context;
use crate::domain::program::ProcedureId;
use crate::domain::rpc::RpcGraph;
use crate::error::Result;
use crate::ports::{ProgramModel, RpcGraphExporter, SandboxModel};

pub const DEFAULT_DOT_FILE: &str = "rpcgraph.dot";

pub struct RpcDotExporter;

impl RpcDotExporter {
    /// Senders grouped under their sending context, matched handlers under
    /// the destination context.
    pub fn participants(graph: &RpcGraph) -> BTreeMap<Context, BTreeSet<ProcedureId>> {
        let mut members: BTreeMap<Context, BTreeSet<ProcedureId>> = BTreeMap::new();
        for (context, record) in graph.iter() {
            members.entry(context).or_default().insert(record.sender());
            if let (Some(destination), Some(handler)) = (record.destination, record.handler) {
                members.entry(destination).or_default().insert(handler);
            }
        }
        members
    }

    fn escape_label(label: &str) -> String {
        label
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
    }
}

impl RpcGraphExporter for RpcDotExporter {
    fn render(
        &self,
        graph: &RpcGraph,
        program: &dyn ProgramModel,
        sandboxes: &dyn SandboxModel,
        resolver: &mut CallGraphResolver,
    ) -> Result<String> {
        let mut lines = Vec::new();
        lines.push("digraph G {".to_string());

        let mut node_ids: HashMap<(Context, ProcedureId), usize> = HashMap::new();
        let mut next_id = 0;

        for (cluster, (context, procedures)) in Self::participants(graph).iter().enumerate() {
            lines.push(format!("\tsubgraph cluster_{} {{", cluster));
            lines.push("\t\trankdir=TB".to_string());
            lines.push(format!(
                "\t\tlabel = \"{}\"",
                Self::escape_label(sandboxes.context_name(*context))
            ));
            let mut ids = Vec::with_capacity(procedures.len());
            for procedure in procedures {
                let id = *node_ids.entry((*context, *procedure)).or_insert_with(|| {
                    next_id += 1;
                    next_id - 1
                });
                let bold = context
                    .sandbox()
                    .map_or(false, |sandbox| sandboxes.is_entry_point(sandbox, *procedure));
                lines.push(format!(
                    "\t\tn{} [label=\"{}\"{}];",
                    id,
                    Self::escape_label(program.procedure_name(*procedure)),
                    if bold { ",style=\"bold\"" } else { "" }
                ));
                ids.push(id);
            }

            // invisible edges force a top-to-bottom layout
            for pair in ids.windows(2) {
                lines.push(format!("\t\tn{} -> n{} [style=invis];", pair[0], pair[1]));
            }
            lines.push("\t}".to_string());

            for (from, from_id) in procedures.iter().zip(&ids) {
                for (to, to_id) in procedures.iter().zip(&ids) {
                    if from != to
                        && resolver.is_reachable_from(*from, *to, *context, program, sandboxes)
                    {
                        lines.push(format!("\tn{} -> n{} [constraint=false];", from_id, to_id));
                    }
                }
            }
        }

        lines.push(String::new());

        for (context, record) in graph.iter() {
            let (Some(destination), Some(handler)) = (record.destination, record.handler) else {
                continue;
            };
            let from = node_ids.get(&(context, record.sender()));
            let to = node_ids.get(&(destination, handler));
            if let (Some(from), Some(to)) = (from, to) {
                lines.push(format!(
                    "\tn{} -> n{} [label=\"{}\",style=\"dashed\"];",
                    from,
                    to,
                    Self::escape_label(&record.message_type)
                ));
            }
        }

        lines.push("}".to_string());
        let mut dot = lines.join("\n");
        dot.push('\n');
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::program::{CallTarget, Initializer, Value};
    use crate::domain::rpc::{RpcConventions, RpcGraphBuilder};
    use crate::infrastructure::{InMemoryProgram, InMemorySandboxes};

    fn render(program: &InMemoryProgram, sandboxes: &InMemorySandboxes) -> String {
        let conventions = RpcConventions::default();
        let graph = RpcGraphBuilder::new(&conventions).build(program, sandboxes);
        let mut resolver = CallGraphResolver::new();
        RpcDotExporter
            .render(&graph, program, sandboxes, &mut resolver)
            .unwrap()
    }

    /// main sends PING to worker and, via `relay`, PONG to nobody;
    /// worker_main registers on_ping.
    fn fixture() -> (InMemoryProgram, InMemorySandboxes) {
        let mut program = InMemoryProgram::default();
        let send = program.add_procedure("__soaap_rpc_send_helper", None);
        let recv = program.add_procedure("__soaap_rpc_recv_helper", None);
        let main = program.add_procedure("main", Some(0));
        let relay = program.add_procedure("relay", Some(0));
        let worker_main = program.add_procedure("worker_main", Some(0));
        let on_ping = program.add_procedure("on_ping", Some(1));
        for name in ["worker", "PING", "PONG"] {
            program.add_global(name, Initializer::CString(format!("{name}\0")));
        }
        let g = |name: &str| Value::Global(name.to_string());

        program.add_call(main, CallTarget::Direct(send), vec![g("worker"), g("PING")]);
        program.add_call(main, CallTarget::Direct(relay), vec![]);
        program.add_call(relay, CallTarget::Direct(send), vec![g("worker"), g("PONG")]);
        program.add_call(
            worker_main,
            CallTarget::Direct(recv),
            vec![Value::Opaque, g("PING"), Value::Function(on_ping)],
        );

        let mut sandboxes = InMemorySandboxes::default();
        sandboxes.set_privileged(vec![main, relay]);
        sandboxes.add_sandbox(&program, "worker", &[worker_main, on_ping], &[on_ping]);
        (program, sandboxes)
    }

    #[test]
    fn test_clusters_and_nodes() {
        let (program, sandboxes) = fixture();
        let dot = render(&program, &sandboxes);

        assert!(dot.starts_with("digraph G {\n"));
        assert!(dot.contains("\tsubgraph cluster_0 {"));
        assert!(dot.contains("\t\tlabel = \"<privileged>\""));
        assert!(dot.contains("\tsubgraph cluster_1 {"));
        assert!(dot.contains("\t\tlabel = \"worker\""));
        assert!(dot.contains("\t\tn0 [label=\"main\"];"));
        assert!(dot.contains("\t\tn1 [label=\"relay\"];"));
        assert!(dot.contains("\t\tn2 [label=\"on_ping\",style=\"bold\"];"));
        assert_eq!(dot.matches("[label=\"main\"]").count(), 1);
        assert!(dot.contains("\t\tn0 -> n1 [style=invis];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_reachability_and_message_edges() {
        let (program, sandboxes) = fixture();
        let dot = render(&program, &sandboxes);

        assert!(dot.contains("\tn0 -> n1 [constraint=false];"));
        assert!(!dot.contains("\tn1 -> n0 [constraint=false];"));
        assert!(dot.contains("\tn0 -> n2 [label=\"PING\",style=\"dashed\"];"));
        // PONG has no handler, so no message edge
        assert!(!dot.contains("PONG"));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(RpcDotExporter::escape_label("a\"b"), "a\\\"b");
        assert_eq!(RpcDotExporter::escape_label("x\ny"), "x\\ny");
    }
}
