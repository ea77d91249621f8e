use std::fs;

use rpcscope::application::AnalyzeUsecase;
use rpcscope::config::{AnalysisConfig, IndirectFallback, ReportFormat};
use rpcscope::domain::context::Context;
use rpcscope::infrastructure::SnapshotLoader;
use rpcscope::ports::{ProgramModel, SandboxModel};
use tempfile::tempdir;

/// A browser-like program: the privileged side asks the renderer to draw,
/// the renderer dispatches through a function pointer and reports back.
const SNAPSHOT: &str = r#"{
    "procedures": [
        { "name": "main", "arity": 0, "calls": [
            { "target": { "direct": "navigate" } },
            { "target": { "direct": "__soaap_rpc_recv_helper" },
              "args": [ "opaque", { "global": "msg_drawn" }, { "function": "on_drawn" } ] }
        ]},
        { "name": "navigate", "arity": 0, "calls": [
            { "target": { "direct": "__soaap_rpc_send_helper" },
              "args": [ { "global": "dest_renderer" }, { "global": "msg_draw" } ] },
            { "target": { "direct": "__soaap_rpc_send_helper" },
              "args": [ { "global": "dest_network" }, { "global": "msg_fetch" } ] }
        ]},
        { "name": "on_drawn", "arity": 1 },
        { "name": "renderer_main", "arity": 0, "calls": [
            { "target": { "direct": "__soaap_rpc_recv_helper" },
              "args": [ "opaque", { "global": "msg_draw" }, { "cast": { "function": "on_draw" } } ] }
        ]},
        { "name": "on_draw", "arity": 1, "calls": [
            { "target": "indirect", "args": [ "opaque" ] }
        ]},
        { "name": "paint", "arity": 1, "calls": [
            { "target": { "direct": "__soaap_rpc_send_helper" },
              "args": [ { "global": "dest_privileged" }, { "global": "msg_drawn" } ] }
        ]}
    ],
    "globals": {
        "dest_renderer": { "cstring": "renderer\u0000" },
        "dest_network": { "cstring": "network\u0000" },
        "dest_privileged": { "cstring": "<privileged>\u0000" },
        "msg_draw": { "cstring": "DRAW\u0000" },
        "msg_drawn": { "cstring": "DRAWN\u0000" },
        "msg_fetch": { "cstring": "FETCH\u0000" },
        "paint_fn": { "function": "paint" }
    },
    "sandboxes": [
        { "name": "renderer",
          "entry_points": [ "renderer_main", "on_draw" ],
          "procedures": [ "renderer_main", "on_draw", "paint" ] }
    ]
}"#;

const TRACE: &str = r#"[ { "caller": "on_draw", "call_index": 0, "callee": "paint" } ]"#;

fn analyze(config: &AnalysisConfig) -> rpcscope::application::AnalysisOutcome {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("program.json");
    fs::write(&snapshot_path, SNAPSHOT).unwrap();
    let (program, sandboxes) = SnapshotLoader::load_file(&snapshot_path).unwrap();
    let usecase = AnalyzeUsecase {
        program: &program,
        sandboxes: &sandboxes,
        config,
    };
    usecase.run().unwrap()
}

#[test]
fn full_pipeline_writes_report_and_dot() {
    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("trace.json");
    fs::write(&trace_path, TRACE).unwrap();

    let mut config = AnalysisConfig::default();
    config.output.dir = dir.path().join("out");
    config.call_graph.dynamic_trace = Some(trace_path);

    let outcome = analyze(&config);
    assert_eq!(outcome.graph.len(), 3);
    assert_eq!(outcome.graph.missing_handlers().count(), 1);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&outcome.report_path).unwrap()).unwrap();
    let calls = report["rpc_call"].as_array().unwrap();
    assert_eq!(calls.len(), 3);

    assert_eq!(calls[0]["sender_func"], "navigate");
    assert_eq!(calls[0]["message_type"], "DRAW");
    assert_eq!(calls[0]["receiver_sandbox"], "renderer");
    assert_eq!(calls[0]["receiver_func"], "on_draw");
    assert_eq!(calls[0]["call_trace"], serde_json::json!(["main#0"]));

    assert_eq!(calls[1]["message_type"], "FETCH");
    assert_eq!(calls[1]["receiver"], "<handler missing>");

    // paint is only reachable through the traced function-pointer call
    assert_eq!(calls[2]["sender_func"], "paint");
    assert_eq!(calls[2]["sender_sandbox"], "renderer");
    assert_eq!(calls[2]["receiver_sandbox"], "<privileged>");
    assert_eq!(calls[2]["receiver_func"], "on_drawn");
    assert_eq!(calls[2]["call_trace"], serde_json::json!(["on_draw#0"]));

    let dot = fs::read_to_string(&outcome.dot_path).unwrap();
    assert!(outcome.dot_path.ends_with("rpcgraph.dot"));
    assert!(dot.starts_with("digraph G {"));
    assert!(dot.contains("label = \"<privileged>\""));
    assert!(dot.contains("label = \"renderer\""));
    assert!(dot.contains("[label=\"on_draw\",style=\"bold\"];"));
    assert!(dot.contains("[label=\"DRAW\",style=\"dashed\"];"));
    assert!(dot.contains("[label=\"DRAWN\",style=\"dashed\"];"));
    assert!(!dot.contains("FETCH"));
}

#[test]
fn missing_trace_file_leaves_indirect_call_unresolved() {
    let dir = tempdir().unwrap();
    let mut config = AnalysisConfig::default();
    config.output.dir = dir.path().to_path_buf();
    config.output.format = ReportFormat::Text;
    config.output.report_file = "report.txt".to_string();
    config.call_graph.dynamic_trace = Some(dir.path().join("absent.json"));

    let outcome = analyze(&config);
    // RPC matching does not depend on the call graph
    assert_eq!(outcome.graph.len(), 3);

    let text = fs::read_to_string(&outcome.report_path).unwrap();
    assert!(text.contains("navigate (<privileged>) ---DRAW--> renderer (handled by on_draw)"));
    assert!(text.contains("navigate (<privileged>) ---FETCH--> <handler missing>"));
    assert!(text.contains("paint (renderer) ---DRAWN--> <privileged> (handled by on_drawn)"));
    assert!(text.contains("    called from main#0"));
    assert!(!text.contains("called from on_draw#0"));
}

#[test]
fn address_taken_fallback_resolves_function_pointer_calls() {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("program.json");
    fs::write(&snapshot_path, SNAPSHOT).unwrap();
    let (program, sandboxes) = SnapshotLoader::load_file(&snapshot_path).unwrap();

    let mut config = AnalysisConfig::default();
    config.call_graph.indirect_fallback = IndirectFallback::AddressTaken;
    let usecase = AnalyzeUsecase {
        program: &program,
        sandboxes: &sandboxes,
        config: &config,
    };
    let mut resolver = usecase.build_resolver();
    resolver.populate_call_callee_caches(&program);

    let listing = resolver.list_fp_calls(&program);
    assert_eq!(listing.len(), 1);
    let targets: Vec<&str> = listing[0].1.iter().map(|p| program.procedure_name(*p)).collect();
    // on_draw, on_drawn and paint are address-taken with arity 1
    assert!(targets.contains(&"paint"));

    let on_draw = program.procedure_by_name("on_draw").unwrap();
    let paint = program.procedure_by_name("paint").unwrap();
    let renderer = Context::Sandboxed(sandboxes.sandbox_by_name("renderer").unwrap());
    assert!(resolver.is_reachable_from(on_draw, paint, renderer, &program, &sandboxes));
}

#[test]
fn snapshot_with_unknown_sandbox_member_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(
        &path,
        r#"{ "procedures": [ { "name": "main" } ],
             "sandboxes": [ { "name": "sb", "procedures": [ "ghost" ] } ] }"#,
    )
    .unwrap();
    let err = SnapshotLoader::load_file(&path).unwrap_err();
    assert!(err.to_string().contains("ghost"));
}
