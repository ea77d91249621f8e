// Application layer: wires the loaded program into the resolver, the RPC
// graph builder and the exporters.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::config::{AnalysisConfig, IndirectFallback, ReportFormat};
use crate::domain::callgraph::CallGraphResolver;
use crate::domain::rpc::{RpcGraph, RpcGraphBuilder};
use crate::infrastructure::{AddressTakenResolver, TraceFileSource};
use crate::ports::rpc_dot_exporter::RpcDotExporter;
use crate::ports::rpc_report::{JsonReportExporter, TextReportExporter};
use crate::ports::{ProgramModel, RpcGraphExporter, SandboxModel};

pub struct AnalyzeUsecase<'a> {
    pub program: &'a dyn ProgramModel,
    pub sandboxes: &'a dyn SandboxModel,
    pub config: &'a AnalysisConfig,
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub graph: RpcGraph,
    pub report_path: PathBuf,
    pub dot_path: PathBuf,
}

impl<'a> AnalyzeUsecase<'a> {
    /// A resolver configured from the `[call_graph]` section. Not yet populated.
    pub fn build_resolver(&self) -> CallGraphResolver {
        let settings = &self.config.call_graph;
        let mut resolver = CallGraphResolver::new().with_annotations(settings.annotations);
        if let Some(trace) = &settings.dynamic_trace {
            resolver = resolver.with_dynamic_source(Box::new(TraceFileSource::new(trace)));
        }
        if settings.indirect_fallback == IndirectFallback::AddressTaken {
            resolver = resolver.with_indirect_resolver(Box::new(AddressTakenResolver));
        }
        resolver
    }

    pub fn run(&self) -> Result<AnalysisOutcome> {
        let output = &self.config.output;
        fs::create_dir_all(&output.dir)
            .with_context(|| format!("creating output directory {}", output.dir.display()))?;

        let mut resolver = self.build_resolver();
        resolver.populate_call_callee_caches(self.program);

        let graph = RpcGraphBuilder::new(&self.config.conventions).build(self.program, self.sandboxes);
        info!(messages = graph.len(), "built RPC graph");
        for (context, record) in graph.missing_handlers() {
            warn!(
                sender = %self.program.procedure_name(record.sender()),
                context = %self.sandboxes.context_name(context),
                message_type = %record.message_type,
                "no handler for message"
            );
        }

        let report_path = output.report_path();
        let report_exporter: &dyn RpcGraphExporter = match output.format {
            ReportFormat::Json => &JsonReportExporter,
            ReportFormat::Text => &TextReportExporter,
        };
        report_exporter
            .export(&graph, self.program, self.sandboxes, &mut resolver, &report_path)
            .with_context(|| format!("writing report to {}", report_path.display()))?;

        let dot_path = output.dot_path();
        RpcDotExporter
            .export(&graph, self.program, self.sandboxes, &mut resolver, &dot_path)
            .with_context(|| format!("writing RPC graph to {}", dot_path.display()))?;
        info!(report = %report_path.display(), dot = %dot_path.display(), "analysis written");

        Ok(AnalysisOutcome {
            graph,
            report_path,
            dot_path,
        })
    }
}
