// Command-line entry point for rpcscope.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rpcscope::application::AnalyzeUsecase;
use rpcscope::config::{AnalysisConfig, ReportFormat};
use rpcscope::infrastructure::SnapshotLoader;
use rpcscope::ports::ProgramModel;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "RPCSCOPE_LOG";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Program snapshot (JSON) to analyze
    #[arg(short, long)]
    program: PathBuf,

    /// Analysis configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the report and the DOT graph
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum)]
    format: Option<ReportFormat>,

    /// Dynamic call trace (JSON), overrides the configured one
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Print every function-pointer call site with its resolved targets
    #[arg(long)]
    list_fp_calls: bool,

    /// Print every function in the program
    #[arg(long)]
    list_funcs: bool,
}

fn init_logging() -> Result<()> {
    let filter = match std::env::var(LOG_ENV_VAR) {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::new("rpcscope=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output.dir = dir;
    }
    if let Some(format) = cli.format {
        config.output.format = format;
        if format == ReportFormat::Text && cli.config.is_none() {
            config.output.report_file = "rpc_report.txt".to_string();
        }
    }
    if let Some(trace) = cli.trace {
        config.call_graph.dynamic_trace = Some(trace);
    }

    let (program, sandboxes) = SnapshotLoader::load_file(&cli.program)
        .with_context(|| format!("loading program snapshot {}", cli.program.display()))?;

    let usecase = AnalyzeUsecase {
        program: &program,
        sandboxes: &sandboxes,
        config: &config,
    };

    if cli.list_funcs || cli.list_fp_calls {
        let mut resolver = usecase.build_resolver();
        if cli.list_funcs {
            for name in resolver.list_all_funcs(&program) {
                println!("{}", name);
            }
        }
        if cli.list_fp_calls {
            resolver.populate_call_callee_caches(&program);
            for (call, targets) in resolver.list_fp_calls(&program) {
                let names: Vec<&str> = targets.iter().map(|p| program.procedure_name(*p)).collect();
                println!("{} -> [{}]", program.describe_call(call), names.join(", "));
            }
        }
        return Ok(());
    }

    let outcome = usecase.run()?;
    println!(
        "Analysis completed! {} messages; report written to {}, graph written to {}",
        outcome.graph.len(),
        outcome.report_path.display(),
        outcome.dot_path.display()
    );
    Ok(())
}
