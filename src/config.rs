//! Analysis configuration, read from a TOML file. Every field has a default,
//! so an empty file (or no file) is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::rpc::RpcConventions;
use crate::error::{Error, Result};
use crate::ports::rpc_dot_exporter::DEFAULT_DOT_FILE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub conventions: RpcConventions,
    pub call_graph: CallGraphConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallGraphConfig {
    /// JSON file of observed (call site, callee) pairs.
    pub dynamic_trace: Option<PathBuf>,
    /// Merge programmer annotations on indirect calls.
    pub annotations: bool,
    pub indirect_fallback: IndirectFallback,
}

impl Default for CallGraphConfig {
    fn default() -> Self {
        Self {
            dynamic_trace: None,
            annotations: true,
            indirect_fallback: IndirectFallback::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndirectFallback {
    None,
    AddressTaken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub dot_file: String,
    pub report_file: String,
    pub format: ReportFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            dot_file: DEFAULT_DOT_FILE.to_string(),
            report_file: "rpc_report.json".to_string(),
            format: ReportFormat::Json,
        }
    }
}

impl OutputConfig {
    pub fn dot_path(&self) -> PathBuf {
        self.dir.join(&self.dot_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Text,
}

impl AnalysisConfig {
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }
}
