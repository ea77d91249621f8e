//! Error type for the loading and output boundary.
//!
//! Analysis anomalies (non-constant operands, unknown destinations, missing
//! handlers) are never errors; they are carried as data in the RPC graph.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize report")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid configuration in {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown procedure `{0}`")]
    UnknownProcedure(String),

    #[error("unknown sandbox `{0}`")]
    UnknownSandbox(String),

    #[error("duplicate procedure `{0}`")]
    DuplicateProcedure(String),

    #[error("procedure `{procedure}` has no call site #{index}")]
    UnknownCallSite { procedure: String, index: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
