// Infrastructure implementations for rpcscope.

pub mod indirect;
pub mod memory_model;
pub mod snapshot_loader;
pub mod trace_loader;

pub use indirect::AddressTakenResolver;
pub use memory_model::{InMemoryProgram, InMemorySandboxes};
pub use snapshot_loader::SnapshotLoader;
pub use trace_loader::TraceFileSource;
