pub mod callgraph;
pub mod context;
pub mod program;
pub mod rpc;
