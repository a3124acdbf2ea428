//! Chunkwise library
//!
//! Requirement analysis, runtime generation and the execution-time model of
//! an on-demand chunk loading runtime.

pub mod analyzer;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod graph;
pub mod runtime;
pub mod utils;

pub use analyzer::{analyze, RuntimeRequirements};
pub use cli::Cli;
pub use codegen::{GenerateError, GeneratedRuntime, RuntimeGenerator};
pub use config::Config;
pub use graph::{ChunkGraph, ChunkId, ModuleId};
pub use runtime::{ChunkLoadError, DeliveryQueue, Runtime};
