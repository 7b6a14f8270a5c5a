// Public modules
pub mod artifact;
pub mod config;
pub mod defaults;
pub mod environment;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export common types for convenience
pub use environment::Environment;
pub use error::{Error, ErrorCode, Hint, Result};
pub use pipeline::{Pipeline, PipelineRunResult, PipelineRunStatus, PipelineState};
pub use runner::{CommandExecutor, ProcessExecutor, StageRunResult, StageRunner};
pub use stage::{Stage, StageRegistry};
