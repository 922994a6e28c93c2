//! matrixci - run matrix CI workflows: triggers, job expansion, cached step execution

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use cache::{CacheBroker, CacheKey, FsBlobStore, MemoryBlobStore};
pub use core::{CiError, Event, EventKind, JobOutcome, JobStatus, PipelineResult, PipelineStatus, Workflow};
pub use execution::{ExecutionEngine, ExecutionEvent, RunOptions, RunReport};
pub use runner::{ShellRunner, StepRunner};
