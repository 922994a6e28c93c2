//! Process boundary for running step commands

pub mod shell;

use crate::core::StreamKind;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use shell::ShellRunner;

/// Error types for running a step command
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to run one rendered step
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub job_id: String,
    pub step_name: String,

    /// Fully rendered command line
    pub command: String,

    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepExit {
    /// `None` when terminated by a signal
    pub exit_code: Option<i32>,
}

/// Receives captured output lines in arrival order
///
/// This trait is object-safe and can be used as `&dyn OutputSink`.
pub trait OutputSink: Send + Sync {
    /// Called once per line, `bytes` includes the trailing newline if any
    fn on_line(&self, stream: StreamKind, bytes: &[u8]);
}

/// Sink that drops everything
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl OutputSink for NoopSink {
    fn on_line(&self, _stream: StreamKind, _bytes: &[u8]) {}
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run a command to completion, streaming its output into `sink`
    async fn run(
        &self,
        invocation: &StepInvocation,
        sink: &dyn OutputSink,
    ) -> Result<StepExit, RunnerError>;
}
