//! Error taxonomy for workflow runs

use thiserror::Error;

/// Errors produced while loading or running a workflow
///
/// Only [`CiError::Configuration`] aborts a whole run. Every other variant is
/// scoped to the job that produced it and ends up in that job's outcome.
#[derive(Debug, Error)]
pub enum CiError {
    /// Malformed workflow definition or empty matrix axis
    #[error("configuration error at `{field}`: {message}")]
    Configuration { field: String, message: String },

    /// A command template referenced a variable the job does not define
    #[error("template error in step `{step}`: undefined variable `{variable}`")]
    Template { step: String, variable: String },

    /// A step exited unsuccessfully
    #[error("step `{step}` failed ({})", describe_exit(.exit_code))]
    StepFailure { step: String, exit_code: Option<i32> },

    /// A key already holds different content
    #[error("cache corruption: key `{key}` already holds different content")]
    CacheCorruption { key: String },

    /// Job stopped by the fail-fast policy
    #[error("job `{job_id}` cancelled after another job failed")]
    Cancelled { job_id: String },

    /// The working tree for a job could not be prepared
    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CiError {
    /// Shorthand for a configuration error pointing at `field`
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        CiError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the run before any job starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, CiError::Configuration { .. })
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}
