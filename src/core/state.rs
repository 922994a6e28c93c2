//! Job and pipeline outcome models

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Final status of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Passed,
    Failed,
    Cancelled,
}

/// Final status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Passed,
    Failed,
}

impl PipelineStatus {
    /// Process exit code for this status
    pub fn exit_code(self) -> i32 {
        match self {
            PipelineStatus::Passed => 0,
            PipelineStatus::Failed => 1,
        }
    }
}

/// Which output stream a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One captured line of step output, raw bytes including the newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
}

impl LogLine {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes)
            .trim_end_matches(&['\n', '\r'][..])
            .to_string()
    }
}

/// Result of running one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,

    /// `None` when the process could not be spawned, timed out, or was killed
    pub exit_code: Option<i32>,

    pub duration: Duration,

    /// Captured stdout/stderr in arrival order
    #[serde(skip)]
    pub log: Vec<LogLine>,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The last `max_lines` captured lines as text
    pub fn tail(&self, max_lines: usize) -> Vec<String> {
        let skip = self.log.len().saturating_sub(max_lines);
        self.log.iter().skip(skip).map(LogLine::text).collect()
    }

    /// All captured output, raw
    pub fn output_bytes(&self) -> Vec<u8> {
        self.log.iter().flat_map(|l| l.bytes.iter().copied()).collect()
    }
}

/// What the cache did for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CacheStatus {
    /// Workflow declares no cache, or caching is turned off
    Disabled,
    /// Entry found and unpacked before the first step
    Restored { key: String },
    /// No entry; a new one was stored after the job passed
    Saved { key: String },
    /// No entry, and nothing was stored
    Missed { key: String },
    /// Storing the new entry was refused or failed
    Rejected { key: String, reason: String },
}

/// Outcome of one job, produced exactly once per job spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,

    /// Why the job did not pass, if it did not
    pub error: Option<String>,

    pub cache: CacheStatus,
    pub duration: Duration,
}

impl JobOutcome {
    /// Outcome for a job that never started
    pub fn cancelled(job_id: impl Into<String>, error: String) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Cancelled,
            steps: Vec::new(),
            error: Some(error),
            cache: CacheStatus::Disabled,
            duration: Duration::ZERO,
        }
    }

    /// Outcome for a job that failed before running any step
    pub fn failed_before_start(job_id: impl Into<String>, error: String) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            steps: Vec::new(),
            error: Some(error),
            cache: CacheStatus::Disabled,
            duration: Duration::ZERO,
        }
    }

    /// First step that did not pass
    pub fn first_failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.passed())
    }
}

/// Terminal artifact of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub overall_status: PipelineStatus,

    /// Sorted by job id
    pub job_outcomes: Vec<JobOutcome>,
}

impl PipelineResult {
    pub fn passed(&self) -> bool {
        self.overall_status == PipelineStatus::Passed
    }

    pub fn exit_code(&self) -> i32 {
        self.overall_status.exit_code()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.job_outcomes
            .iter()
            .filter(|o| o.status == status)
            .count()
    }

    pub fn outcome(&self, job_id: &str) -> Option<&JobOutcome> {
        self.job_outcomes.iter().find(|o| o.job_id == job_id)
    }
}
