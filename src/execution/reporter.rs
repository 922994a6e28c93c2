//! Pipeline reporter - folds job outcomes into a verdict and keeps step logs

use crate::core::{CiError, JobOutcome, JobStatus, PipelineResult, PipelineStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Lines of captured output kept in a failure summary
pub const FAILURE_TAIL_LINES: usize = 20;

/// Aggregate outcomes: passed iff every job passed, sorted by job id
pub fn finalize(mut outcomes: Vec<JobOutcome>) -> PipelineResult {
    outcomes.sort_by(|a, b| a.job_id.cmp(&b.job_id));

    let overall_status = if outcomes.iter().all(|o| o.status == JobStatus::Passed) {
        PipelineStatus::Passed
    } else {
        PipelineStatus::Failed
    };

    PipelineResult {
        overall_status,
        job_outcomes: outcomes,
    }
}

/// Where a run first went wrong
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub job_id: String,

    /// `None` when the job failed before running a step
    pub step_name: Option<String>,

    pub exit_code: Option<i32>,

    pub error: Option<String>,

    /// Last captured output lines of the failing step
    pub output_tail: Vec<String>,
}

/// Terminal artifact of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub revision: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub result: PipelineResult,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.result.passed()
    }

    pub fn exit_code(&self) -> i32 {
        self.result.exit_code()
    }

    /// First failed job in id order, with its first failing step
    ///
    /// Cancelled jobs are skipped; they did not fail on their own.
    pub fn first_failure(&self) -> Option<FailureReport> {
        let job = self
            .result
            .job_outcomes
            .iter()
            .find(|o| o.status == JobStatus::Failed)?;

        let step = job.first_failed_step();
        Some(FailureReport {
            job_id: job.job_id.clone(),
            step_name: step.map(|s| s.step_name.clone()),
            exit_code: step.and_then(|s| s.exit_code),
            error: job.error.clone(),
            output_tail: step
                .map(|s| s.tail(FAILURE_TAIL_LINES))
                .unwrap_or_default(),
        })
    }

    /// Write each step's captured output under `<dir>/<run_id>/<job_id>/`
    ///
    /// Files are named `<NN>-<step>.log` in step order. Returns the run's
    /// log directory.
    pub async fn write_logs(&self, dir: &Path) -> Result<PathBuf, CiError> {
        let run_dir = dir.join(self.run_id.to_string());

        for outcome in &self.result.job_outcomes {
            let job_dir = run_dir.join(file_name_safe(&outcome.job_id));
            tokio::fs::create_dir_all(&job_dir).await?;

            for (index, step) in outcome.steps.iter().enumerate() {
                let path = job_dir.join(format!(
                    "{:02}-{}.log",
                    index + 1,
                    file_name_safe(&step.step_name)
                ));
                tokio::fs::write(&path, step.output_bytes()).await?;
                debug!("Wrote {}", path.display());
            }
        }

        Ok(run_dir)
    }
}

fn file_name_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
