//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{JobStatus, PipelineStatus};
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow_name: String,

    /// Revision that was built
    pub revision: String,

    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    pub total_jobs: usize,
    pub passed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_run(&self, run: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// Runs, newest first, optionally for one workflow only
    async fn list_runs(&self, workflow_name: Option<&str>) -> Result<Vec<ExecutionSummary>>;

    /// Workflow names with their number of recorded runs
    async fn list_workflows(&self) -> Result<Vec<(String, usize)>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &ExecutionSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<ExecutionSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_name: Option<&str>) -> Result<Vec<ExecutionSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<ExecutionSummary> = runs
            .values()
            .filter(|r| workflow_name.map_or(true, |name| r.workflow_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_workflows(&self) -> Result<Vec<(String, usize)>> {
        let runs = self.runs.read().await;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for run in runs.values() {
            *counts.entry(run.workflow_name.clone()).or_default() += 1;
        }
        let mut workflows: Vec<(String, usize)> = counts.into_iter().collect();
        workflows.sort();
        Ok(workflows)
    }
}

/// Create a summary from a finished run
pub fn create_summary(report: &RunReport) -> ExecutionSummary {
    let result = &report.result;
    ExecutionSummary {
        run_id: report.run_id,
        workflow_name: report.workflow.clone(),
        revision: report.revision.clone(),
        status: result.overall_status,
        started_at: report.started_at,
        completed_at: report.completed_at,
        total_jobs: result.job_outcomes.len(),
        passed_jobs: result.count(JobStatus::Passed),
        failed_jobs: result.count(JobStatus::Failed),
        cancelled_jobs: result.count(JobStatus::Cancelled),
    }
}
