//! Job scheduler - runs every job of a run with bounded parallelism

use crate::{
    core::{JobOutcome, JobSpec, JobStatus},
    execution::{
        executor::{CancellationFlag, JobExecutor},
        workspace::WorkspaceProvider,
    },
    runner::StepRunner,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Scheduling policy for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulePolicy {
    /// Cancel remaining jobs after the first failure
    pub fail_fast: bool,

    /// Concurrency limit; `None` runs every job at once
    pub max_parallel: Option<usize>,
}

/// Dispatches jobs to executors
pub struct JobScheduler<R> {
    executor: Arc<JobExecutor<R>>,
    workspaces: Arc<dyn WorkspaceProvider>,
}

impl<R: StepRunner + 'static> JobScheduler<R> {
    pub fn new(executor: Arc<JobExecutor<R>>, workspaces: Arc<dyn WorkspaceProvider>) -> Self {
        Self {
            executor,
            workspaces,
        }
    }

    /// Run all `jobs`, returning exactly one outcome per job
    ///
    /// Jobs start in declared order as permits free up. With `fail_fast`, the
    /// first failed job sets a shared flag: queued jobs are recorded as
    /// cancelled without starting, and running jobs stop before their next
    /// step. Outcomes come back in completion order.
    pub async fn run_all(
        &self,
        jobs: Vec<JobSpec>,
        revision: &str,
        policy: SchedulePolicy,
    ) -> Vec<JobOutcome> {
        let limit = policy.max_parallel.unwrap_or(jobs.len()).max(1);
        info!(
            "Scheduling {} jobs (max_parallel={}, fail_fast={})",
            jobs.len(),
            limit,
            policy.fail_fast
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let cancel = CancellationFlag::new();
        let mut outcomes = Vec::with_capacity(jobs.len());
        let mut running = JoinSet::new();
        let mut dispatched = Vec::new();

        for job in jobs {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes.push(self.executor.cancel_before_start(&job));
                    continue;
                }
            };

            if cancel.is_cancelled() {
                outcomes.push(self.executor.cancel_before_start(&job));
                continue;
            }

            debug!("Dispatching job {}", job.id);
            dispatched.push(job.clone());

            let executor = self.executor.clone();
            let workspaces = self.workspaces.clone();
            let revision = revision.to_string();
            let cancel = cancel.clone();
            let fail_fast = policy.fail_fast;

            running.spawn(async move {
                let _permit = permit;
                let outcome = match workspaces.prepare(&job.id, &revision).await {
                    Ok(workspace) => executor.run(&job, &revision, workspace, &cancel).await,
                    Err(e) => executor.fail_before_start(&job, e),
                };
                if fail_fast && outcome.status == JobStatus::Failed {
                    info!("Job {} failed, cancelling remaining jobs", job.id);
                    cancel.cancel();
                }
                outcome
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Job task ended abnormally: {}", e),
            }
        }

        // A panicked task still owes its job an outcome
        let reported: HashSet<String> = outcomes.iter().map(|o| o.job_id.clone()).collect();
        for job in dispatched {
            if !reported.contains(&job.id) {
                outcomes.push(
                    self.executor
                        .fail_before_start(&job, crate::core::CiError::Workspace(
                            "job task ended abnormally".to_string(),
                        )),
                );
            }
        }

        outcomes
    }
}
