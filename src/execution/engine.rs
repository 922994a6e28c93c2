//! Main execution engine - orchestrates a whole run

use crate::{
    cache::CacheBroker,
    core::{CiError, Event, Workflow},
    execution::{
        events::{EventBus, ExecutionEvent},
        executor::JobExecutor,
        reporter::{self, RunReport},
        scheduler::{JobScheduler, SchedulePolicy},
        workspace::WorkspaceProvider,
    },
    runner::StepRunner,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Overrides applied on top of a workflow's strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub fail_fast: Option<bool>,
    pub max_parallel: Option<usize>,
}

/// Composes trigger evaluation, expansion, scheduling and reporting
pub struct ExecutionEngine<R> {
    runner: Arc<R>,
    workspaces: Arc<dyn WorkspaceProvider>,
    cache: Option<Arc<CacheBroker>>,
    events: EventBus,
}

impl<R: StepRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, workspaces: Arc<dyn WorkspaceProvider>) -> Self {
        Self {
            runner: Arc::new(runner),
            workspaces,
            cache: None,
            events: EventBus::new(),
        }
    }

    /// Use `broker` for workflows that declare a cache
    pub fn with_cache(mut self, broker: Arc<CacheBroker>) -> Self {
        self.cache = Some(broker);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler);
    }

    /// Run `workflow` for `event`
    ///
    /// Returns `Ok(None)` when no trigger rule matches. Only configuration
    /// errors are returned as `Err`; everything else lands in the report.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        event: &Event,
        options: RunOptions,
    ) -> Result<Option<RunReport>, CiError> {
        let Some(revision) = workflow.should_run(event) else {
            info!(
                "No trigger of '{}' matches {} to {}",
                workflow.name, event.kind, event.target_branch
            );
            self.events.emit(ExecutionEvent::RunSkipped {
                workflow: workflow.name.clone(),
                kind: event.kind,
                branch: event.target_branch.clone(),
            });
            return Ok(None);
        };

        let jobs = workflow.expand()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            "Starting run {} of '{}' at {} ({} jobs)",
            run_id,
            workflow.name,
            revision,
            jobs.len()
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow: workflow.name.clone(),
            revision: revision.clone(),
            jobs: jobs.iter().map(|j| j.id.clone()).collect(),
        });

        let mut executor = JobExecutor::new(self.runner.clone())
            .with_env(workflow.env.clone())
            .with_events(self.events.clone());
        if let (Some(broker), Some(spec)) = (&self.cache, &workflow.cache) {
            executor = executor.with_cache(broker.clone(), spec.clone());
        }

        let policy = SchedulePolicy {
            fail_fast: options.fail_fast.unwrap_or(workflow.fail_fast),
            max_parallel: options.max_parallel.or(workflow.max_parallel),
        };
        let scheduler = JobScheduler::new(Arc::new(executor), self.workspaces.clone());
        let outcomes = scheduler.run_all(jobs, &revision, policy).await;

        let result = reporter::finalize(outcomes);
        info!("Run {} finished: {:?}", run_id, result.overall_status);
        self.events.emit(ExecutionEvent::RunFinished {
            run_id,
            status: result.overall_status,
            duration: started.elapsed(),
        });

        Ok(Some(RunReport {
            run_id,
            workflow: workflow.name.clone(),
            revision,
            started_at,
            completed_at: Utc::now(),
            result,
        }))
    }
}
