//! Events emitted while a run progresses

use crate::core::{EventKind, JobStatus, PipelineStatus, StreamKind};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunSkipped {
        workflow: String,
        kind: EventKind,
        branch: String,
    },
    RunStarted {
        run_id: Uuid,
        workflow: String,
        revision: String,
        jobs: Vec<String>,
    },
    JobStarted {
        job_id: String,
    },
    CacheHit {
        job_id: String,
        key: String,
    },
    CacheMiss {
        job_id: String,
        key: String,
    },
    CacheSaved {
        job_id: String,
        key: String,
    },
    CacheRejected {
        job_id: String,
        key: String,
        reason: String,
    },
    StepStarted {
        job_id: String,
        step_name: String,
        index: usize,
        command: String,
    },
    StepOutput {
        job_id: String,
        step_name: String,
        stream: StreamKind,
        line: String,
    },
    StepFinished {
        job_id: String,
        step_name: String,
        exit_code: Option<i32>,
        duration: Duration,
    },
    JobFinished {
        job_id: String,
        status: JobStatus,
        error: Option<String>,
        duration: Duration,
    },
    RunFinished {
        run_id: Uuid,
        status: PipelineStatus,
        duration: Duration,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every subsequent event
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(Arc::new(handler));
    }

    /// Deliver an event to all handlers, in registration order
    pub fn emit(&self, event: ExecutionEvent) {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
