//! Workflow execution: workspaces, job executor, scheduler, reporter

pub mod engine;
pub mod events;
pub mod executor;
pub mod reporter;
pub mod scheduler;
pub mod workspace;

pub use engine::{ExecutionEngine, RunOptions};
pub use events::{EventBus, EventHandler, ExecutionEvent};
pub use executor::{CancellationFlag, JobExecutor};
pub use reporter::{finalize, FailureReport, RunReport};
pub use scheduler::{JobScheduler, SchedulePolicy};
pub use workspace::{GitCheckout, ScratchWorkspace, Workspace, WorkspaceProvider};
