//! Test utilities for matrixci scenarios

use async_trait::async_trait;
use matrixci::cache::{CacheBroker, MemoryBlobStore};
use matrixci::core::{Event, StreamKind, Workflow};
use matrixci::execution::{ExecutionEngine, ExecutionEvent, RunOptions, RunReport, ScratchWorkspace};
use matrixci::runner::{OutputSink, RunnerError, StepExit, StepInvocation, StepRunner};
use std::sync::{Arc, Mutex};

/// One recorded step invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub job_id: String,
    pub step_name: String,
    pub command: String,

    /// Whether the probed path existed when the step started
    pub probe_found: bool,
}

/// Step runner driven by command substrings instead of real processes
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    failures: Vec<(String, i32)>,
    writes: Vec<(String, String)>,
    probe: Option<String>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with `code`
    pub fn fail_on(mut self, pattern: &str, code: i32) -> Self {
        self.failures.push((pattern.to_string(), code));
        self
    }

    /// Commands containing `pattern` create `path` in the working tree
    pub fn write_on(mut self, pattern: &str, path: &str) -> Self {
        self.writes.push((pattern.to_string(), path.to_string()));
        self
    }

    /// Record whether `path` exists in the working tree at each call
    pub fn probe(mut self, path: &str) -> Self {
        self.probe = Some(path.to_string());
        self
    }

    /// Calls recorded so far, in start order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, job_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.job_id == job_id)
            .map(|c| c.step_name)
            .collect()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &StepInvocation,
        sink: &dyn OutputSink,
    ) -> Result<StepExit, RunnerError> {
        let probe_found = self
            .probe
            .as_ref()
            .map(|p| invocation.workdir.join(p).exists())
            .unwrap_or(false);
        self.calls.lock().unwrap().push(Call {
            job_id: invocation.job_id.clone(),
            step_name: invocation.step_name.clone(),
            command: invocation.command.clone(),
            probe_found,
        });

        for (pattern, path) in &self.writes {
            if invocation.command.contains(pattern.as_str()) {
                let target = invocation.workdir.join(path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, invocation.command.as_bytes())?;
            }
        }

        sink.on_line(StreamKind::Stdout, format!("$ {}\n", invocation.command).as_bytes());

        let code = self
            .failures
            .iter()
            .find(|(pattern, _)| invocation.command.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);
        if code != 0 {
            sink.on_line(StreamKind::Stderr, format!("error: exit {}\n", code).as_bytes());
        }

        Ok(StepExit {
            exit_code: Some(code),
        })
    }
}

/// Engine over scratch workspaces
pub fn scratch_engine(runner: &ScriptedRunner) -> ExecutionEngine<ScriptedRunner> {
    ExecutionEngine::new(runner.clone(), Arc::new(ScratchWorkspace::new()))
}

/// Broker over an in-memory store
pub async fn memory_cache(budget_bytes: u64) -> Arc<CacheBroker> {
    let broker = CacheBroker::open(Arc::new(MemoryBlobStore::new()), budget_bytes)
        .await
        .unwrap();
    Arc::new(broker)
}

/// Collect every event the engine emits
pub fn record_events<R: StepRunner + 'static>(
    engine: &ExecutionEngine<R>,
) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
    events
}

/// Parse `yaml` and run it for a push to `main`
pub async fn run_yaml(
    engine: &ExecutionEngine<ScriptedRunner>,
    yaml: &str,
    options: RunOptions,
) -> RunReport {
    let workflow = Workflow::from_yaml(yaml).unwrap();
    engine
        .execute(&workflow, &Event::push("main", "abc123"), options)
        .await
        .unwrap()
        .expect("push to main should trigger the workflow")
}
