//! Job executor - runs one job's steps in order inside its workspace

use crate::{
    cache::{archive, fingerprint_files, CacheBroker, CacheKey, PutOutcome},
    core::{
        CacheSpec, CacheStatus, CiError, JobOutcome, JobSpec, JobStatus, LogLine, StepResult,
        StreamKind,
    },
    execution::{
        events::{EventBus, ExecutionEvent},
        workspace::Workspace,
    },
    runner::{OutputSink, StepInvocation, StepRunner},
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared flag checked at step boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collects a step's output and forwards each line as an event
struct StepSink<'a> {
    job_id: &'a str,
    step_name: &'a str,
    events: &'a EventBus,
    lines: Mutex<Vec<LogLine>>,
}

impl<'a> StepSink<'a> {
    fn new(job_id: &'a str, step_name: &'a str, events: &'a EventBus) -> Self {
        Self {
            job_id,
            step_name,
            events,
            lines: Mutex::new(Vec::new()),
        }
    }

    fn into_lines(self) -> Vec<LogLine> {
        match self.lines.into_inner() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl OutputSink for StepSink<'_> {
    fn on_line(&self, stream: StreamKind, bytes: &[u8]) {
        let line = LogLine {
            stream,
            bytes: bytes.to_vec(),
        };
        self.events.emit(ExecutionEvent::StepOutput {
            job_id: self.job_id.to_string(),
            step_name: self.step_name.to_string(),
            stream,
            line: line.text(),
        });
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}

/// Cache restored (or looked up) before the first step
struct CacheLookup {
    key: CacheKey,
    restored: bool,
}

/// Runs a single job
pub struct JobExecutor<R> {
    runner: Arc<R>,
    cache: Option<(Arc<CacheBroker>, CacheSpec)>,
    env: BTreeMap<String, String>,
    events: EventBus,
}

impl<R: StepRunner> JobExecutor<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            cache: None,
            env: BTreeMap::new(),
            events: EventBus::new(),
        }
    }

    /// Restore before the first step and save after a passing job
    pub fn with_cache(mut self, broker: Arc<CacheBroker>, spec: CacheSpec) -> Self {
        self.cache = Some((broker, spec));
        self
    }

    /// Environment passed to every step
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run `job` to completion in `workspace`
    ///
    /// Never fails: every problem is recorded in the returned outcome. The
    /// workspace is released before returning.
    pub async fn run(
        &self,
        job: &JobSpec,
        revision: &str,
        workspace: Workspace,
        cancel: &CancellationFlag,
    ) -> JobOutcome {
        let started = Instant::now();
        info!("Starting job {}", job.id);
        self.events.emit(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
        });

        let mut outcome = self.run_steps(job, revision, workspace.path(), cancel).await;
        outcome.duration = started.elapsed();
        workspace.release();

        info!("Job {} finished: {:?}", job.id, outcome.status);
        self.emit_job_finished(&outcome);
        outcome
    }

    /// Record a job whose workspace could not be prepared
    pub fn fail_before_start(&self, job: &JobSpec, err: CiError) -> JobOutcome {
        warn!("Job {} failed before start: {}", job.id, err);
        let outcome = JobOutcome::failed_before_start(job.id.clone(), err.to_string());
        self.emit_job_finished(&outcome);
        outcome
    }

    /// Record a job that was never started because the run was cancelled
    pub fn cancel_before_start(&self, job: &JobSpec) -> JobOutcome {
        let err = CiError::Cancelled {
            job_id: job.id.clone(),
        };
        debug!("{}", err);
        let outcome = JobOutcome::cancelled(job.id.clone(), err.to_string());
        self.emit_job_finished(&outcome);
        outcome
    }

    fn emit_job_finished(&self, outcome: &JobOutcome) {
        self.events.emit(ExecutionEvent::JobFinished {
            job_id: outcome.job_id.clone(),
            status: outcome.status,
            error: outcome.error.clone(),
            duration: outcome.duration,
        });
    }

    async fn run_steps(
        &self,
        job: &JobSpec,
        revision: &str,
        workdir: &Path,
        cancel: &CancellationFlag,
    ) -> JobOutcome {
        // Render everything up front so a template error runs nothing
        let commands = match job
            .steps
            .iter()
            .map(|step| step.render(&job.variables))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(commands) => commands,
            Err(e) => {
                error!("Job {}: {}", job.id, e);
                return JobOutcome::failed_before_start(job.id.clone(), e.to_string());
            }
        };

        let lookup = self.restore_cache(job, workdir).await;

        let mut steps = Vec::with_capacity(job.steps.len());
        let mut first_error: Option<CiError> = None;
        let mut cancelled = false;

        for (index, (step, command)) in job.steps.iter().zip(commands).enumerate() {
            if cancel.is_cancelled() {
                info!("Job {} cancelled before step {}", job.id, step.name);
                cancelled = true;
                break;
            }

            self.events.emit(ExecutionEvent::StepStarted {
                job_id: job.id.clone(),
                step_name: step.name.clone(),
                index,
                command: command.clone(),
            });

            let invocation = StepInvocation {
                job_id: job.id.clone(),
                step_name: step.name.clone(),
                command,
                workdir: workdir.to_path_buf(),
                env: self.step_env(job, &step.env, revision),
                timeout: step.timeout,
            };

            let sink = StepSink::new(&job.id, &step.name, &self.events);
            let step_started = Instant::now();
            let exit_code = match self.runner.run(&invocation, &sink).await {
                Ok(exit) => exit.exit_code,
                Err(e) => {
                    error!("Step {} of job {} could not run: {}", step.name, job.id, e);
                    sink.on_line(StreamKind::Stderr, format!("matrixci: {}\n", e).as_bytes());
                    None
                }
            };

            let result = StepResult {
                step_name: step.name.clone(),
                exit_code,
                duration: step_started.elapsed(),
                log: sink.into_lines(),
            };

            self.events.emit(ExecutionEvent::StepFinished {
                job_id: job.id.clone(),
                step_name: step.name.clone(),
                exit_code,
                duration: result.duration,
            });

            let passed = result.passed();
            steps.push(result);

            if !passed {
                error!(
                    "Step {} of job {} failed with exit code {:?}",
                    step.name, job.id, exit_code
                );
                first_error.get_or_insert(CiError::StepFailure {
                    step: step.name.clone(),
                    exit_code,
                });
                if !step.continue_on_failure {
                    break;
                }
            }
        }

        let (status, error) = if cancelled {
            let err = CiError::Cancelled {
                job_id: job.id.clone(),
            };
            (JobStatus::Cancelled, Some(err.to_string()))
        } else if let Some(err) = first_error {
            (JobStatus::Failed, Some(err.to_string()))
        } else {
            (JobStatus::Passed, None)
        };

        let cache = match lookup {
            None => CacheStatus::Disabled,
            Some(lookup) if lookup.restored => CacheStatus::Restored {
                key: lookup.key.to_string(),
            },
            Some(lookup) if status == JobStatus::Passed => {
                self.save_cache(&job.id, lookup.key, workdir).await
            }
            Some(lookup) => CacheStatus::Missed {
                key: lookup.key.to_string(),
            },
        };

        JobOutcome {
            job_id: job.id.clone(),
            status,
            steps,
            error,
            cache,
            duration: Default::default(),
        }
    }

    /// Environment for one step: workflow, then step, then engine variables
    fn step_env(
        &self,
        job: &JobSpec,
        step_env: &BTreeMap<String, String>,
        revision: &str,
    ) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .chain(step_env.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        env.push(("CI".to_string(), "true".to_string()));
        env.push(("MATRIXCI_JOB_ID".to_string(), job.id.clone()));
        env.push(("MATRIXCI_REVISION".to_string(), revision.to_string()));
        for (name, value) in &job.variables {
            env.push((matrix_env_name(name), value.clone()));
        }
        env
    }

    async fn restore_cache(&self, job: &JobSpec, workdir: &Path) -> Option<CacheLookup> {
        let (broker, spec) = self.cache.as_ref()?;

        let fingerprint = fingerprint_files(workdir, &spec.fingerprint).await;
        let key = CacheKey::derive(&spec.key_prefix, &job.variables, &fingerprint);

        let restored = match broker.get(&key).await {
            Some(blob) => match archive::unpack(blob, workdir).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to unpack cache entry {} for job {}: {}", key, job.id, e);
                    false
                }
            },
            None => false,
        };

        if restored {
            info!("Restored cache {} for job {}", key, job.id);
            self.events.emit(ExecutionEvent::CacheHit {
                job_id: job.id.clone(),
                key: key.to_string(),
            });
        } else {
            debug!("Cache miss {} for job {}", key, job.id);
            self.events.emit(ExecutionEvent::CacheMiss {
                job_id: job.id.clone(),
                key: key.to_string(),
            });
        }

        Some(CacheLookup { key, restored })
    }

    async fn save_cache(&self, job_id: &str, key: CacheKey, workdir: &Path) -> CacheStatus {
        let Some((broker, spec)) = self.cache.as_ref() else {
            return CacheStatus::Disabled;
        };

        let blob = match archive::pack(workdir, &spec.paths).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("Nothing to cache for job {}", job_id);
                return CacheStatus::Missed {
                    key: key.to_string(),
                };
            }
            Err(e) => return self.cache_rejected(job_id, key, e.to_string()),
        };

        match broker.put(&key, &blob).await {
            Ok(PutOutcome::Stored) | Ok(PutOutcome::Unchanged) => {
                self.events.emit(ExecutionEvent::CacheSaved {
                    job_id: job_id.to_string(),
                    key: key.to_string(),
                });
                CacheStatus::Saved {
                    key: key.to_string(),
                }
            }
            Ok(PutOutcome::Oversized) => {
                self.cache_rejected(job_id, key, "archive exceeds the cache budget".to_string())
            }
            Err(e) => self.cache_rejected(job_id, key, e.to_string()),
        }
    }

    fn cache_rejected(&self, job_id: &str, key: CacheKey, reason: String) -> CacheStatus {
        warn!("Cache save for job {} rejected: {}", job_id, reason);
        self.events.emit(ExecutionEvent::CacheRejected {
            job_id: job_id.to_string(),
            key: key.to_string(),
            reason: reason.clone(),
        });
        CacheStatus::Rejected {
            key: key.to_string(),
            reason,
        }
    }
}

/// `toolchain` -> `MATRIX_TOOLCHAIN`
fn matrix_env_name(axis: &str) -> String {
    let name: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MATRIX_{}", name)
}
