//! Live terminal display of a run
//!
//! `TerminalReporter` is registered as an engine event handler. It keeps a
//! progress bar over job completion and prints job and cache events above
//! it. Step output is only shown when streaming is enabled.

use crate::cli::output::{create_progress_bar, format_execution_event, style};
use crate::execution::ExecutionEvent;
use indicatif::ProgressBar;
use std::sync::Mutex;

/// Event handler printing run progress to the terminal
pub struct TerminalReporter {
    stream: bool,
    visible: bool,
    bar: Mutex<ProgressBar>,
}

impl TerminalReporter {
    /// Create a reporter; `stream` prints every captured output line
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            visible: true,
            bar: Mutex::new(ProgressBar::hidden()),
        }
    }

    /// Reporter that tracks progress without drawing anything
    pub fn hidden(stream: bool) -> Self {
        Self {
            visible: false,
            ..Self::new(stream)
        }
    }

    /// Jobs finished so far
    pub fn finished_jobs(&self) -> u64 {
        self.bar().position()
    }

    fn bar(&self) -> ProgressBar {
        match self.bar.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_bar(&self, bar: ProgressBar) {
        match self.bar.lock() {
            Ok(mut guard) => *guard = bar,
            Err(poisoned) => *poisoned.into_inner() = bar,
        }
    }

    fn println(&self, line: impl AsRef<str>) {
        if !self.visible {
            return;
        }
        let bar = self.bar();
        if bar.is_hidden() {
            eprintln!("{}", line.as_ref());
        } else {
            bar.println(line);
        }
    }

    /// Print a horizontal rule spanning the terminal width
    pub fn print_separator(&self) {
        let width = term_size::dimensions_stderr()
            .map(|(w, _)| w)
            .unwrap_or(80);
        self.println(style("─".repeat(width)).dim().to_string());
    }

    pub fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { jobs, .. } => {
                self.println(format_execution_event(event));
                self.print_separator();
                let bar = if self.visible {
                    create_progress_bar(jobs.len())
                } else {
                    let bar = ProgressBar::hidden();
                    bar.set_length(jobs.len() as u64);
                    bar
                };
                self.replace_bar(bar);
            }
            ExecutionEvent::JobStarted { job_id } => {
                self.bar().set_message(job_id.clone());
                if self.stream {
                    self.println(format_execution_event(event));
                }
            }
            ExecutionEvent::StepStarted { .. }
            | ExecutionEvent::StepOutput { .. }
            | ExecutionEvent::StepFinished { .. } => {
                if self.stream {
                    self.println(format_execution_event(event));
                }
            }
            ExecutionEvent::JobFinished { .. } => {
                self.println(format_execution_event(event));
                self.bar().inc(1);
            }
            ExecutionEvent::RunFinished { .. } => {
                let bar = self.bar();
                bar.finish_and_clear();

                // Keep the count, stop drawing
                let done = ProgressBar::hidden();
                done.set_length(bar.length().unwrap_or(0));
                done.set_position(bar.position());
                self.replace_bar(done);
                self.print_separator();
            }
            ExecutionEvent::RunSkipped { .. }
            | ExecutionEvent::CacheHit { .. }
            | ExecutionEvent::CacheMiss { .. }
            | ExecutionEvent::CacheSaved { .. }
            | ExecutionEvent::CacheRejected { .. } => {
                self.println(format_execution_event(event));
            }
        }
    }
}
