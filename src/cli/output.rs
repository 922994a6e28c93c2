//! CLI output formatting

use crate::{
    cache::CacheEntry,
    core::{CacheStatus, JobOutcome, JobStatus, PipelineStatus, StepResult},
    execution::{ExecutionEvent, FailureReport, RunReport},
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}";

/// Create a progress bar over `total` jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let bar_style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(bar_style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a pipeline status for display
pub fn format_status(status: PipelineStatus) -> String {
    match status {
        PipelineStatus::Passed => style("PASSED").green().to_string(),
        PipelineStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a job status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Passed => style("PASSED").green().to_string(),
        JobStatus::Failed => style("FAILED").red().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn job_icon(status: JobStatus) -> Emoji<'static, 'static> {
    match status {
        JobStatus::Passed => CHECK,
        JobStatus::Failed => CROSS,
        JobStatus::Cancelled => WARN,
    }
}

/// One-line description of what the cache did, if anything
pub fn format_cache_status(cache: &CacheStatus) -> Option<String> {
    let text = match cache {
        CacheStatus::Disabled => return None,
        CacheStatus::Restored { key } => format!("cache restored from {}", key),
        CacheStatus::Saved { key } => format!("cache saved as {}", key),
        CacheStatus::Missed { key } => format!("cache miss for {}", key),
        CacheStatus::Rejected { key, reason } => {
            format!("cache entry {} not saved: {}", key, reason)
        }
    };
    Some(style(text).dim().to_string())
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_step(step: &StepResult) -> String {
    let exit = match step.exit_code {
        Some(code) => format!("exit {}", code),
        None => "no exit code".to_string(),
    };
    let icon = if step.passed() { CHECK } else { CROSS };
    format!(
        "    {}{} ({}, {})",
        icon,
        step.step_name,
        style(exit).dim(),
        style(format_duration(step.duration)).dim()
    )
}

/// Job line followed by one line per step
pub fn format_job_outcome(outcome: &JobOutcome) -> String {
    let mut lines = vec![format!(
        "{}{} {} ({})",
        job_icon(outcome.status),
        style(&outcome.job_id).bold(),
        format_job_status(outcome.status),
        style(format_duration(outcome.duration)).dim()
    )];
    if let Some(cache) = format_cache_status(&outcome.cache) {
        lines.push(format!("    {}", cache));
    }
    lines.extend(outcome.steps.iter().map(format_step));
    if let Some(error) = &outcome.error {
        lines.push(format!("    {}", style(error).dim()));
    }
    lines.join("\n")
}

/// Per-job, per-step breakdown with the overall verdict
pub fn format_run_report(report: &RunReport) -> String {
    let result = &report.result;
    let mut lines: Vec<String> = result.job_outcomes.iter().map(format_job_outcome).collect();

    lines.push(String::new());
    lines.push(format!(
        "{} {} at {}: {} ({} passed, {} failed, {} cancelled)",
        if result.passed() { CHECK } else { CROSS },
        style(&report.workflow).bold(),
        style(&report.revision).dim(),
        format_status(result.overall_status),
        style(result.count(JobStatus::Passed)).green(),
        style(result.count(JobStatus::Failed)).red(),
        style(result.count(JobStatus::Cancelled)).yellow()
    ));
    lines.join("\n")
}

/// The first failure with its captured output
pub fn format_failure(failure: &FailureReport) -> String {
    let mut header = format!("{}First failure in job {}", CROSS, style(&failure.job_id).bold());
    if let Some(step) = &failure.step_name {
        header.push_str(&format!(", step {}", style(step).red()));
    }
    match failure.exit_code {
        Some(code) => header.push_str(&format!(" (exit {})", code)),
        None if failure.step_name.is_some() => header.push_str(" (no exit code)"),
        None => {}
    }

    let mut lines = vec![header];
    if let Some(error) = &failure.error {
        lines.push(format!("  {}", style(error).dim()));
    }
    if !failure.output_tail.is_empty() {
        lines.push(format_output(&failure.output_tail.join("\n"), failure.output_tail.len()));
    }
    lines.join("\n")
}

/// Format run summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        PipelineStatus::Passed => CHECK,
        PipelineStatus::Failed => CROSS,
    };

    format!(
        "{}{} - {} @ {} - {} ({}/{} passed) - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.workflow_name).bold(),
        style(&summary.revision).dim(),
        format_status(summary.status),
        summary.passed_jobs,
        summary.total_jobs,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format a cache entry as a table row
pub fn format_cache_entry(entry: &CacheEntry) -> String {
    format!(
        "  {:<72} {:>10}  {}",
        entry.key.as_str(),
        format_bytes(entry.size),
        style(entry.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunSkipped {
            workflow,
            kind,
            branch,
        } => format!(
            "{}No trigger of {} matches {} to {}",
            INFO,
            style(workflow).bold(),
            kind,
            style(branch).cyan()
        ),
        ExecutionEvent::RunStarted {
            run_id,
            workflow,
            revision,
            jobs,
        } => format!(
            "{}Starting {} at {} with {} jobs ({})",
            ROCKET,
            style(workflow).bold(),
            style(revision).dim(),
            jobs.len(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::JobStarted { job_id } => {
            format!("{}{}", SPINNER, style(job_id).cyan())
        }
        ExecutionEvent::CacheHit { job_id, key } => format!(
            "{}{} restored cache {}",
            INFO,
            style(job_id).cyan(),
            style(key).dim()
        ),
        ExecutionEvent::CacheMiss { job_id, key } => format!(
            "{}{} cache miss {}",
            INFO,
            style(job_id).cyan(),
            style(key).dim()
        ),
        ExecutionEvent::CacheSaved { job_id, key } => format!(
            "{}{} saved cache {}",
            INFO,
            style(job_id).cyan(),
            style(key).dim()
        ),
        ExecutionEvent::CacheRejected {
            job_id,
            key,
            reason,
        } => format!(
            "{}{} did not save cache {}: {}",
            WARN,
            style(job_id).yellow(),
            style(key).dim(),
            reason
        ),
        ExecutionEvent::StepStarted {
            job_id,
            step_name,
            index,
            ..
        } => format!(
            "  {} [{}] {}",
            style(job_id).dim(),
            index + 1,
            style(step_name).bold()
        ),
        ExecutionEvent::StepOutput {
            job_id,
            step_name,
            line,
            ..
        } => format!("  {} {}", style(format!("{}/{} |", job_id, step_name)).dim(), line),
        ExecutionEvent::StepFinished {
            job_id,
            step_name,
            exit_code,
            duration,
        } => {
            let (icon, exit) = match exit_code {
                Some(0) => (CHECK, "exit 0".to_string()),
                Some(code) => (CROSS, format!("exit {}", code)),
                None => (CROSS, "no exit code".to_string()),
            };
            format!(
                "  {}{} {} ({}, {})",
                icon,
                style(job_id).dim(),
                step_name,
                exit,
                format_duration(*duration)
            )
        }
        ExecutionEvent::JobFinished {
            job_id,
            status,
            error,
            duration,
        } => {
            let mut line = format!(
                "{}{} {} ({})",
                job_icon(*status),
                style(job_id).bold(),
                format_job_status(*status),
                format_duration(*duration)
            );
            if let Some(error) = error {
                line.push_str(&format!(": {}", style(error).dim()));
            }
            line
        }
        ExecutionEvent::RunFinished {
            run_id,
            status,
            duration,
        } => format!(
            "{}Run {} {} in {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status),
            format_duration(*duration)
        ),
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        lines
            .iter()
            .map(|l| format!("  | {}", l))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        let truncated = lines[..max_lines]
            .iter()
            .map(|l| format!("  | {}", l))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
