//! CLI command definitions

use crate::cache::DEFAULT_BUDGET_BYTES;
use crate::core::{Event, EventKind};
use crate::execution::RunOptions;
use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// Run a workflow for a repository event
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Kind of event to simulate
    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    /// Pushed branch, or the target branch of a pull request
    #[arg(short, long, default_value = "main")]
    pub branch: String,

    /// Source branch of a pull request (defaults to --branch)
    #[arg(long)]
    pub source_branch: Option<String>,

    /// Revision to build
    #[arg(short, long, default_value = "HEAD")]
    pub revision: String,

    /// Local repository cloned into each job's working tree
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Give each job an empty directory instead of a checkout
    #[arg(long)]
    pub no_checkout: bool,

    /// Create job working trees here instead of the system temp dir
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Maximum number of jobs running at once
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Cancel remaining jobs after the first failure
    #[arg(long, conflicts_with = "no_fail_fast")]
    pub fail_fast: bool,

    /// Keep running remaining jobs after a failure
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Extra environment for every step (KEY=VALUE)
    #[arg(short, long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Cache size budget in MiB
    #[arg(long)]
    pub cache_budget_mb: Option<u64>,

    /// Ignore the workflow's cache declaration
    #[arg(long)]
    pub no_cache: bool,

    /// Write each step's output under this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Print step output as it arrives
    #[arg(short, long)]
    pub stream: bool,
}

impl RunCommand {
    /// Event described by the flags
    pub fn to_event(&self) -> Event {
        match self.event {
            EventArg::Push => Event::push(&self.branch, &self.revision),
            EventArg::PullRequest => Event::pull_request(
                self.source_branch.as_deref().unwrap_or(&self.branch),
                &self.branch,
                &self.revision,
            ),
        }
    }

    /// Strategy overrides; unset flags defer to the workflow
    pub fn run_options(&self) -> RunOptions {
        let fail_fast = if self.fail_fast {
            Some(true)
        } else if self.no_fail_fast {
            Some(false)
        } else {
            None
        };
        RunOptions {
            fail_fast,
            max_parallel: self.max_parallel,
        }
    }

    pub fn cache_budget_bytes(&self) -> u64 {
        self.cache_budget_mb
            .map(|mb| mb.saturating_mul(1024 * 1024))
            .unwrap_or(DEFAULT_BUDGET_BYTES)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List workflows with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Maximum number of runs to show
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Show one run in detail
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List cache entries
#[derive(Debug, Args, Clone)]
pub struct CacheCommand {
    /// Cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl CacheCommand {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Event kind for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventArg {
    Push,
    PullRequest,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
        }
    }
}

/// Default cache location under the user's cache dir
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("matrixci")
}

/// Parse a single key-value pair
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}
