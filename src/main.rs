use anyhow::{Context, Result};
use matrixci::cache::{CacheBroker, FsBlobStore};
use matrixci::cli::commands::{
    CacheCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand,
};
use matrixci::cli::output::*;
use matrixci::cli::terminal_output::TerminalReporter;
use matrixci::cli::{Cli, Command};
use matrixci::core::Workflow;
use matrixci::execution::{ExecutionEngine, GitCheckout, ScratchWorkspace, WorkspaceProvider};
use matrixci::persistence::{create_summary, ExecutionSummary, PersistenceBackend};
use matrixci::runner::ShellRunner;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_directive = if cli.verbose { "matrixci=debug" } else { "matrixci=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::List(cmd) => list_workflows(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Cache(cmd) => list_cache(cmd).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// History backend: SQLite when compiled in, otherwise in-memory
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = matrixci::persistence::SqliteExecutionStore::with_default_path()
            .await
            .context("Failed to open run history")?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(matrixci::persistence::InMemoryPersistence::new()))
    }
}

async fn run_workflow(cmd: &RunCommand) -> Result<i32> {
    let mut workflow = Workflow::from_file(&cmd.file)
        .with_context(|| format!("Failed to load workflow {}", cmd.file.display()))?;
    workflow.env.extend(cmd.env.iter().cloned());

    if !cmd.json {
        println!("{}Loaded workflow: {}", INFO, style(&workflow.name).bold());
    }

    let workspaces: Arc<dyn WorkspaceProvider> = match (cmd.no_checkout, &cmd.work_dir) {
        (true, None) => Arc::new(ScratchWorkspace::new()),
        (true, Some(dir)) => Arc::new(ScratchWorkspace::in_dir(dir)),
        (false, None) => Arc::new(GitCheckout::new(&cmd.repo)),
        (false, Some(dir)) => Arc::new(GitCheckout::new(&cmd.repo).with_base(dir)),
    };

    let mut engine = ExecutionEngine::new(ShellRunner::new(&workflow.shell), workspaces);

    if workflow.cache.is_some() && !cmd.no_cache {
        let dir = cmd.cache_dir();
        debug!("Using cache at {}", dir.display());
        let store = FsBlobStore::open(&dir)
            .await
            .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
        let broker = CacheBroker::open(Arc::new(store), cmd.cache_budget_bytes())
            .await
            .context("Failed to index cache")?;
        engine = engine.with_cache(Arc::new(broker));
    }

    if !cmd.json {
        let reporter = Arc::new(TerminalReporter::new(cmd.stream));
        engine.add_event_handler(move |event| reporter.on_event(&event));
    }

    let event = cmd.to_event();
    let report = engine
        .execute(&workflow, &event, cmd.run_options())
        .await
        .context("Run aborted")?;

    let Some(report) = report else {
        if cmd.json {
            let data = serde_json::json!({ "skipped": true, "event": event });
            println!("{}", serde_json::to_string_pretty(&data)?);
        } else {
            println!(
                "{}Nothing to run: no trigger matches {} to {}",
                INFO,
                event.kind,
                style(&event.target_branch).cyan()
            );
        }
        return Ok(0);
    };

    if let Some(dir) = &cmd.log_dir {
        let run_dir = report
            .write_logs(dir)
            .await
            .context("Failed to write step logs")?;
        if !cmd.json {
            println!("{}Step logs written to {}", INFO, style(run_dir.display()).dim());
        }
    }

    if !cmd.no_history {
        let summary = create_summary(&report);
        match open_history().await {
            Ok(store) => match store.save_run(&summary).await {
                Ok(()) => debug!("Saved run {} to history", summary.run_id),
                Err(e) => warn!("Failed to save run to history: {:#}", e),
            },
            Err(e) => warn!("{:#}", e),
        }
    }

    if cmd.json {
        let data = serde_json::json!({
            "report": &report,
            "first_failure": report.first_failure(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{}", format_run_report(&report));
        if let Some(failure) = report.first_failure() {
            println!("\n{}", format_failure(&failure));
        }
    }

    Ok(report.exit_code())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<i32> {
    // Render every step of every job so template errors surface here
    let jobs = Workflow::from_file(&cmd.file).and_then(|w| {
        let jobs = w.expand()?;
        for job in &jobs {
            for step in &job.steps {
                step.render(&job.variables)?;
            }
        }
        Ok((w, jobs))
    });

    let (workflow, jobs) = match jobs {
        Ok(loaded) => loaded,
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": e.to_string() });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{}Validation failed:", CROSS);
                println!("  {}", style(e).red());
            }
            return Ok(1);
        }
    };

    let job_ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    if cmd.json {
        let data = serde_json::json!({
            "valid": true,
            "name": workflow.name,
            "jobs": job_ids,
            "steps": workflow.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "cache": workflow.cache.is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    println!("{}Workflow is valid!", CHECK);
    println!("  Name: {}", style(&workflow.name).bold());
    println!("  Triggers: {}", style(workflow.triggers.len()).cyan());
    println!("  Steps: {}", style(workflow.steps.len()).cyan());
    println!("  Jobs ({}):", style(job_ids.len()).cyan());
    for id in job_ids {
        println!("    {}", id);
    }
    Ok(0)
}

async fn list_workflows(cmd: &ListCommand) -> Result<i32> {
    let store = open_history().await?;
    let workflows = store.list_workflows().await?;

    if cmd.json {
        let data: Vec<_> = workflows
            .iter()
            .map(|(name, runs)| serde_json::json!({ "name": name, "runs": runs }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "workflows": data }))?
        );
        return Ok(0);
    }

    if workflows.is_empty() {
        println!("{}No workflows found in history", INFO);
        return Ok(0);
    }

    println!("{}Workflows in history:", INFO);
    for (name, runs) in &workflows {
        println!("  {} ({} runs)", style(name).bold(), style(runs).cyan());
    }
    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    // If a specific run is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Some(summary) => print_run_details(&summary),
            None => {
                println!("{}Run not found", WARN);
                return Ok(1);
            }
        }
        return Ok(0);
    }

    let runs: Vec<ExecutionSummary> = store
        .list_runs(cmd.workflow.as_deref())
        .await?
        .into_iter()
        .take(cmd.limit)
        .collect();

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{}No runs found", INFO);
        return Ok(0);
    }

    println!("{}Run history (showing latest {}):", INFO, runs.len());
    for summary in &runs {
        println!("  {}", format_execution_summary(summary));
    }
    Ok(0)
}

fn print_run_details(summary: &ExecutionSummary) {
    println!("{}Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow_name).bold());
    println!("  Revision: {}", style(&summary.revision).dim());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Completed: {}", style(summary.completed_at.to_rfc3339()).dim());
    if let Ok(duration) = summary
        .completed_at
        .signed_duration_since(summary.started_at)
        .to_std()
    {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!(
        "  Jobs: {} total, {} passed, {} failed, {} cancelled",
        summary.total_jobs,
        style(summary.passed_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.cancelled_jobs).yellow()
    );
}

async fn list_cache(cmd: &CacheCommand) -> Result<i32> {
    let dir = cmd.cache_dir();
    let store = FsBlobStore::open(&dir)
        .await
        .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;

    // No budget here: listing must never evict
    let broker = CacheBroker::open(Arc::new(store), u64::MAX).await?;
    let entries = broker.entries().await;

    if cmd.json {
        let data = serde_json::json!({ "dir": dir, "entries": entries });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if entries.is_empty() {
        println!("{}Cache at {} is empty", INFO, style(dir.display()).dim());
        return Ok(0);
    }

    println!(
        "{}{} cache entries in {} ({})",
        INFO,
        entries.len(),
        style(dir.display()).dim(),
        format_bytes(broker.total_bytes().await)
    );
    for entry in &entries {
        println!("{}", format_cache_entry(entry));
    }
    Ok(0)
}
