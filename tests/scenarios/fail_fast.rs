//! Test: fail-fast cancels the rest of the matrix, and its absence does not

use crate::helpers::*;
use matrixci::core::{JobStatus, PipelineStatus};
use matrixci::execution::{ExecutionEvent, RunOptions};

const TOOLCHAINS: &str = r#"
name: "Test: Fail Fast"
strategy:
  fail-fast: true
  max-parallel: 1
  matrix:
    toolchain: [stable, beta, nightly]
steps:
  - name: build
    run: cargo +${{ matrix.toolchain }} build
  - name: test
    run: cargo +${{ matrix.toolchain }} test
"#;

/// A failure in the second job cancels the third before it starts
#[tokio::test]
async fn test_fail_fast_cancels_queued_jobs() {
    let runner = ScriptedRunner::new().fail_on("+beta test", 101);
    let engine = scratch_engine(&runner);

    let report = run_yaml(&engine, TOOLCHAINS, RunOptions::default()).await;
    let result = &report.result;

    assert_eq!(result.overall_status, PipelineStatus::Failed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(result.outcome("stable").unwrap().status, JobStatus::Passed);
    assert_eq!(result.outcome("beta").unwrap().status, JobStatus::Failed);

    let nightly = result.outcome("nightly").unwrap();
    assert_eq!(nightly.status, JobStatus::Cancelled);
    assert!(nightly.steps.is_empty());
    assert!(runner.calls_for("nightly").is_empty());

    // Cancelled jobs are not blamed
    let failure = report.first_failure().unwrap();
    assert_eq!(failure.job_id, "beta");
    assert_eq!(failure.step_name.as_deref(), Some("test"));
    assert_eq!(failure.exit_code, Some(101));
    assert_eq!(
        failure.output_tail,
        vec!["$ cargo +beta test", "error: exit 101"]
    );
}

/// Without fail-fast every job runs to completion
#[tokio::test]
async fn test_without_fail_fast_all_jobs_run() {
    let runner = ScriptedRunner::new().fail_on("+beta test", 101);
    let engine = scratch_engine(&runner);

    let report = run_yaml(
        &engine,
        TOOLCHAINS,
        RunOptions {
            fail_fast: Some(false),
            max_parallel: None,
        },
    )
    .await;
    let result = &report.result;

    assert_eq!(result.overall_status, PipelineStatus::Failed);
    assert_eq!(result.count(JobStatus::Passed), 2);
    assert_eq!(result.count(JobStatus::Failed), 1);
    assert_eq!(result.count(JobStatus::Cancelled), 0);
    assert_eq!(runner.calls_for("nightly"), vec!["build", "test"]);
}

/// Every job gets exactly one JobFinished event, cancelled ones included
#[tokio::test]
async fn test_every_job_reported_once() {
    let runner = ScriptedRunner::new().fail_on("+stable build", 1);
    let engine = scratch_engine(&runner);
    let events = record_events(&engine);

    let report = run_yaml(&engine, TOOLCHAINS, RunOptions::default()).await;

    let ids: Vec<&str> = report
        .result
        .job_outcomes
        .iter()
        .map(|o| o.job_id.as_str())
        .collect();
    assert_eq!(ids, vec!["beta", "nightly", "stable"]);
    assert_eq!(report.result.count(JobStatus::Cancelled), 2);

    let mut finished: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::JobFinished { job_id, .. } => Some(job_id.clone()),
            _ => None,
        })
        .collect();
    finished.sort();
    assert_eq!(finished, vec!["beta", "nightly", "stable"]);
}
