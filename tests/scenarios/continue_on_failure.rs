//! Test: step failure handling within a single job

use crate::helpers::*;
use matrixci::core::{JobStatus, PipelineStatus, DEFAULT_JOB_ID};
use matrixci::execution::RunOptions;

/// A tolerated failure keeps the job going but still fails it
#[tokio::test]
async fn test_continue_on_failure_runs_later_steps() {
    let yaml = r#"
name: "Test: Continue On Failure"
steps:
  - name: lint
    run: cargo clippy -- -D warnings
    continue-on-error: true
  - name: test
    run: cargo test
"#;

    let runner = ScriptedRunner::new().fail_on("clippy", 1);
    let engine = scratch_engine(&runner);

    let report = run_yaml(&engine, yaml, RunOptions::default()).await;
    let job = report.result.outcome(DEFAULT_JOB_ID).unwrap();

    assert_eq!(runner.calls_for(DEFAULT_JOB_ID), vec!["lint", "test"]);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.steps.len(), 2);
    assert_eq!(job.steps[0].exit_code, Some(1));
    assert_eq!(job.steps[1].exit_code, Some(0));
    assert_eq!(report.result.overall_status, PipelineStatus::Failed);

    let failure = report.first_failure().unwrap();
    assert_eq!(failure.step_name.as_deref(), Some("lint"));
}

/// An ordinary failure stops the job at that step
#[tokio::test]
async fn test_failure_stops_remaining_steps() {
    let yaml = r#"
name: "Test: Stop On Failure"
steps:
  - name: build
    run: cargo build
  - name: test
    run: cargo test
  - name: package
    run: cargo package
"#;

    let runner = ScriptedRunner::new().fail_on("cargo test", 101);
    let engine = scratch_engine(&runner);

    let report = run_yaml(&engine, yaml, RunOptions::default()).await;
    let job = report.result.outcome(DEFAULT_JOB_ID).unwrap();

    assert_eq!(runner.calls_for(DEFAULT_JOB_ID), vec!["build", "test"]);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.steps.len(), 2);
    assert!(job.error.as_deref().unwrap().contains("test"));
}

/// Matrix variables reach the step environment
#[tokio::test]
async fn test_step_sees_rendered_command() {
    let yaml = r#"
name: "Test: Rendering"
strategy:
  matrix:
    os: [linux, macos]
    features: [default, all]
steps:
  - name: test
    run: cargo test --target-os ${{ matrix.os }} --features ${{matrix.features}}
"#;

    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);

    let report = run_yaml(&engine, yaml, RunOptions::default()).await;
    assert!(report.passed());
    assert_eq!(report.result.job_outcomes.len(), 4);

    let mut commands: Vec<String> = runner.calls().into_iter().map(|c| c.command).collect();
    commands.sort();
    assert_eq!(
        commands,
        vec![
            "cargo test --target-os linux --features all",
            "cargo test --target-os linux --features default",
            "cargo test --target-os macos --features all",
            "cargo test --target-os macos --features default",
        ]
    );
}
