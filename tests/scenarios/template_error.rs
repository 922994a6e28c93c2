//! Test: a bad command template fails its job without running anything

use crate::helpers::*;
use matrixci::core::{JobStatus, PipelineStatus, Workflow};
use matrixci::execution::RunOptions;

#[tokio::test]
async fn test_undefined_variable_fails_job_before_any_step() {
    let yaml = r#"
name: "Test: Template Error"
strategy:
  matrix:
    toolchain: [stable, nightly]
steps:
  - name: build
    run: cargo +${{ matrix.toolchain }} build
  - name: test
    run: cargo test --target ${{ matrix.target }}
"#;

    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);

    let report = run_yaml(&engine, yaml, RunOptions::default()).await;

    // `build` renders fine but must not run either
    assert!(runner.calls().is_empty());
    assert_eq!(report.result.overall_status, PipelineStatus::Failed);
    assert_eq!(report.result.count(JobStatus::Failed), 2);

    let failure = report.first_failure().unwrap();
    assert_eq!(failure.job_id, "nightly");
    assert_eq!(failure.step_name, None);
    assert!(failure.error.as_deref().unwrap().contains("`target`"));
}

/// Expressions outside the matrix namespace are never passed to the shell
#[tokio::test]
async fn test_unknown_expression_fails_job() {
    let yaml = r#"
name: "Test: Unknown Expression"
steps:
  - name: publish
    run: cargo publish --tag ${{ github.ref }}
"#;

    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);

    let report = run_yaml(&engine, yaml, RunOptions::default()).await;

    assert!(runner.calls().is_empty());
    assert_eq!(report.result.overall_status, PipelineStatus::Failed);
    let failure = report.first_failure().unwrap();
    assert!(failure.error.as_deref().unwrap().contains("`github.ref`"));
}

#[test]
fn test_empty_axis_is_configuration_error() {
    let yaml = r#"
name: "Test: Empty Axis"
strategy:
  matrix:
    toolchain: []
steps:
  - name: build
    run: cargo build
"#;

    let err = Workflow::from_yaml(yaml).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("strategy.matrix.toolchain"));
}
