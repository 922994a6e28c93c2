//! Test: only matching events start a run

use crate::helpers::*;
use matrixci::core::{Event, Workflow};
use matrixci::execution::{ExecutionEvent, RunOptions};

const RELEASES: &str = r#"
name: "Test: Trigger Filtering"
on:
  push:
    branches: [main, "release/*"]
  pull_request:
    branches: [main]
steps:
  - name: test
    run: cargo test
"#;

#[tokio::test]
async fn test_unmatched_push_runs_nothing() {
    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);
    let events = record_events(&engine);
    let workflow = Workflow::from_yaml(RELEASES).unwrap();

    let report = engine
        .execute(&workflow, &Event::push("feature/cache", "abc123"), RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_none());
    assert!(runner.calls().is_empty());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ExecutionEvent::RunSkipped { .. }));
}

#[tokio::test]
async fn test_glob_matches_one_segment() {
    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);
    let workflow = Workflow::from_yaml(RELEASES).unwrap();

    let report = engine
        .execute(&workflow, &Event::push("release/1.2", "def456"), RunOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.revision, "def456");
    assert!(report.passed());

    let nested = engine
        .execute(
            &workflow,
            &Event::push("release/1.2/hotfix", "def456"),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert!(nested.is_none());
}

/// Pull requests are filtered on the branch they merge into
#[tokio::test]
async fn test_pull_request_matches_target_branch() {
    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);
    let workflow = Workflow::from_yaml(RELEASES).unwrap();

    let into_main = engine
        .execute(
            &workflow,
            &Event::pull_request("feature/cache", "main", "fff000"),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(into_main.unwrap().revision, "fff000");

    let into_release = engine
        .execute(
            &workflow,
            &Event::pull_request("main", "release/1.2", "fff000"),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert!(into_release.is_none());
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn test_missing_triggers_match_everything() {
    let yaml = r#"
name: "Test: Default Triggers"
steps:
  - name: test
    run: cargo test
"#;
    let runner = ScriptedRunner::new();
    let engine = scratch_engine(&runner);
    let workflow = Workflow::from_yaml(yaml).unwrap();

    for event in [
        Event::push("anything/at/all", "1"),
        Event::pull_request("a", "b", "2"),
    ] {
        let report = engine
            .execute(&workflow, &event, RunOptions::default())
            .await
            .unwrap();
        assert!(report.is_some());
    }
    assert_eq!(runner.calls().len(), 2);
}
