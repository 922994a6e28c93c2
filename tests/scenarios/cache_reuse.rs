//! Test: cache entries saved by one run are restored by the next

use crate::helpers::*;
use matrixci::cache::{CacheKey, DEFAULT_BUDGET_BYTES};
use matrixci::core::{CacheStatus, CiError, JobStatus};
use matrixci::execution::{ExecutionEvent, RunOptions};

const CACHED: &str = r#"
name: "Test: Cache Reuse"
strategy:
  matrix:
    toolchain: [stable, nightly]
cache:
  key: cargo
  paths: [target]
  fingerprint: [Cargo.lock]
steps:
  - name: build
    run: cargo +${{ matrix.toolchain }} build
"#;

fn builder() -> ScriptedRunner {
    ScriptedRunner::new()
        .write_on("build", "target/debug/app")
        .probe("target/debug/app")
}

fn saved_key(status: &CacheStatus) -> String {
    match status {
        CacheStatus::Saved { key } => key.clone(),
        other => panic!("expected a saved entry, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_run_restores_first_runs_cache() {
    let broker = memory_cache(DEFAULT_BUDGET_BYTES).await;

    // First run: cold cache, every job saves its own entry
    let first = builder();
    let engine = scratch_engine(&first).with_cache(broker.clone());
    let report = run_yaml(&engine, CACHED, RunOptions::default()).await;

    assert!(report.passed());
    assert!(first.calls().iter().all(|c| !c.probe_found));
    let stable_key = saved_key(&report.result.outcome("stable").unwrap().cache);
    let nightly_key = saved_key(&report.result.outcome("nightly").unwrap().cache);
    assert_ne!(stable_key, nightly_key);
    assert_eq!(broker.entries().await.len(), 2);

    // Second run: same variables and fingerprint, so the same keys
    let second = builder();
    let engine = scratch_engine(&second).with_cache(broker.clone());
    let events = record_events(&engine);
    let report = run_yaml(&engine, CACHED, RunOptions::default()).await;

    assert!(report.passed());
    assert!(second.calls().iter().all(|c| c.probe_found));
    assert_eq!(
        report.result.outcome("stable").unwrap().cache,
        CacheStatus::Restored { key: stable_key }
    );

    let hits = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::CacheHit { .. }))
        .count();
    assert_eq!(hits, 2);
    assert_eq!(broker.entries().await.len(), 2);
}

#[tokio::test]
async fn test_failed_job_saves_nothing() {
    let broker = memory_cache(DEFAULT_BUDGET_BYTES).await;
    let runner = builder().fail_on("+nightly build", 1);
    let engine = scratch_engine(&runner).with_cache(broker.clone());

    let report = run_yaml(&engine, CACHED, RunOptions::default()).await;

    let nightly = report.result.outcome("nightly").unwrap();
    assert_eq!(nightly.status, JobStatus::Failed);
    assert!(matches!(nightly.cache, CacheStatus::Missed { .. }));

    let entries = broker.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].key.as_str(),
        saved_key(&report.result.outcome("stable").unwrap().cache)
    );
}

#[tokio::test]
async fn test_conflicting_content_is_refused() {
    let broker = memory_cache(DEFAULT_BUDGET_BYTES).await;
    let runner = builder();
    let engine = scratch_engine(&runner).with_cache(broker.clone());

    let report = run_yaml(&engine, CACHED, RunOptions::default()).await;
    let key = CacheKey::from_raw(saved_key(&report.result.outcome("stable").unwrap().cache));
    let stored = broker.get(&key).await.unwrap();

    let err = broker.put(&key, b"something else entirely").await.unwrap_err();
    assert!(matches!(err, CiError::CacheCorruption { .. }));

    // The original entry is untouched and still restores
    assert_eq!(broker.get(&key).await.unwrap(), stored);
    let again = builder();
    let engine = scratch_engine(&again).with_cache(broker.clone());
    let report = run_yaml(&engine, CACHED, RunOptions::default()).await;
    assert!(matches!(
        report.result.outcome("stable").unwrap().cache,
        CacheStatus::Restored { .. }
    ));
}

#[tokio::test]
async fn test_different_prefix_does_not_share_entries() {
    let broker = memory_cache(DEFAULT_BUDGET_BYTES).await;
    let runner = builder();

    let engine = scratch_engine(&runner).with_cache(broker.clone());
    run_yaml(&engine, CACHED, RunOptions::default()).await;

    let renamed = CACHED.replace("key: cargo", "key: docs");
    let other = builder();
    let engine = scratch_engine(&other).with_cache(broker.clone());
    let report = run_yaml(&engine, &renamed, RunOptions::default()).await;

    assert!(other.calls().iter().all(|c| !c.probe_found));
    assert!(saved_key(&report.result.outcome("stable").unwrap().cache).starts_with("docs-"));
    assert_eq!(broker.entries().await.len(), 4);
}
