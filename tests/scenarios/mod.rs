//! Scenario-based tests for matrixci

mod cache_reuse;
mod continue_on_failure;
mod fail_fast;
mod template_error;
mod trigger_filtering;
