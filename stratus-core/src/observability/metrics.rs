//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use crate::types::{RegionId, StackStatus};
use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Child lifecycle metrics
    describe_counter!(
        "stratus_child_create_total",
        "Total number of remote create calls accepted (by region)"
    );
    describe_counter!(
        "stratus_child_terminal_total",
        "Total number of child stacks reaching a terminal status (by region, status)"
    );
    describe_counter!(
        "stratus_child_failures_total",
        "Total number of child stacks reaching a failed status (by region)"
    );

    // Monitor metrics
    describe_counter!(
        "stratus_poll_errors_total",
        "Total number of transient status read failures (by region)"
    );
    describe_counter!(
        "stratus_monitor_timeouts_total",
        "Total number of child monitors that hit their deadline (by region)"
    );

    // Parent metrics
    describe_histogram!(
        "stratus_parent_wait_duration_seconds",
        "Time spent waiting for a parent create or delete to settle (by operation)"
    );
}

pub fn record_child_created(region: &RegionId) {
    counter!("stratus_child_create_total", "region" => region.to_string()).increment(1);
}

pub fn record_child_terminal(region: &RegionId, status: StackStatus) {
    counter!(
        "stratus_child_terminal_total",
        "region" => region.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
    if status.is_failed() {
        counter!("stratus_child_failures_total", "region" => region.to_string()).increment(1);
    }
}

pub fn record_poll_error(region: &RegionId) {
    counter!("stratus_poll_errors_total", "region" => region.to_string()).increment(1);
}

pub fn record_monitor_timeout(region: &RegionId) {
    counter!("stratus_monitor_timeouts_total", "region" => region.to_string()).increment(1);
}

pub fn record_parent_wait(operation: &'static str, duration_secs: f64) {
    histogram!("stratus_parent_wait_duration_seconds", "operation" => operation)
        .record(duration_secs);
}
