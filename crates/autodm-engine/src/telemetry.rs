// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any installed recorder (Prometheus in the
//! `autodm` binary) can collect these counters. Without a recorder the calls
//! are no-ops.

use metrics::describe_counter;

/// Register all pipeline metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("autodm_comments_total", "Inbound comments processed");
    describe_counter!(
        "autodm_rule_outcomes_total",
        "Per-rule evaluation outcomes, by status"
    );
    describe_counter!(
        "autodm_dm_dispatch_total",
        "Outbound DM attempts, by result"
    );
    describe_counter!(
        "autodm_jobs_total",
        "Deferred jobs executed, by kind and result"
    );
}

/// Record a processed comment.
pub fn record_comment(outcome: &'static str) {
    metrics::counter!("autodm_comments_total", "outcome" => outcome).increment(1);
}

/// Record the outcome of one rule evaluation.
pub fn record_rule_outcome(status: &str) {
    metrics::counter!("autodm_rule_outcomes_total", "status" => status.to_string()).increment(1);
}

/// Record an outbound DM attempt. `result` is `ok` or the dispatch error kind.
pub fn record_dispatch(result: &str) {
    metrics::counter!("autodm_dm_dispatch_total", "result" => result.to_string()).increment(1);
}

/// Record a finished job execution.
pub fn record_job(kind: &str, result: &'static str) {
    metrics::counter!("autodm_jobs_total", "kind" => kind.to_string(), "result" => result)
        .increment(1);
}
