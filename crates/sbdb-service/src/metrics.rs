//! Prometheus metrics for the classification service
//!
//! Privacy-safe metrics: only outcome labels, never URLs or prefixes.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_ERROR: &str = "error";
pub const OUTCOME_CANCELED: &str = "canceled";

pub const VERDICT_CLEAN: &str = "clean";
pub const VERDICT_LISTED: &str = "listed";

pub fn record_lookup(verdict: &str, duration: Duration) {
    counter!("sbdb_lookups_total", "verdict" => verdict.to_string()).increment(1);
    histogram!("sbdb_lookup_duration_seconds", "verdict" => verdict.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_lookup_error() {
    counter!("sbdb_lookup_errors_total").increment(1);
}

pub fn set_lookups_in_flight(count: usize) {
    gauge!("sbdb_lookups_in_flight").set(count as f64);
}

pub fn record_completion_request(outcome: &str) {
    counter!("sbdb_completion_requests_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_completion_failure() {
    counter!("sbdb_completion_failures_total").increment(1);
}

pub fn record_update(outcome: &str, duration: Duration) {
    counter!("sbdb_updates_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("sbdb_update_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_spoiled(tables: usize) {
    counter!("sbdb_tables_spoiled_total").increment(tables as u64);
}

pub fn set_active_tables(count: usize) {
    gauge!("sbdb_active_tables").set(count as f64);
}

pub fn init_prometheus_recorder(
) -> Result<metrics_exporter_prometheus::PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
}
