//! Prometheus metrics for the gate

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opa_gate_core::Verdict;
use std::net::SocketAddr;

/// Initialize all metric descriptions
pub fn init_metrics() {
    describe_counter!(
        "opa_gate_requests_total",
        "Requests seen by the gate, by verdict"
    );
    describe_counter!(
        "opa_gate_policy_errors_total",
        "Policy engine failures, by kind"
    );
    describe_counter!(
        "opa_gate_missing_allow_total",
        "Policy engine responses without result.allow treated as deny"
    );

    describe_histogram!(
        "opa_gate_policy_latency_seconds",
        "Round trip to the policy engine, by outcome (ok or error kind)"
    );
    describe_histogram!(
        "opa_gate_decision_latency_seconds",
        "Time the gate spent deciding, including failures"
    );
}

/// Count one gated request
pub fn record_verdict(verdict: Verdict) {
    counter!("opa_gate_requests_total", "verdict" => verdict.as_str()).increment(1);
}

/// Count one policy engine failure
pub fn record_engine_error(kind: &'static str) {
    counter!("opa_gate_policy_errors_total", "kind" => kind).increment(1);
}

/// Record time spent deciding
pub fn record_gate_latency(latency_seconds: f64) {
    histogram!("opa_gate_decision_latency_seconds").record(latency_seconds);
}

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// The exporter gets its own socket so that scrapes never pass through the
/// gate. Inside a tokio runtime the listener is spawned onto it, otherwise
/// the exporter starts a runtime thread of its own.
pub fn init_prometheus(listen: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    Ok(())
}
