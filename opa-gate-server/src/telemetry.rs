//! Logging and OpenTelemetry setup, plus the per-request gate span

use opa_gate_core::{GateConfig, Verdict};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use std::time::Duration;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info,opa_gate=debug"
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(debug)))
}

/// Console-only logging
pub fn init_console(debug: bool) -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Build the OTLP trace pipeline described by `config`
pub fn init_telemetry(config: &GateConfig) -> anyhow::Result<opentelemetry_sdk::trace::Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .with_timeout(OTLP_EXPORT_TIMEOUT);

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.app_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("opa_gate.policy_endpoint", config.policy_engine_url.clone()),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config()
                .with_sampler(sampler_for_ratio(config.trace_sample_ratio))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

fn sampler_for_ratio(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Console logging, plus OTLP export when `config.otel_enabled`
pub fn init_tracing_stack(config: &GateConfig) -> anyhow::Result<()> {
    if !config.otel_enabled {
        return init_console(config.debug);
    }

    let tracer = init_telemetry(config)?;
    Registry::default()
        .with(env_filter(config.debug))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;

    Ok(())
}

/// Flush and stop the OpenTelemetry provider
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Span covering one gate decision
pub fn gate_span(method: &str, path: &str) -> Span {
    tracing::info_span!(
        "policy_gate",
        method = %method,
        path = %path,
        otel.kind = "server",
        verdict = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        otel.status_code = tracing::field::Empty,
    )
}

/// Record the verdict on a gate span
pub fn record_verdict(span: &Span, verdict: Verdict, latency_ms: f64) {
    span.record("verdict", verdict.as_str());
    span.record("latency_ms", latency_ms);
    let status = match verdict {
        Verdict::EngineFailure(_) => "ERROR",
        _ => "OK",
    };
    span.record("otel.status_code", status);
}
