//! Gate configuration
//!
//! Loaded once at startup: defaults, then an optional TOML file named by
//! `OPA_GATE_CONFIG`, then environment variables. Immutable afterwards.

use crate::client::{parse_endpoint, PolicyClientConfig};
use crate::decision::MissingAllow;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "OPA_GATE_CONFIG";

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Policy decision endpoint
    pub policy_engine_url: String,
    /// Application name, used as the telemetry service name
    pub app_name: String,
    /// Verbose logging
    pub debug: bool,
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Timeout for one policy evaluation call
    pub policy_timeout_ms: u64,
    /// Handling of responses without `result.allow`
    pub missing_allow: MissingAllow,
    /// Separate listener for the Prometheus exporter
    pub metrics_address: Option<String>,
    /// Header carrying the comma-separated role claim
    pub role_header: String,
    /// Export traces over OTLP in addition to console logging
    pub otel_enabled: bool,
    /// OTLP gRPC collector endpoint
    pub otlp_endpoint: String,
    /// Fraction of traces sampled, `0.0..=1.0`
    pub trace_sample_ratio: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            policy_engine_url: "http://localhost:8181/v1/data/sample".to_string(),
            app_name: "OPA Gate".to_string(),
            debug: false,
            host: "0.0.0.0".to_string(),
            port: 8000,
            policy_timeout_ms: 2000,
            missing_allow: MissingAllow::Strict,
            metrics_address: None,
            role_header: "USER_ROLES".to_string(),
            otel_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            trace_sample_ratio: 1.0,
        }
    }
}

impl GateConfig {
    /// Load from the process environment, including `OPA_GATE_CONFIG`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match lookup(CONFIG_FILE_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        let config = base.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file; unspecified keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Override fields from environment-style variables
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPA_SERVER_URL") {
            self.policy_engine_url = v;
        }
        if let Some(v) = lookup("APP_NAME") {
            self.app_name = v;
        }
        if let Some(v) = lookup("DEBUG") {
            self.debug = parse_bool("DEBUG", &v)?;
        }
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                reason: format!("'{}' is not a port number", v),
            })?;
        }
        if let Some(v) = lookup("POLICY_TIMEOUT_MS") {
            self.policy_timeout_ms = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "POLICY_TIMEOUT_MS",
                reason: format!("'{}' is not a number of milliseconds", v),
            })?;
        }
        if let Some(v) = lookup("MISSING_ALLOW") {
            self.missing_allow = v.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "MISSING_ALLOW",
                reason,
            })?;
        }
        if let Some(v) = lookup("METRICS_ADDRESS") {
            self.metrics_address = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("ROLE_HEADER") {
            self.role_header = v;
        }
        if let Some(v) = lookup("OTEL_ENABLED") {
            self.otel_enabled = parse_bool("OTEL_ENABLED", &v)?;
        }
        if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.otlp_endpoint = v;
        }
        if let Some(v) = lookup("OTEL_TRACES_SAMPLER_ARG") {
            self.trace_sample_ratio = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "OTEL_TRACES_SAMPLER_ARG",
                reason: format!("'{}' is not a ratio", v),
            })?;
        }
        Ok(self)
    }

    /// Reject settings the gate cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_endpoint(&self.policy_engine_url)?;

        if self.policy_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLICY_TIMEOUT_MS",
                reason: "must be greater than zero".into(),
            });
        }
        if self.role_header.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ROLE_HEADER",
                reason: "must not be empty".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.trace_sample_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "OTEL_TRACES_SAMPLER_ARG",
                reason: format!("{} is outside 0.0..=1.0", self.trace_sample_ratio),
            });
        }
        if let Some(addr) = &self.metrics_address {
            addr.parse::<SocketAddr>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "METRICS_ADDRESS",
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Listen address for the HTTP server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the policy client
    pub fn policy_client(&self) -> PolicyClientConfig {
        PolicyClientConfig {
            endpoint: self.policy_engine_url.clone(),
            timeout: Duration::from_millis(self.policy_timeout_ms),
            missing_allow: self.missing_allow,
        }
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            reason: format!("'{}' is not a boolean", raw),
        }),
    }
}
