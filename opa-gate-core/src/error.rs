//! Error types for OPA Gate

use thiserror::Error;

/// Failure to obtain a verdict from the policy engine.
///
/// None of these is a denial. A policy engine that answered
/// `{"result": {"allow": false}}` produces `Ok(DecisionResult { allow: false })`,
/// never one of these variants.
#[derive(Error, Debug)]
pub enum PolicyEngineError {
    /// Connection refused, DNS failure, connection reset
    #[error("Policy engine unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    /// No response within the configured timeout
    #[error("Policy engine timed out after {0}ms")]
    Timeout(u64),

    /// The policy engine answered with a non-success status
    #[error("Policy engine returned HTTP {status}")]
    Protocol {
        /// HTTP status code returned by the engine
        status: u16,
    },

    /// Body is not JSON or lacks a boolean `result.allow`
    #[error("Malformed policy engine response: {0}")]
    MalformedResponse(String),
}

impl PolicyEngineError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyEngineError::Transport(_) => "transport",
            PolicyEngineError::Timeout(_) => "timeout",
            PolicyEngineError::Protocol { .. } => "protocol",
            PolicyEngineError::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Whether the engine could not be reached at all
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PolicyEngineError::Transport(_) | PolicyEngineError::Timeout(_)
        )
    }
}

/// Configuration errors, raised at startup only
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Policy engine URL cannot be parsed
    #[error("Invalid policy engine endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// The offending value
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// A setting has an unusable value
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for `GateConfig`
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for policy engine calls
pub type Result<T> = std::result::Result<T, PolicyEngineError>;
