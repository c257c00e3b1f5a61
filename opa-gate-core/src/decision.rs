//! Policy engine verdicts

use crate::error::{PolicyEngineError, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Verdict returned by the policy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    /// Whether the request may proceed
    pub allow: bool,
}

impl DecisionResult {
    /// An allowing verdict
    pub fn allow() -> Self {
        DecisionResult { allow: true }
    }

    /// A denying verdict
    pub fn deny() -> Self {
        DecisionResult { allow: false }
    }
}

/// How to treat a well-formed response that has no `result.allow`.
///
/// OPA answers `{}` when the queried document is undefined, which is
/// the usual symptom of a package rename or a typo in the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingAllow {
    /// Report it as a malformed response
    #[default]
    Strict,
    /// Treat it as `allow = false`, with a warning and a metric
    Deny,
}

impl std::str::FromStr for MissingAllow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(MissingAllow::Strict),
            "deny" => Ok(MissingAllow::Deny),
            other => Err(format!("expected 'strict' or 'deny', got '{}'", other)),
        }
    }
}

/// Parse a policy engine response body into a verdict.
///
/// Only `{"result": {"allow": <bool>}}` yields a verdict on its own. Anything
/// that is not JSON, or where `result`/`allow` has the wrong type, is
/// malformed regardless of `mode`.
pub fn parse_decision(body: &[u8], mode: MissingAllow) -> Result<DecisionResult> {
    let doc: Value = serde_json::from_slice(body)
        .map_err(|e| PolicyEngineError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let root = doc.as_object().ok_or_else(|| {
        PolicyEngineError::MalformedResponse("response is not a JSON object".into())
    })?;

    let allow = match root.get("result") {
        None => None,
        Some(Value::Object(result)) => match result.get("allow") {
            None => None,
            Some(Value::Bool(allow)) => Some(*allow),
            Some(other) => {
                return Err(PolicyEngineError::MalformedResponse(format!(
                    "result.allow is not a boolean: {}",
                    other
                )))
            }
        },
        Some(other) => {
            return Err(PolicyEngineError::MalformedResponse(format!(
                "result is not an object: {}",
                other
            )))
        }
    };

    match (allow, mode) {
        (Some(allow), _) => Ok(DecisionResult { allow }),
        (None, MissingAllow::Strict) => Err(PolicyEngineError::MalformedResponse(
            "missing result.allow".into(),
        )),
        (None, MissingAllow::Deny) => {
            warn!("Policy engine response has no result.allow, treating as deny");
            counter!("opa_gate_missing_allow_total").increment(1);
            Ok(DecisionResult::deny())
        }
    }
}

/// Outcome of the gate for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Health path, no policy evaluation
    Bypassed,
    /// Policy engine allowed the request
    Allowed,
    /// Policy engine denied the request
    Denied,
    /// Policy engine could not produce a verdict; carries `PolicyEngineError::kind`
    EngineFailure(&'static str),
}

impl Verdict {
    /// Whether the downstream handler runs
    pub fn forwards(&self) -> bool {
        matches!(self, Verdict::Bypassed | Verdict::Allowed)
    }

    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Bypassed => "bypassed",
            Verdict::Allowed => "allowed",
            Verdict::Denied => "denied",
            Verdict::EngineFailure(_) => "engine_failure",
        }
    }
}

impl From<&Result<DecisionResult>> for Verdict {
    fn from(outcome: &Result<DecisionResult>) -> Self {
        match outcome {
            Ok(DecisionResult { allow: true }) => Verdict::Allowed,
            Ok(DecisionResult { allow: false }) => Verdict::Denied,
            Err(e) => Verdict::EngineFailure(e.kind()),
        }
    }
}
