//! Rejection responses produced by the enforcement gate

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opa_gate_core::{PolicyEngineError, Verdict};
use thiserror::Error;

/// Body of every rejection
pub const UNAUTHORIZED_BODY: &str = "Unauthorized";

/// Why a request did not reach the downstream handler.
///
/// Both variants render identically on the wire; they differ in logs,
/// metrics and the `Verdict` attached to the response extensions.
#[derive(Error, Debug)]
pub enum GateRejection {
    /// The policy engine answered `allow = false`
    #[error("Denied by policy")]
    Denied,

    /// The policy engine could not be consulted
    #[error("Policy engine failure: {0}")]
    EngineFailure(#[from] PolicyEngineError),
}

impl GateRejection {
    /// Verdict recorded for this rejection
    pub fn verdict(&self) -> Verdict {
        match self {
            GateRejection::Denied => Verdict::Denied,
            GateRejection::EngineFailure(e) => Verdict::EngineFailure(e.kind()),
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let verdict = self.verdict();
        let mut response = (StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY).into_response();
        response.extensions_mut().insert(verdict);
        response
    }
}
