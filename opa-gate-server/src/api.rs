//! Response types for the informational endpoints

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Probe status
    pub status: HealthStatus,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Process is running
    Alive,
    /// Process accepts traffic
    Ready,
}
