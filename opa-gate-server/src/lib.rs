//! OPA Gate HTTP Server - policy enforcement in front of an HTTP service
//!
//! Every inbound request except health checks is authorized by a remote
//! policy decision point before it reaches the application handlers.

pub mod api;
pub mod app;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod telemetry;

pub use api::{HealthResponse, HealthStatus};
pub use app::build_router;
pub use error::GateRejection;
pub use gate::{enforce, is_bypassed, EnforcementGate};
