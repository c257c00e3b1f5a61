//! Router assembly

use crate::gate::{self, EnforcementGate};
use crate::handlers;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application with the gate in front of every route.
///
/// Health routes sit behind the gate too and are let through by path, so
/// there is a single interception point for all traffic, unrouted paths
/// included.
pub fn build_router(enforcement: Arc<EnforcementGate>) -> Router {
    Router::new()
        // Health checks
        .route("/health/liveness", get(handlers::liveness))
        .route("/health/readiness", get(handlers::readiness))
        // Protected endpoints
        .route(
            "/v1/admin/users/:user_name",
            get(handlers::get_user).post(handlers::update_user),
        )
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(enforcement, gate::enforce))
        .layer(TraceLayer::new_for_http())
}
