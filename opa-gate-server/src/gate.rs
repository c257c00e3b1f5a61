//! Enforcement gate
//!
//! Every request except health checks is turned into a [`DecisionQuery`],
//! evaluated by the injected [`PolicyEvaluator`], and either forwarded
//! untouched or rejected with `401 Unauthorized`. The gate is fail-closed:
//! denials and engine failures both reject, but they are logged and counted
//! under different labels.
//!
//! The policy call is awaited inside the request future. When the client
//! disconnects, hyper drops that future and the outbound call with it.

use crate::error::GateRejection;
use crate::{metrics, telemetry};
use axum::{
    extract::{Request, State},
    http::{header::InvalidHeaderName, HeaderMap, HeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use opa_gate_core::{
    decode_path, parse_roles, split_path, DecisionQuery, PolicyEvaluator, Verdict,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Paths at or below this prefix skip policy evaluation
pub const HEALTH_PREFIX: &str = "/health";

/// Header carrying the comma-separated role claim, in the lowercase form
/// `HeaderName` stores
pub const DEFAULT_ROLE_HEADER: &str = "user_roles";

/// Whether `path` is a health check path.
///
/// Segment aware: `/health` and `/health/...` match, `/healthz` does not.
pub fn is_bypassed(path: &str) -> bool {
    match path.strip_prefix(HEALTH_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Per-request policy enforcement point.
///
/// Holds no per-request state; one instance serves all requests.
pub struct EnforcementGate {
    evaluator: Arc<dyn PolicyEvaluator>,
    role_header: HeaderName,
}

impl EnforcementGate {
    /// Create a gate reading roles from `USER_ROLES`
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        EnforcementGate {
            evaluator,
            role_header: HeaderName::from_static(DEFAULT_ROLE_HEADER),
        }
    }

    /// Read roles from a different header
    pub fn with_role_header(mut self, name: &str) -> Result<Self, InvalidHeaderName> {
        self.role_header = HeaderName::try_from(name)?;
        Ok(self)
    }

    /// Name of the role header, lowercased
    pub fn role_header(&self) -> &str {
        self.role_header.as_str()
    }

    /// Build the decision query for a request.
    ///
    /// The path is percent-decoded first, so the policy sees the same
    /// segments the route extractors hand to the handler.
    pub fn query_for<B>(&self, req: &axum::http::Request<B>) -> DecisionQuery {
        DecisionQuery::new(
            split_path(&decode_path(req.uri().path())),
            self.roles_from(req.headers()),
            req.method().as_str(),
        )
    }

    fn roles_from(&self, headers: &HeaderMap) -> Vec<String> {
        let Some(value) = headers.get(&self.role_header) else {
            return Vec::new();
        };
        match value.to_str() {
            Ok(raw) => parse_roles(Some(raw)),
            Err(_) => {
                warn!(header = %self.role_header, "Role header is not visible ASCII, ignoring it");
                Vec::new()
            }
        }
    }

    /// Run the gate for one request.
    ///
    /// `next` is the downstream handler. It is called at most once, and only
    /// for bypassed or allowed requests; its response is returned as is,
    /// with the [`Verdict`] added to the response extensions.
    pub async fn intercept<B, F, Fut>(&self, req: axum::http::Request<B>, next: F) -> Response
    where
        F: FnOnce(axum::http::Request<B>) -> Fut,
        Fut: Future<Output = Response>,
    {
        if is_bypassed(req.uri().path()) {
            metrics::record_verdict(Verdict::Bypassed);
            return forward(req, next, Verdict::Bypassed).await;
        }

        let query = self.query_for(&req);
        let span = telemetry::gate_span(&query.method, req.uri().path());

        let start = Instant::now();
        let outcome = self.evaluator.evaluate(&query).instrument(span.clone()).await;
        let elapsed = start.elapsed();

        let verdict = Verdict::from(&outcome);
        telemetry::record_verdict(&span, verdict, elapsed.as_secs_f64() * 1000.0);
        metrics::record_verdict(verdict);
        metrics::record_gate_latency(elapsed.as_secs_f64());

        match outcome {
            Ok(result) if result.allow => {
                debug!(parent: &span, "Request allowed by policy");
                forward(req, next, verdict).await
            }
            Ok(_) => {
                info!(
                    parent: &span,
                    roles = ?query.roles,
                    "Request denied by policy"
                );
                GateRejection::Denied.into_response()
            }
            Err(e) => {
                error!(
                    parent: &span,
                    kind = e.kind(),
                    error = %e,
                    "Policy engine failure, rejecting request"
                );
                metrics::record_engine_error(e.kind());
                GateRejection::EngineFailure(e).into_response()
            }
        }
    }
}

async fn forward<B, F, Fut>(req: axum::http::Request<B>, next: F, verdict: Verdict) -> Response
where
    F: FnOnce(axum::http::Request<B>) -> Fut,
    Fut: Future<Output = Response>,
{
    let mut response = next(req).await;
    response.extensions_mut().insert(verdict);
    response
}

/// Axum middleware adapter, for `middleware::from_fn_with_state`
pub async fn enforce(
    State(gate): State<Arc<EnforcementGate>>,
    req: Request,
    next: Next,
) -> Response {
    gate.intercept(req, |req| next.run(req)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_router;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderValue, Method, StatusCode};
    use opa_gate_core::{DecisionResult, PolicyEngineError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Copy)]
    enum Reply {
        Allow,
        Deny,
        Fail,
    }

    struct ScriptedEngine {
        reply: Reply,
        calls: AtomicUsize,
        seen: Mutex<Vec<DecisionQuery>>,
    }

    impl ScriptedEngine {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(ScriptedEngine {
                reply,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_query(&self) -> DecisionQuery {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl PolicyEvaluator for ScriptedEngine {
        async fn evaluate(&self, query: &DecisionQuery) -> opa_gate_core::Result<DecisionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(query.clone());
            match self.reply {
                Reply::Allow => Ok(DecisionResult::allow()),
                Reply::Deny => Ok(DecisionResult::deny()),
                Reply::Fail => Err(PolicyEngineError::Protocol { status: 503 }),
            }
        }
    }

    fn gate_with(engine: &Arc<ScriptedEngine>) -> Arc<EnforcementGate> {
        Arc::new(EnforcementGate::new(engine.clone()))
    }

    fn request(method: Method, uri: &str, roles: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(roles) = roles {
            builder = builder.header("USER_ROLES", roles);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_is_bypassed() {
        assert!(is_bypassed("/health"));
        assert!(is_bypassed("/health/liveness"));
        assert!(is_bypassed("/health/readiness"));
        assert!(!is_bypassed("/healthz"));
        assert!(!is_bypassed("/v1/health"));
        assert!(!is_bypassed("/"));
    }

    #[tokio::test]
    async fn test_health_paths_never_evaluate() {
        let engine = ScriptedEngine::new(Reply::Fail);
        let app = build_router(gate_with(&engine));

        for method in [Method::GET, Method::POST, Method::DELETE] {
            for roles in [None, Some("admin"), Some("")] {
                let response = app
                    .clone()
                    .oneshot(request(method.clone(), "/health/liveness", roles))
                    .await
                    .unwrap();
                assert_eq!(
                    response.extensions().get::<Verdict>(),
                    Some(&Verdict::Bypassed)
                );
            }
        }

        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_liveness_body() {
        let engine = ScriptedEngine::new(Reply::Deny);
        let app = build_router(gate_with(&engine));

        let response = app
            .oneshot(request(Method::GET, "/health/liveness", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"status":"alive"}"#);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_allowed_request_reaches_handler() {
        let engine = ScriptedEngine::new(Reply::Allow);
        let app = build_router(gate_with(&engine));

        let response = app
            .oneshot(request(Method::GET, "/v1/admin/users/bob", Some("admin")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "Hello!! bob You have reached the Get Users"
        );
        assert_eq!(engine.calls(), 1);
        assert_eq!(
            engine.last_query(),
            DecisionQuery::new(
                vec!["".into(), "v1".into(), "admin".into(), "users".into(), "bob".into()],
                vec!["admin".into()],
                "GET",
            )
        );
    }

    #[tokio::test]
    async fn test_denied_request_is_rejected() {
        let engine = ScriptedEngine::new(Reply::Deny);
        let app = build_router(gate_with(&engine));

        let response = app
            .oneshot(request(Method::POST, "/v1/admin/users/bob", Some("viewer")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.extensions().get::<Verdict>(), Some(&Verdict::Denied));
        assert_eq!(body_text(response).await, "Unauthorized");
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_is_rejected_distinctly() {
        let engine = ScriptedEngine::new(Reply::Fail);
        let app = build_router(gate_with(&engine));

        let response = app
            .oneshot(request(Method::GET, "/v1/admin/users/bob", Some("admin")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.extensions().get::<Verdict>(),
            Some(&Verdict::EngineFailure("protocol"))
        );
        assert_eq!(body_text(response).await, "Unauthorized");
    }

    #[tokio::test]
    async fn test_rejection_never_calls_downstream() {
        for reply in [Reply::Deny, Reply::Fail] {
            let engine = ScriptedEngine::new(reply);
            let gate = EnforcementGate::new(engine.clone());
            let called = AtomicBool::new(false);

            let response = gate
                .intercept(request(Method::GET, "/v1/admin/users/bob", None), |_req| {
                    called.store(true, Ordering::SeqCst);
                    async { StatusCode::OK.into_response() }
                })
                .await;

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(!called.load(Ordering::SeqCst));
            assert_eq!(engine.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_forward_passes_response_through() {
        let engine = ScriptedEngine::new(Reply::Allow);
        let gate = EnforcementGate::new(engine.clone());

        let response = gate
            .intercept(request(Method::PUT, "/v1/items/7", None), |req| async move {
                assert_eq!(req.uri().path(), "/v1/items/7");
                (
                    StatusCode::CREATED,
                    [("x-downstream", "yes")],
                    "created",
                )
                    .into_response()
            })
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-downstream"], "yes");
        assert_eq!(body_text(response).await, "created");
    }

    #[tokio::test]
    async fn test_role_header_parsing() {
        let engine = ScriptedEngine::new(Reply::Allow);
        let app = build_router(gate_with(&engine));

        let cases: [(Option<&str>, Vec<&str>); 4] = [
            (None, vec![]),
            (Some(""), vec![]),
            (Some("a,b"), vec!["a", "b"]),
            (Some("a,,b"), vec!["a", "", "b"]),
        ];

        for (header, expected) in cases {
            app.clone()
                .oneshot(request(Method::GET, "/v1/admin/users/alice", header))
                .await
                .unwrap();
            assert_eq!(engine.last_query().roles, expected);
        }
    }

    #[tokio::test]
    async fn test_percent_encoded_path_is_decoded_for_policy() {
        let engine = ScriptedEngine::new(Reply::Allow);
        let app = build_router(gate_with(&engine));

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/admin/users/j%C3%B6rg", Some("admin")))
            .await
            .unwrap();

        assert_eq!(
            body_text(response).await,
            "Hello!! jörg You have reached the Get Users"
        );
        assert_eq!(engine.last_query().path[4], "jörg");

        app.oneshot(request(Method::GET, "/v1/admin/users/b%6Fb", Some("admin")))
            .await
            .unwrap();
        assert_eq!(
            engine.last_query().path,
            vec!["", "v1", "admin", "users", "bob"]
        );
    }

    #[tokio::test]
    async fn test_non_ascii_role_header_counts_as_no_roles() {
        let engine = ScriptedEngine::new(Reply::Allow);
        let app = build_router(gate_with(&engine));

        let req = axum::http::Request::builder()
            .uri("/v1/admin/users/alice")
            .header("USER_ROLES", HeaderValue::from_bytes(b"admin,\xe9quipe").unwrap())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(engine.calls(), 1);
        assert!(engine.last_query().roles.is_empty());
    }

    #[test]
    fn test_default_role_header() {
        let gate = EnforcementGate::new(ScriptedEngine::new(Reply::Deny));
        assert_eq!(gate.role_header(), DEFAULT_ROLE_HEADER);
    }

    #[tokio::test]
    async fn test_custom_role_header() {
        let engine = ScriptedEngine::new(Reply::Allow);
        let gate = EnforcementGate::new(engine.clone())
            .with_role_header("X-Roles")
            .unwrap();
        assert_eq!(gate.role_header(), "x-roles");

        let req = axum::http::Request::builder()
            .uri("/v1/admin/users/alice")
            .header("x-roles", "ops")
            .header("USER_ROLES", "admin")
            .body(Body::empty())
            .unwrap();

        assert_eq!(gate.query_for(&req).roles, vec!["ops"]);
    }

    #[tokio::test]
    async fn test_unknown_path_is_still_gated() {
        let engine = ScriptedEngine::new(Reply::Deny);
        let app = build_router(gate_with(&engine));

        let response = app
            .oneshot(request(Method::GET, "/v2/unknown", Some("admin")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(engine.calls(), 1);
    }
}
