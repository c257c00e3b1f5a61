//! HTTP client for the remote policy decision point

use crate::decision::{parse_decision, DecisionResult, MissingAllow};
use crate::error::{ConfigError, PolicyEngineError, Result};
use crate::query::DecisionQuery;
use async_trait::async_trait;
use metrics::histogram;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const USER_AGENT: &str = concat!("opa-gate/", env!("CARGO_PKG_VERSION"));

/// Default bound on a single policy evaluation call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Anything that can turn a decision query into a verdict.
///
/// The gate holds an `Arc<dyn PolicyEvaluator>`; production code injects
/// a [`PolicyClient`].
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate one query. Engine failures are errors, never `allow = false`.
    async fn evaluate(&self, query: &DecisionQuery) -> Result<DecisionResult>;
}

/// Settings for [`PolicyClient`]
#[derive(Debug, Clone)]
pub struct PolicyClientConfig {
    /// Full URL of the policy document, e.g. `http://opa:8181/v1/data/app/authz`
    pub endpoint: String,
    /// Per-call timeout, covering connect, send and body read
    pub timeout: Duration,
    /// Handling of responses without `result.allow`
    pub missing_allow: MissingAllow,
}

impl PolicyClientConfig {
    /// Config with default timeout and strict parsing
    pub fn new(endpoint: impl Into<String>) -> Self {
        PolicyClientConfig {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            missing_allow: MissingAllow::default(),
        }
    }
}

/// Stateless adapter over a pooled HTTP client.
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    timeout: Duration,
    missing_allow: MissingAllow,
}

impl PolicyClient {
    /// Build a client; the endpoint is validated here, not per request
    pub fn new(config: PolicyClientConfig) -> std::result::Result<Self, ConfigError> {
        let endpoint = parse_endpoint(&config.endpoint)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "http_client",
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(PolicyClient {
            http,
            endpoint,
            timeout: config.timeout,
            missing_allow: config.missing_allow,
        })
    }

    /// Configured policy engine URL
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn classify(&self, err: reqwest::Error) -> PolicyEngineError {
        if err.is_timeout() {
            PolicyEngineError::Timeout(self.timeout.as_millis() as u64)
        } else {
            PolicyEngineError::Transport(err)
        }
    }

    async fn round_trip(&self, query: &DecisionQuery) -> Result<DecisionResult> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&query.as_input())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyEngineError::Protocol {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let result = parse_decision(&body, self.missing_allow)?;
        debug!(allow = result.allow, "Policy engine verdict");
        Ok(result)
    }
}

#[async_trait]
impl PolicyEvaluator for PolicyClient {
    #[instrument(
        name = "policy_evaluation",
        skip_all,
        fields(method = %query.method, roles = query.roles.len())
    )]
    async fn evaluate(&self, query: &DecisionQuery) -> Result<DecisionResult> {
        let start = Instant::now();
        let outcome = self.round_trip(query).await;

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        histogram!("opa_gate_policy_latency_seconds", "outcome" => label)
            .record(start.elapsed().as_secs_f64());

        outcome
    }
}

/// Validate a policy engine URL
pub fn parse_endpoint(raw: &str) -> std::result::Result<reqwest::Url, ConfigError> {
    let url = reqwest::Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidEndpoint {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const POLICY_PATH: &str = "/v1/data/sample";

    fn client_for(server: &MockServer, missing_allow: MissingAllow) -> PolicyClient {
        PolicyClient::new(PolicyClientConfig {
            endpoint: format!("{}{}", server.uri(), POLICY_PATH),
            timeout: Duration::from_millis(500),
            missing_allow,
        })
        .unwrap()
    }

    fn bob_query() -> DecisionQuery {
        DecisionQuery::from_request_parts("/v1/admin/users/bob", Some("admin"), "GET")
    }

    #[tokio::test]
    async fn test_evaluate_sends_input_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(POLICY_PATH))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "input": {
                    "path": ["", "v1", "admin", "users", "bob"],
                    "roles": ["admin"],
                    "method": "GET"
                }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"allow": true}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, MissingAllow::Strict);
        let result = client.evaluate(&bob_query()).await.unwrap();
        assert!(result.allow);
    }

    #[tokio::test]
    async fn test_evaluate_denial_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"allow": false}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, MissingAllow::Strict);
        let result = client.evaluate(&bob_query()).await.unwrap();
        assert!(!result.allow);
    }

    #[tokio::test]
    async fn test_evaluate_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server, MissingAllow::Strict);
        let err = client.evaluate(&bob_query()).await.unwrap_err();
        assert!(matches!(err, PolicyEngineError::Protocol { status: 500 }));
    }

    #[tokio::test]
    async fn test_evaluate_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, MissingAllow::Deny);
        let err = client.evaluate(&bob_query()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[tokio::test]
    async fn test_evaluate_undefined_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let strict = client_for(&server, MissingAllow::Strict);
        assert!(matches!(
            strict.evaluate(&bob_query()).await,
            Err(PolicyEngineError::MalformedResponse(_))
        ));

        let lenient = client_for(&server, MissingAllow::Deny);
        assert!(!lenient.evaluate(&bob_query()).await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_evaluate_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": {"allow": true}}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = PolicyClient::new(PolicyClientConfig {
            endpoint: format!("{}{}", server.uri(), POLICY_PATH),
            timeout: Duration::from_millis(100),
            missing_allow: MissingAllow::Strict,
        })
        .unwrap();

        let err = client.evaluate(&bob_query()).await.unwrap_err();
        assert!(matches!(err, PolicyEngineError::Timeout(100)));
    }

    #[tokio::test]
    async fn test_evaluate_connection_refused() {
        // Reserve a port, then free it so nothing is listening there
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = PolicyClient::new(PolicyClientConfig::new(format!(
            "http://127.0.0.1:{}{}",
            port, POLICY_PATH
        )))
        .unwrap();

        let err = client.evaluate(&bob_query()).await.unwrap_err();
        assert!(matches!(err, PolicyEngineError::Transport(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_invalid_endpoint_rejected_at_construction() {
        let err = PolicyClient::new(PolicyClientConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));

        let err = PolicyClient::new(PolicyClientConfig::new("ftp://opa/v1/data")).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_endpoint_accessor() {
        let client =
            PolicyClient::new(PolicyClientConfig::new("http://localhost:8181/v1/data/sample"))
                .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8181/v1/data/sample");
    }
}
