//! Bearer-authenticated transport to the vendor API
//!
//! Every call goes through here: bearer header, 30s overall timeout, and
//! the vendor's `{"response": ...}` envelope unwrapped once. Idempotent
//! GETs are retried on transport-level failures (timeout, connect); POSTs
//! never are — a vehicle command that timed out may still have executed.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

/// Fleet API production base for the North America region.
pub const DEFAULT_API_BASE: &str = "https://fleet-api.prd.na.vn.cloud.tesla.com";

/// Overall per-request deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// GET attempts on transport failure: 1 initial + 2 retries.
const MAX_GET_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Vendor API client. Cheap to clone; the reqwest client pools
/// connections internally.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl ApiClient {
    /// `base` is the fleet-api or owner-api host, without a trailing path.
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    /// Authenticated GET, unwrapped from the response envelope.
    /// Transport failures are retried; HTTP error statuses are not.
    pub(crate) async fn get(&self, token: &str, path: &str) -> Result<Value> {
        let url = self.url(path);

        for attempt in 0..MAX_GET_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let result = self
                .http
                .get(&url)
                .bearer_auth(token)
                .timeout(self.timeout)
                .send()
                .await;

            match result {
                Ok(response) => return read_envelope(response, "GET").await,
                Err(e) if retryable(&e) && attempt < MAX_GET_ATTEMPTS - 1 => {
                    warn!(path, attempt, error = %e, "transport failure, retrying GET");
                    continue;
                }
                Err(e) => {
                    record_outcome("GET", "network_error");
                    return Err(Error::Network(format!("GET {path} failed: {e}")));
                }
            }
        }

        unreachable!("retry loop returns on final attempt")
    }

    /// Authenticated POST with a JSON body, unwrapped from the response
    /// envelope. Never retried.
    pub(crate) async fn post(&self, token: &str, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                record_outcome("POST", "network_error");
                Error::Network(format!("POST {path} failed: {e}"))
            })?;

        read_envelope(response, "POST").await
    }
}

/// Transport-level failures worth one more attempt on an idempotent GET.
fn retryable(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

/// Check the status and pull the payload out of `{"response": ...}`.
async fn read_envelope(response: reqwest::Response, method: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        record_outcome(method, "api_error");
        return Err(Error::Api {
            status: status.as_u16(),
            body,
        });
    }

    let mut value: Value = response.json().await.map_err(|e| {
        record_outcome(method, "network_error");
        Error::Network(format!("invalid API response: {e}"))
    })?;

    record_outcome(method, "success");
    match value.get_mut("response") {
        Some(payload) => Ok(payload.take()),
        None => Err(Error::Network("response envelope missing".into())),
    }
}

fn record_outcome(method: &str, outcome: &str) {
    metrics::counter!(
        "tesla_api_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    async fn start_api_server(status: u16, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let bodies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = bodies.clone();

        let app = Router::new().route(
            "/api/1/thing",
            get(move || async move {
                (
                    StatusCode::from_u16(status).unwrap(),
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            })
            .post(move |req_body: String| {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(req_body);
                    (
                        StatusCode::from_u16(status).unwrap(),
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), bodies)
    }

    #[tokio::test]
    async fn get_unwraps_response_envelope() {
        let (base, _) = start_api_server(200, r#"{"response":{"id":42},"count":1}"#).await;
        let client = ApiClient::new(reqwest::Client::new(), base);

        let value = client.get("tok", "/api/1/thing").await.unwrap();
        assert_eq!(value["id"], 42);
    }

    #[tokio::test]
    async fn non_2xx_surfaces_status_and_body() {
        let (base, _) = start_api_server(408, r#"{"error":"vehicle unavailable"}"#).await;
        let client = ApiClient::new(reqwest::Client::new(), base);

        let err = client.get("tok", "/api/1/thing").await.unwrap_err();
        match err {
            Error::Api { status, body } => {
                assert_eq!(status, 408);
                assert!(body.contains("vehicle unavailable"));
            }
            other => panic!("expected Api error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_envelope_is_an_error() {
        let (base, _) = start_api_server(200, r#"{"id":42}"#).await;
        let client = ApiClient::new(reqwest::Client::new(), base);

        let err = client.get("tok", "/api/1/thing").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn post_sends_bearer_and_body_without_retry() {
        let (base, bodies) = start_api_server(200, r#"{"response":{"result":true}}"#).await;
        let client = ApiClient::new(reqwest::Client::new(), base);

        let value = client
            .post("tok", "/api/1/thing", &serde_json::json!({"on": true}))
            .await
            .unwrap();
        assert_eq!(value["result"], true);

        let recorded = bodies.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains(r#""on":true"#));
    }

    #[tokio::test]
    async fn get_retries_timeouts_up_to_three_attempts() {
        // Accepts connections, never answers. Counts attempts.
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let counter = counter.clone();
                tokio::spawn(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });

        let client = ApiClient::new(reqwest::Client::new(), format!("http://{addr}"))
            .with_timeout(Duration::from_millis(50));

        let err = client.get("tok", "/api/1/thing").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got: {err:?}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            3,
            "GET must make exactly 3 attempts on timeout"
        );
    }

    #[tokio::test]
    async fn post_to_unreachable_server_fails_once() {
        // Bind-and-drop to get a dead port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(reqwest::Client::new(), format!("http://{addr}"));
        let err = client
            .post("tok", "/api/1/thing", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got: {err:?}");
    }
}
