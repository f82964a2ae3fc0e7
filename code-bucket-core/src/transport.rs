//! HTTP calls with bounded retries and exponential backoff.
//!
//! Every request to the document store goes through [`ResilientTransport`]. The
//! status code of each attempt decides what happens next:
//!
//! - 2xx: returned to the caller.
//! - 429: sleep `unit * multiplier * 2^attempt`, then retry.
//! - any other 4xx: fail at once with [`TransportError::Client`].
//! - 5xx or a connection-level failure: sleep `unit * 2^attempt`, then retry.
//!
//! Running out of attempts yields [`TransportError::RetryExhausted`], which callers
//! can tell apart from a rejected request.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Longest response body kept in a [`TransportError::Client`].
pub const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_multiplier: u32,
    /// One second in production; shortened in tests.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after a 429 on the zero-based `attempt`.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        self.server_error_delay(attempt) * self.backoff_multiplier
    }

    /// Wait after a 5xx or transport failure on the zero-based `attempt`.
    pub fn server_error_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit * 2u32.saturating_pow(attempt.min(16))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The request was rejected; retrying would not help.
    #[error("request rejected with {status}: {body}")]
    Client { status: StatusCode, body: String },
    #[error("request failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
    #[error("unexpected response status {0}")]
    UnexpectedStatus(StatusCode),
    /// The request could not be constructed (bad URL, invalid header, ...).
    #[error("could not build request: {0}")]
    Build(String),
}

/// Request body. Kept as plain data so it can be rebuilt for every attempt;
/// a multipart form is consumed when sent.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart {
        file_field: String,
        file_name: String,
        bytes: Vec<u8>,
        fields: Vec<(String, String)>,
    },
}

impl Payload {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(value),
            Payload::Form(fields) => builder.form(fields),
            Payload::Multipart {
                file_field,
                file_name,
                bytes,
                fields,
            } => {
                let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                let form = fields
                    .iter()
                    .fold(Form::new().part(file_field.clone(), part), |form, (k, v)| {
                        form.text(k.clone(), v.clone())
                    });
                builder.multipart(form)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResilientTransport {
    client: Client,
    policy: RetryPolicy,
    bearer_token: Option<String>,
}

impl ResilientTransport {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            bearer_token: None,
        }
    }

    /// Sends `Authorization: Bearer <token>` on every later request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        payload: &Payload,
    ) -> Result<Response, TransportError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            let is_last = attempt + 1 == attempts;
            let mut builder = payload.apply(self.client.request(method.clone(), url));
            if let Some(token) = &self.bearer_token {
                builder = builder.bearer_auth(token);
            }

            let delay = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(%method, url, %status, attempt, "Request succeeded");
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let delay = self.policy.rate_limit_delay(attempt);
                        warn!(url, attempt = attempt + 1, wait = ?delay, "Rate limited");
                        last_error = format!("rate limited ({status})");
                        delay
                    } else if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        let body = truncate_chars(&body, MAX_ERROR_BODY_CHARS);
                        error!(%method, url, %status, body = %body, "Client error, not retrying");
                        return Err(TransportError::Client { status, body });
                    } else if status.is_server_error() {
                        let delay = self.policy.server_error_delay(attempt);
                        warn!(url, %status, attempt = attempt + 1, wait = ?delay, "Server error, retrying");
                        last_error = format!("server error ({status})");
                        delay
                    } else {
                        error!(%method, url, %status, "Unexpected response status");
                        return Err(TransportError::UnexpectedStatus(status));
                    }
                }
                Err(e) if e.is_builder() => {
                    return Err(TransportError::Build(e.to_string()));
                }
                Err(e) => {
                    let delay = self.policy.server_error_delay(attempt);
                    warn!(
                        url,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "Request failed"
                    );
                    last_error = e.to_string();
                    delay
                }
            };

            if !is_last {
                tokio::time::sleep(delay).await;
            }
        }

        error!(%method, url, attempts, last_error = %last_error, "Giving up on request");
        Err(TransportError::RetryExhausted {
            attempts,
            last_error,
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(unit_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 2,
            backoff_unit: Duration::from_millis(unit_ms),
        }
    }

    fn transport(policy: RetryPolicy) -> ResilientTransport {
        ResilientTransport::new(Client::new(), policy)
    }

    #[test]
    fn delay_schedule_is_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.server_error_delay(0), Duration::from_secs(1));
        assert_eq!(policy.server_error_delay(1), Duration::from_secs(2));
        assert_eq!(policy.server_error_delay(2), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_delay(0), Duration::from_secs(2));
        assert_eq!(policy.rate_limit_delay(1), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_delay(2), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn rate_limited_twice_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/health"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let policy = fast_policy(20);
        let started = Instant::now();
        let response = transport(policy)
            .request(
                Method::GET,
                &format!("{}/v3/health", server.uri()),
                &Payload::Empty,
            )
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.status(), StatusCode::OK);
        let expected = policy.rate_limit_delay(0) + policy.rate_limit_delay(1);
        assert!(
            elapsed >= expected,
            "slept {elapsed:?}, expected at least {expected:?}"
        );
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        let long_body = "x".repeat(500);
        Mock::given(method("GET"))
            .and(path("/v3/documents/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string(long_body))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(fast_policy(1))
            .request(
                Method::GET,
                &format!("{}/v3/documents/missing", server.uri()),
                &Payload::Empty,
            )
            .await
            .unwrap_err();

        match err {
            TransportError::Client { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("expected client error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/collections"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = transport(fast_policy(1))
            .request(
                Method::POST,
                &format!("{}/v3/collections", server.uri()),
                &Payload::Json(serde_json::json!({"name": "c"})),
            )
            .await
            .unwrap_err();

        match err {
            TransportError::RetryExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"), "{last_error}");
            }
            other => panic!("expected retry exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failures_exhaust_retries() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport(fast_policy(1))
            .request(Method::GET, &format!("http://{addr}/v3/health"), &Payload::Empty)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::RetryExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn multipart_payload_survives_a_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/documents"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/documents"))
            .and(header("authorization", "Bearer t0k3n"))
            .and(body_string_contains("fn main()"))
            .and(body_string_contains("collection_ids"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let payload = Payload::Multipart {
            file_field: "file".into(),
            file_name: "main.rs".into(),
            bytes: b"fn main() {}".to_vec(),
            fields: vec![("collection_ids".into(), "[\"c1\"]".into())],
        };
        let response = transport(fast_policy(1))
            .with_bearer_token("t0k3n")
            .request(
                Method::POST,
                &format!("{}/v3/documents", server.uri()),
                &payload,
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
