//! Rate-limited HTTP transport for provider calls
//!
//! Paces requests per connection, retries throttling, 5xx and network
//! failures with capped exponential backoff plus jitter, and buffers the
//! final response body. No lock is held while sleeping.

use std::time::Duration;

use calsync_domain::{CalSyncError, Result, SyncConfig};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::pacing::{QuotaCounter, RequestPacer};
use crate::errors::InfraError;

/// Buffered provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ProviderResponse {
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            CalSyncError::ProviderUnavailable(format!("malformed provider response: {e}"))
        })
    }

    /// Google error `reason` values, if the body is an error envelope.
    pub fn error_reasons(&self) -> Vec<String> {
        serde_json::from_slice::<GoogleErrorEnvelope>(&self.body)
            .map(|envelope| envelope.error.errors.into_iter().map(|item| item.reason).collect())
            .unwrap_or_default()
    }

    /// Short error description safe to put in logs.
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<GoogleErrorEnvelope>(&self.body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| {
                self.status.canonical_reason().unwrap_or("unknown status").to_string()
            })
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorItem {
    #[serde(default)]
    reason: String,
}

/// Why an attempt is worth repeating.
#[derive(Debug)]
enum Retryable {
    Throttled { retry_after: Option<Duration> },
    Unavailable(String),
}

/// HTTP client with pacing, quota and retry for one provider.
#[derive(Debug)]
pub struct RateLimitedHttp {
    client: ReqwestClient,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    pacer: RequestPacer,
    quota: QuotaCounter,
}

impl RateLimitedHttp {
    /// Start building a new transport.
    pub fn builder() -> RateLimitedHttpBuilder {
        RateLimitedHttpBuilder::default()
    }

    /// Build from the `[sync]` config section.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::builder()
            .timeout(config.request_timeout())
            .max_attempts(config.max_attempts)
            .base_backoff(Duration::from_millis(config.base_backoff_ms))
            .max_backoff(Duration::from_millis(config.max_backoff_ms))
            .min_spacing(config.min_request_spacing())
            .quota(config.quota_per_window, Duration::from_secs(config.quota_window_secs))
            .build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Calls counted for `connection_id` in the current quota window.
    pub fn calls_in_window(&self, connection_id: &str) -> u64 {
        self.quota.calls_in_window(connection_id)
    }

    /// Execute the request with pacing and retry semantics.
    ///
    /// Non-retryable statuses (including 403s that are not quota related)
    /// are returned as-is for the caller to classify.
    pub async fn send(
        &self,
        connection_id: &str,
        builder: RequestBuilder,
    ) -> Result<ProviderResponse> {
        let attempts = self.max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=attempts {
            self.quota.try_acquire(connection_id)?;
            self.pacer.wait_turn(connection_id).await;

            let request = builder
                .try_clone()
                .ok_or_else(|| {
                    CalSyncError::Internal(
                        "request body cannot be cloned; buffer the body to enable retries".into(),
                    )
                })?
                .build()
                .map_err(|err| CalSyncError::from(InfraError::from(err)))?;

            let method = request.method().clone();
            let url = request.url().path().to_string();
            debug!(connection_id, attempt, %method, %url, "sending provider request");

            let failure = match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(response.headers());
                    let body = response
                        .bytes()
                        .await
                        .map_err(|err| CalSyncError::from(InfraError::from(err)))?
                        .to_vec();
                    let reply = ProviderResponse { status, body };

                    match classify(&reply, retry_after) {
                        Some(retryable) => retryable,
                        None => {
                            debug!(connection_id, attempt, %status, "received provider response");
                            return Ok(reply);
                        }
                    }
                }
                Err(err) if should_retry_error(&err) => {
                    Retryable::Unavailable(CalSyncError::from(InfraError::from(err)).to_string())
                }
                Err(err) => return Err(InfraError::from(err).into()),
            };

            if attempt < attempts {
                let delay = self.retry_delay(attempt, &failure);
                warn!(
                    connection_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    failure = ?failure,
                    "provider call failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            last_failure = Some(failure);
        }

        Err(match last_failure {
            Some(Retryable::Throttled { .. }) => CalSyncError::RateLimitExceeded(format!(
                "provider still throttling after {attempts} attempts"
            )),
            Some(Retryable::Unavailable(reason)) => CalSyncError::ProviderUnavailable(format!(
                "gave up after {attempts} attempts: {reason}"
            )),
            None => CalSyncError::Internal("retry loop produced no result".into()),
        })
    }

    /// `min(cap, base * 2^(attempt-1))` plus jitter in `[0, delay/2]`,
    /// raised to `Retry-After` when the provider asks for more.
    fn retry_delay(&self, attempt: u32, failure: &Retryable) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jitter_ms = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        let delay = delay + jitter;

        match failure {
            Retryable::Throttled { retry_after: Some(wait) } => {
                delay.max(*wait).min(self.max_backoff)
            }
            _ => delay,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << shift).min(self.max_backoff)
    }
}

fn classify(reply: &ProviderResponse, retry_after: Option<Duration>) -> Option<Retryable> {
    match reply.status {
        StatusCode::TOO_MANY_REQUESTS => Some(Retryable::Throttled { retry_after }),
        StatusCode::FORBIDDEN if is_quota_rejection(reply) => {
            Some(Retryable::Throttled { retry_after })
        }
        status if status.is_server_error() => {
            Some(Retryable::Unavailable(format!("HTTP {}", status.as_u16())))
        }
        _ => None,
    }
}

fn is_quota_rejection(reply: &ProviderResponse) -> bool {
    reply
        .error_reasons()
        .iter()
        .any(|reason| reason == "rateLimitExceeded" || reason == "userRateLimitExceeded")
}

/// `Retry-After` in delta-seconds form.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_request() || err.is_connect()
}

/// Builder for [`RateLimitedHttp`].
#[derive(Debug)]
pub struct RateLimitedHttpBuilder {
    timeout: Duration,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    min_spacing: Duration,
    quota_limit: u64,
    quota_window: Duration,
    user_agent: Option<String>,
}

impl Default for RateLimitedHttpBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            min_spacing: Duration::from_millis(100),
            quota_limit: 0,
            quota_window: Duration::from_secs(60),
            user_agent: Some(concat!("calsync/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl RateLimitedHttpBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure the total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }

    /// Calls allowed per connection and window; zero disables the ceiling.
    pub fn quota(mut self, limit: u64, window: Duration) -> Self {
        self.quota_limit = limit;
        self.quota_window = window;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<RateLimitedHttp> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout);
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder.build().map_err(|err| CalSyncError::from(InfraError::from(err)))?;

        Ok(RateLimitedHttp {
            client,
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
            max_backoff: self.max_backoff,
            pacer: RequestPacer::new(self.min_spacing),
            quota: QuotaCounter::new(self.quota_limit, self.quota_window),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport(max_attempts: u32) -> RateLimitedHttp {
        RateLimitedHttp::builder()
            .base_backoff(Duration::from_millis(5))
            .max_backoff(Duration::from_millis(50))
            .min_spacing(Duration::ZERO)
            .max_attempts(max_attempts)
            .build()
            .expect("transport")
    }

    fn quota_body(reason: &str) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": 403,
                "message": "Rate Limit Exceeded",
                "errors": [{ "domain": "usageLimits", "reason": reason }]
            }
        })
    }

    #[tokio::test]
    async fn retries_throttling_until_success() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                let current = attempts_clone.fetch_add(1, Ordering::SeqCst);
                match current {
                    0 => ResponseTemplate::new(429),
                    1 => ResponseTemplate::new(403).set_body_json(quota_body("userRateLimitExceeded")),
                    2 => ResponseTemplate::new(503),
                    _ => ResponseTemplate::new(200).set_body_string("{}"),
                }
            })
            .expect(4)
            .mount(&server)
            .await;

        let http = transport(5);
        let reply = http
            .send("conn-1", http.request(Method::GET, &server.uri()))
            .await
            .expect("response");

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(http.calls_in_window("conn-1"), 4);
    }

    #[tokio::test]
    async fn three_429s_then_success_with_growing_delays() {
        let server = MockServer::start().await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::<std::time::Instant>::new()));
        let seen_clone = seen.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                let mut seen = seen_clone.lock();
                seen.push(std::time::Instant::now());
                if seen.len() <= 3 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200).set_body_string("{}")
                }
            })
            .expect(4)
            .mount(&server)
            .await;

        let http = RateLimitedHttp::builder()
            .base_backoff(Duration::from_millis(50))
            .max_backoff(Duration::from_secs(2))
            .min_spacing(Duration::ZERO)
            .max_attempts(5)
            .build()
            .expect("transport");
        let reply = http
            .send("conn-1", http.request(Method::GET, &server.uri()))
            .await
            .expect("fourth attempt succeeds");
        assert_eq!(reply.status, StatusCode::OK);

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        let gaps: Vec<Duration> = seen.windows(2).map(|pair| pair[1] - pair[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(50), "gaps: {gaps:?}");
        assert!(gaps[1] >= Duration::from_millis(100), "gaps: {gaps:?}");
        assert!(gaps[2] >= Duration::from_millis(200), "gaps: {gaps:?}");
        assert!(gaps[2] > gaps[0], "gaps: {gaps:?}");
    }

    #[tokio::test]
    async fn persistent_throttling_surfaces_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(3)
            .mount(&server)
            .await;

        let http = transport(3);
        let err = http.send("conn-1", http.request(Method::GET, &server.uri())).await.unwrap_err();

        assert!(matches!(err, CalSyncError::RateLimitExceeded(_)));
    }

    #[tokio::test]
    async fn non_quota_forbidden_is_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(quota_body("forbidden")))
            .expect(1)
            .mount(&server)
            .await;

        let http = transport(5);
        let reply =
            http.send("conn-1", http.request(Method::GET, &server.uri())).await.expect("reply");

        assert_eq!(reply.status, StatusCode::FORBIDDEN);
        assert_eq!(reply.error_reasons(), vec!["forbidden".to_string()]);
        assert_eq!(reply.error_message(), "Rate Limit Exceeded");
    }

    #[tokio::test]
    async fn network_failure_surfaces_provider_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so that requests fail with ECONNREFUSED
        let url = format!("http://{addr}");

        let http = transport(2);
        let err = http.send("conn-1", http.request(Method::GET, &url)).await.unwrap_err();

        assert!(matches!(err, CalSyncError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn quota_ceiling_fails_fast_without_calling_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let http = RateLimitedHttp::builder()
            .min_spacing(Duration::ZERO)
            .quota(1, Duration::from_secs(60))
            .build()
            .unwrap();

        http.send("conn-1", http.request(Method::GET, &server.uri())).await.unwrap();
        let err = http.send("conn-1", http.request(Method::GET, &server.uri())).await.unwrap_err();
        assert!(matches!(err, CalSyncError::RateLimitExceeded(_)));
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let http = RateLimitedHttp::builder()
            .base_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(350))
            .build()
            .unwrap();

        assert_eq!(http.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(http.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(http.backoff_delay(3), Duration::from_millis(350));

        let throttled = Retryable::Throttled { retry_after: Some(Duration::from_secs(10)) };
        assert_eq!(http.retry_delay(1, &throttled), Duration::from_millis(350));
        let delay = http.retry_delay(1, &Retryable::Unavailable("503".into()));
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(150));
    }
}
