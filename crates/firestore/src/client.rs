//! Firestore REST client

use crate::config::FirestoreConfig;
use crate::documents::{CommitRequest, CommitResponse, DocumentWrite};
use crate::error::{FirestoreError, FirestoreResult};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use tracking_core::retry::{CircuitBreaker, CircuitState};
use uuid::Uuid;

/// Request correlation ID header
const X_REQUEST_ID: &str = "X-Request-ID";

/// Firestore client with built-in resilience patterns
///
/// This client wraps `reqwest` and adds:
/// - Automatic retry with exponential backoff
/// - Circuit breaker to prevent hammering an unreachable backend
/// - Request correlation IDs for tracing
#[derive(Clone)]
pub struct FirestoreClient {
    inner: Client,
    config: Arc<FirestoreConfig>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl FirestoreClient {
    /// Create a new client with configuration from environment
    pub fn new() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::with_config(config)
    }

    /// Create a new client with specific configuration
    pub fn with_config(config: FirestoreConfig) -> FirestoreResult<Self> {
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("driver-tracking/", env!("CARGO_PKG_VERSION"))),
        );

        if let Some(ref token) = config.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| FirestoreError::config("access token is not a valid header value"))?;
            default_headers.insert(AUTHORIZATION, value);
        }

        let inner = Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers)
            .build()
            .map_err(FirestoreError::Request)?;

        let circuit_breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));

        Ok(Self {
            inner,
            config: Arc::new(config),
            circuit_breaker,
        })
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Get circuit breaker state
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Reset the circuit breaker
    pub fn reset_circuit(&self) {
        self.circuit_breaker.reset();
    }

    /// Apply a single write
    pub async fn write(&self, write: &DocumentWrite) -> FirestoreResult<CommitResponse> {
        self.commit(std::slice::from_ref(write)).await
    }

    /// Atomically apply a batch of writes through the `commit` RPC
    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    pub async fn commit(&self, writes: &[DocumentWrite]) -> FirestoreResult<CommitResponse> {
        let request_id = Uuid::new_v4().to_string();

        if !self.circuit_breaker.can_execute() {
            warn!(request_id = %request_id, "Circuit breaker is open, rejecting commit");
            return Err(FirestoreError::CircuitOpen);
        }

        let root = self.config.documents_root();
        let body = CommitRequest {
            writes: writes.iter().map(|w| w.to_wire(&root)).collect(),
        };

        self.execute_with_retry(&request_id, &body).await
    }

    /// Execute the commit with retry logic
    async fn execute_with_retry(
        &self,
        request_id: &str,
        body: &CommitRequest,
    ) -> FirestoreResult<CommitResponse> {
        let retry_config = &self.config.retry;
        let mut last_error: Option<FirestoreError> = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                let delay = retry_config.delay_for_attempt(attempt);
                debug!(
                    request_id = %request_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            let result = match retry_config.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, self.execute_single(request_id, body))
                    .await
                    .unwrap_or(Err(FirestoreError::Timeout(limit))),
                None => self.execute_single(request_id, body).await,
            };
            let elapsed = start.elapsed();

            match result {
                Ok(value) => {
                    self.circuit_breaker.record_success();
                    debug!(
                        request_id = %request_id,
                        attempt = attempt + 1,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Commit succeeded"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    // 4xx means the backend is healthy and said no
                    if !e.is_client_error() {
                        self.circuit_breaker.record_failure();
                    }

                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        debug!(
                            request_id = %request_id,
                            attempt = attempt + 1,
                            error = %e,
                            "Commit failed, will retry"
                        );
                        last_error = Some(e);
                    } else {
                        debug!(
                            request_id = %request_id,
                            attempt = attempt + 1,
                            error = %e,
                            "Commit failed, not retrying"
                        );
                        return Err(e);
                    }
                }
            }
        }

        Err(FirestoreError::RetriesExhausted {
            attempts: retry_config.max_attempts,
            last_error: last_error.map_or_else(|| "Unknown error".to_string(), |e| e.to_string()),
        })
    }

    /// Execute a single request without retry
    async fn execute_single(
        &self,
        request_id: &str,
        body: &CommitRequest,
    ) -> FirestoreResult<CommitResponse> {
        let mut request = self
            .inner
            .post(self.config.commit_url())
            .header(X_REQUEST_ID, request_id)
            .json(body);

        if let Some(ref key) = self.config.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle HTTP response and deserialize
    async fn handle_response(response: Response) -> FirestoreResult<CommitResponse> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(FirestoreError::Request)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FirestoreError::from_response(status.as_u16(), &body))
        }
    }
}
