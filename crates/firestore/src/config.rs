//! Configuration for the Firestore client
//!
//! Supports environment-based configuration with sensible defaults, and the
//! local Firestore emulator.

use crate::error::{FirestoreError, FirestoreResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracking_core::retry::{CircuitBreakerConfig, RetryConfig};

/// Production REST endpoint
const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Database id Firebase projects get by default
const DEFAULT_DATABASE: &str = "(default)";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    /// Google Cloud / Firebase project id
    pub project_id: String,
    /// Database id within the project
    pub database_id: String,
    /// OAuth2 bearer token (service account or user credential)
    pub access_token: Option<String>,
    /// Web API key, sent as the `key` query parameter
    pub api_key: Option<String>,
    /// `host:port` of a Firestore emulator; switches to plain HTTP
    pub emulator_host: Option<String>,
    /// Request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl FirestoreConfig {
    /// Create a configuration for a project with production defaults
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: DEFAULT_DATABASE.to_string(),
            access_token: None,
            api_key: None,
            emulator_host: None,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::patient(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Reads the following environment variables:
    /// - `FIRESTORE_PROJECT_ID` or `GOOGLE_CLOUD_PROJECT`: project id (required)
    /// - `FIRESTORE_DATABASE`: database id (optional, `(default)`)
    /// - `FIRESTORE_TOKEN`: OAuth2 bearer token
    /// - `FIREBASE_API_KEY`: web API key
    /// - `FIRESTORE_EMULATOR_HOST`: emulator `host:port`
    /// - `FIRESTORE_TIMEOUT_SECS`: request timeout in seconds
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = env::var("FIRESTORE_PROJECT_ID")
            .or_else(|_| env::var("GOOGLE_CLOUD_PROJECT"))
            .map_err(|_| FirestoreError::missing_env("FIRESTORE_PROJECT_ID"))?;

        let mut config = Self::new(project_id);

        if let Ok(database) = env::var("FIRESTORE_DATABASE") {
            config.database_id = database;
        }
        config.access_token = env::var("FIRESTORE_TOKEN").ok();
        config.api_key = env::var("FIREBASE_API_KEY").ok();

        if let Ok(host) = env::var("FIRESTORE_EMULATOR_HOST") {
            config = config.with_emulator(host);
        }

        if let Some(timeout) = env::var("FIRESTORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
        {
            config.timeout = timeout;
        }

        Ok(config)
    }

    /// Point at a local emulator with short timeouts and quick retries
    #[must_use]
    pub fn with_emulator(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self.timeout = Duration::from_secs(10);
        self.retry = RetryConfig::quick();
        self
    }

    /// Builder-style method to set database id
    #[must_use]
    pub fn with_database(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    /// Builder-style method to set bearer token
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Builder-style method to set API key
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Builder-style method to set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder-style method to set retry config
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builder-style method to set circuit breaker config
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// REST root, e.g. `https://firestore.googleapis.com/v1`
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.emulator_host {
            Some(ref host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => DEFAULT_BASE_URL.to_string(),
        }
    }

    /// `projects/{project}/databases/{database}/documents`
    #[must_use]
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }

    /// Absolute URL of the `commit` RPC
    #[must_use]
    pub fn commit_url(&self) -> String {
        format!("{}/{}:commit", self.base_url(), self.documents_root())
    }

    /// Validate the configuration
    pub fn validate(&self) -> FirestoreResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(FirestoreError::config("project_id cannot be empty"));
        }

        if self.database_id.trim().is_empty() {
            return Err(FirestoreError::config("database_id cannot be empty"));
        }

        if self.project_id.contains('/') || self.database_id.contains('/') {
            return Err(FirestoreError::config(
                "project_id and database_id cannot contain '/'",
            ));
        }

        if self.timeout.is_zero() {
            return Err(FirestoreError::config("timeout cannot be zero"));
        }

        if self.retry.max_attempts == 0 {
            return Err(FirestoreError::config("retry.max_attempts cannot be zero"));
        }

        Ok(())
    }
}
