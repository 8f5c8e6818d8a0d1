//! Configuration schema definitions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration schema
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigSchema {
    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl ConfigSchema {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.tracking.validate()?;
        self.bridge.validate()?;
        self.remote.validate()?;
        Ok(())
    }
}

/// Position sampling cadence and stationary detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Desired interval between position fixes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Fastest interval the provider may deliver at
    #[serde(default = "default_min_update_interval_secs")]
    pub min_update_interval_secs: u64,

    /// Minimum displacement before the provider emits a fix (0 = heartbeat)
    #[serde(default)]
    pub min_distance_meters: f64,

    /// Request high-accuracy (GPS) fixes
    #[serde(default = "default_true")]
    pub high_accuracy: bool,

    /// Hold the first fix until the provider reports an accurate one
    #[serde(default = "default_true")]
    pub wait_for_accurate_location: bool,

    /// Per-axis tolerance, in degrees, for treating two fixes as the same spot
    #[serde(default = "default_stationary_epsilon")]
    pub stationary_epsilon_deg: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_update_interval_secs: default_min_update_interval_secs(),
            min_distance_meters: 0.0,
            high_accuracy: true,
            wait_for_accurate_location: true,
            stationary_epsilon_deg: default_stationary_epsilon(),
        }
    }
}

impl TrackingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_secs(self.min_update_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::config_invalid("tracking.interval_secs cannot be zero"));
        }
        if self.min_update_interval_secs == 0 {
            return Err(Error::config_invalid(
                "tracking.min_update_interval_secs cannot be zero",
            ));
        }
        if self.min_update_interval_secs > self.interval_secs {
            return Err(Error::config_invalid(
                "tracking.min_update_interval_secs cannot exceed tracking.interval_secs",
            )
            .with_suggestion("Lower min_update_interval_secs or raise interval_secs"));
        }
        if !self.min_distance_meters.is_finite() || self.min_distance_meters < 0.0 {
            return Err(Error::config_invalid(
                "tracking.min_distance_meters must be a non-negative number",
            ));
        }
        if !self.stationary_epsilon_deg.is_finite() || self.stationary_epsilon_deg <= 0.0 {
            return Err(Error::config_invalid(
                "tracking.stationary_epsilon_deg must be a positive number",
            ));
        }
        Ok(())
    }
}

fn default_interval_secs() -> u64 {
    15
}

fn default_min_update_interval_secs() -> u64 {
    5
}

fn default_stationary_epsilon() -> f64 {
    1e-5
}

fn default_true() -> bool {
    true
}

/// UI bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Fallback drain interval for event subscribers
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::config_invalid("bridge.poll_interval_secs cannot be zero"));
        }
        Ok(())
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Local durable state location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".data"))
        .join("driver-tracking")
        .join("location_prefs.json")
}

/// Remote document layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Top-level collection holding one document per identity
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Sub-collection holding the per-sample history
    #[serde(default = "default_history_collection")]
    pub history_collection: String,

    /// Value written to the `status` field
    #[serde(default = "default_status")]
    pub status: String,

    /// Value written to the `isOnDuty` field
    #[serde(default = "default_true")]
    pub on_duty: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            history_collection: default_history_collection(),
            status: default_status(),
            on_duty: true,
        }
    }
}

impl RemoteConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("remote.collection", &self.collection),
            ("remote.history_collection", &self.history_collection),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config_invalid(format!("{name} cannot be empty")));
            }
            if value.contains('/') {
                return Err(Error::config_invalid(format!(
                    "{name} must be a single path segment"
                )));
            }
        }
        Ok(())
    }
}

fn default_collection() -> String {
    "drivers".to_string()
}

fn default_history_collection() -> String {
    "locations".to_string()
}

fn default_status() -> String {
    "active".to_string()
}

/// Logging settings handed to the telemetry crate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,

    /// Optional directory for a daily-rolling log file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
