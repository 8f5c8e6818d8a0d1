//! Core utilities for the driver tracking service
//!
//! This crate provides shared functionality used by the tracking crates:
//!
//! - **Error handling**: Errors with codes, context and recovery suggestions
//! - **Retry policy**: Exponential backoff and a circuit breaker for remote writes
//! - **Configuration**: TOML-based configuration with validation
//!
//! # Example
//!
//! ```rust,no_run
//! use tracking_core::config::Config;
//!
//! let config = Config::load(None).expect("invalid configuration");
//! println!("sampling every {:?}", config.schema.tracking.interval());
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod retry;

pub use error::{Error, ErrorCode, Result, ResultExt};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigSchema, TrackingConfig};
    pub use crate::error::{Error, ErrorCode, Result, ResultExt};
    pub use crate::retry::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
}
