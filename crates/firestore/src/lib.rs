//! Firestore REST client for the driver tracking service
//!
//! This crate writes location documents to Cloud Firestore through the
//! `documents:commit` RPC, which is the only REST surface that supports
//! server-side timestamps and `exists` preconditions on the same write.
//!
//! # Features
//!
//! - **Environment-based configuration**: project, token, emulator host from environment variables
//! - **Retry with exponential backoff**: Automatic retry for transient failures
//! - **Circuit breaker**: Stop hammering the backend during outages
//! - **Request correlation**: Every commit carries a unique request id
//!
//! # Example
//!
//! ```rust,no_run
//! use tracking_firestore::{DocumentPath, DocumentWrite, Fields, FirestoreClient, WriteMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FirestoreClient::new()?;
//!
//!     let mut fields = Fields::new();
//!     fields.insert("status".into(), "active".into());
//!
//!     let path = DocumentPath::new(["drivers", "alice"])?;
//!     let write = DocumentWrite::new(path, WriteMode::Merge, fields)
//!         .with_server_timestamp("lastUpdate");
//!     client.write(&write).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod documents;
pub mod error;

pub use client::FirestoreClient;
pub use config::FirestoreConfig;
pub use documents::{CommitResponse, DocumentPath, DocumentWrite, Fields, Value, WriteMode};
pub use error::{FirestoreError, FirestoreResult};
