//! Configuration loading and schema definitions
//!
//! One TOML file configures sampling cadence, stationary detection, the UI
//! bridge, local storage and the remote document layout.

mod loader;
mod schema;

pub use loader::Config;
pub use schema::*;
