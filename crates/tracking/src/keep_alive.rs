//! Keep-alive handle
//!
//! While a session is active the host must keep the process scheduled (a
//! foreground service with a visible notification on mobile). The guard
//! releases it on drop, so every exit path out of an active session gives
//! it back.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct KeepAliveError(pub String);

/// Host facility that keeps the process running in the background
pub trait KeepAlive: Send + Sync + 'static {
    fn acquire(&self) -> Result<(), KeepAliveError>;
    fn release(&self);
}

/// For hosts with nothing to hold
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {
    fn acquire(&self) -> Result<(), KeepAliveError> {
        Ok(())
    }

    fn release(&self) {}
}

/// Held keep-alive, released on drop
#[derive(Debug)]
pub struct KeepAliveGuard<K: KeepAlive> {
    keep_alive: Arc<K>,
}

impl<K: KeepAlive> KeepAliveGuard<K> {
    pub fn acquire(keep_alive: Arc<K>) -> Result<Self, KeepAliveError> {
        keep_alive.acquire()?;
        debug!("Keep-alive acquired");
        Ok(Self { keep_alive })
    }
}

impl<K: KeepAlive> Drop for KeepAliveGuard<K> {
    fn drop(&mut self) {
        self.keep_alive.release();
        debug!("Keep-alive released");
    }
}
