//! Sync engine configuration.

use crate::{error::Result, Error};
use std::time::Duration;

/// Smallest accepted sync delta; wire timestamps lose up to a second.
pub const MIN_SYNC_DELTA: Duration = Duration::from_secs(1);

/// Default sync delta.
pub const DEFAULT_SYNC_DELTA: Duration = Duration::from_secs(2);

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Tolerance window for timestamp comparison
    pub sync_delta: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_delta: DEFAULT_SYNC_DELTA,
        }
    }
}

impl SyncConfig {
    /// Create a config with the given tolerance.
    pub fn new(sync_delta: Duration) -> Result<Self> {
        Self::default().with_sync_delta(sync_delta)
    }

    /// Set the tolerance window.
    pub fn with_sync_delta(mut self, sync_delta: Duration) -> Result<Self> {
        if sync_delta < MIN_SYNC_DELTA {
            return Err(Error::InvalidConfig(format!(
                "sync delta must be at least {}s, got {}ms",
                MIN_SYNC_DELTA.as_secs(),
                sync_delta.as_millis()
            )));
        }
        self.sync_delta = sync_delta;
        Ok(self)
    }
}
