//! Sync configuration and its fluent builder.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::retry::RetryConfig;

/// Configuration for the sync engine and its scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Blocks behind the tip before a block is ingested.
    pub confirmation_depth: u64,
    /// How far behind the tip to start when no checkpoint exists.
    pub initial_depth: u64,
    /// Maximum number of blocks ingested per cycle.
    pub batch_size: u64,
    /// Time between scheduler triggers.
    pub poll_interval: Duration,
    /// RPC retry settings.
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 10,
            initial_depth: 50,
            batch_size: 5,
            poll_interval: Duration::from_secs(20),
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry max_attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`SyncConfig`].
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn initial_depth(mut self, depth: u64) -> Self {
        self.config.initial_depth = depth;
        self
    }

    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the RPC attempt ceiling (first try included).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Set the base delay of the exponential backoff.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
