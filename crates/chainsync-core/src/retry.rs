//! Classified retry with exponential backoff for chain RPC calls.
//!
//! Only failures tagged with a retriable [`RpcErrorKind`](crate::error::RpcErrorKind)
//! are retried. The delay before retry `n` (zero-based) is
//! `base_delay * 2^n`, and the actual waiting goes through an injectable
//! [`Sleeper`] so tests never touch the clock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry policy shared by the engine and the reorg resolver.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(config: RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before the retry that follows failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// attempt ceiling is reached. The last error is returned on failure.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() => {
                    tracing::error!(call = label, error = %e, "RPC call failed with a non-retriable error");
                    return Err(e);
                }
                Err(e) => {
                    let tried = attempt + 1;
                    if tried >= max {
                        tracing::error!(
                            call = label,
                            attempts = tried,
                            error = %e,
                            "RPC call failed after exhausting all retries"
                        );
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        call = label,
                        attempt = tried,
                        max_attempts = max,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "RPC call failed (attempt {tried}/{max}), retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt = tried;
                }
            }
        }
    }
}
