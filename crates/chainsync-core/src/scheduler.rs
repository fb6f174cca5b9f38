//! Fixed-interval cycle scheduler with single-flight protection.
//!
//! One cycle runs immediately on start and then once per interval tick. A
//! trigger that fires while a cycle is still in flight is skipped, so at
//! most one invocation runs at a time even when a cycle overruns the
//! interval. The in-flight flag is released by a drop guard, which also
//! covers a panicking cycle.
//!
//! Two schedulers can share one flag through [`CycleScheduler::exclusive_with`],
//! in which case neither starts while the other's cycle is running.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A unit of recurring work. Implementations handle their own errors.
#[async_trait]
pub trait Cycle: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one cycle to completion.
    async fn run_cycle(&self);
}

/// Releases the in-flight flag when dropped.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Triggers a [`Cycle`] on a fixed interval, never overlapping runs.
pub struct CycleScheduler<C: Cycle> {
    cycle: Arc<C>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
}

impl<C: Cycle> CycleScheduler<C> {
    pub fn new(cycle: Arc<C>, interval: Duration) -> Self {
        Self {
            cycle,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share `other`'s in-flight flag, so cycles of the two schedulers never
    /// overlap. A tick that finds the other cycle running is skipped.
    pub fn exclusive_with<D: Cycle>(mut self, other: &CycleScheduler<D>) -> Self {
        self.in_flight = other.in_flight.clone();
        self
    }

    /// Returns `true` while a cycle is running.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> Option<FlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(self.in_flight.clone()))
    }

    fn log_skip(&self) {
        tracing::warn!(
            cycle = self.cycle.name(),
            "Previous processing cycle still running. Skipping this interval"
        );
    }

    /// Run one cycle inline unless one is already in flight.
    /// Returns `false` if the trigger was skipped.
    pub async fn trigger(&self) -> bool {
        let Some(_guard) = self.try_acquire() else {
            self.log_skip();
            return false;
        };
        self.cycle.run_cycle().await;
        true
    }

    /// Claim the in-flight flag now and run the cycle on a new task.
    /// Returns `None` if the trigger was skipped.
    pub fn spawn_trigger(&self) -> Option<JoinHandle<()>> {
        let Some(guard) = self.try_acquire() else {
            self.log_skip();
            return None;
        };
        let cycle = self.cycle.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            cycle.run_cycle().await;
        }))
    }

    /// Trigger immediately and then on every tick until `shutdown` resolves.
    /// A cycle still in flight at shutdown is awaited before returning.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            cycle = self.cycle.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Scheduler started"
        );

        let mut last: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Some(handle) = self.spawn_trigger() {
                        // The flag was free, so the previous task is done or
                        // about to be.
                        if let Some(previous) = last.replace(handle) {
                            self.reap(previous).await;
                        }
                    }
                }
            }
        }

        if let Some(handle) = last {
            self.reap(handle).await;
        }
        tracing::info!(cycle = self.cycle.name(), "Scheduler stopped");
    }

    async fn reap(&self, handle: JoinHandle<()>) {
        if let Err(e) = handle.await {
            tracing::error!(cycle = self.cycle.name(), error = %e, "Cycle task failed");
        }
    }
}
