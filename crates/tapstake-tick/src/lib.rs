//! Fixed-interval scheduler for TapStake background jobs.
//!
//! The room engine needs a slow, steady heartbeat rather than a game loop:
//! expiring time-boxed rooms and starting rooms whose countdown ran out.
//! [`IntervalScheduler`] provides it with a jittered start and overrun
//! handling.
//!
//! # Integration
//!
//! The scheduler sits inside a task's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         _tick = scheduler.wait_for_tick() => {
//!             manager.sweep_expired().await;
//!             scheduler.record_run_end();
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick fires late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Forget the missed ticks and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence. Missed ticks fire back to back.
    Drop,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct IntervalConfig {
    /// Time between ticks.
    pub interval: Duration,
    pub policy: OverrunPolicy,
    /// Fraction of `interval` (0.0–1.0) a run may take before a warning.
    pub budget_warn_threshold: f64,
    /// Upper bound of the random delay added to the first tick.
    pub initial_jitter: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            policy: OverrunPolicy::default(),
            budget_warn_threshold: 0.80,
            initial_jitter: Duration::from_secs(1),
        }
    }
}

impl IntervalConfig {
    /// Shortest accepted interval.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    /// A config firing every `interval`, other settings default.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`IntervalScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// One fired tick, returned by [`IntervalScheduler::wait_for_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Starts at 1.
    pub count: u64,
    /// How far past its deadline the tick fired.
    pub late_by: Duration,
    /// Fired more than 10% of an interval late.
    pub overrun: bool,
    /// Whole intervals skipped because of the delay (Skip policy only).
    pub skipped: u64,
}

/// Counters updated as ticks fire and runs finish.
#[derive(Debug, Clone, Default)]
pub struct IntervalMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    pub max_run_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fires at a fixed interval.
#[derive(Debug)]
pub struct IntervalScheduler {
    config: IntervalConfig,
    next_tick: Instant,
    run_start: Option<Instant>,
    tick_count: u64,
    metrics: IntervalMetrics,
}

impl IntervalScheduler {
    /// Creates a scheduler whose first tick is one interval away, plus a
    /// random share of `initial_jitter`.
    pub fn new(config: IntervalConfig) -> Self {
        let config = config.validated();
        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max))
        };
        debug!(
            interval_ms = config.interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            policy = ?config.policy,
            "interval scheduler created"
        );
        Self {
            next_tick: Instant::now() + config.interval + jitter,
            config,
            run_start: None,
            tick_count: 0,
            metrics: IntervalMetrics::default(),
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self::new(IntervalConfig::every(interval))
    }

    /// Waits for the next tick. Cancel-safe: dropping the future before
    /// it resolves leaves the schedule untouched.
    pub async fn wait_for_tick(&mut self) -> Tick {
        let deadline = self.next_tick;
        time::sleep_until(deadline).await;

        let now = Instant::now();
        let interval = self.config.interval;
        self.tick_count += 1;
        self.run_start = Some(now);

        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > interval / 10;
        let mut skipped = 0;

        self.next_tick = match self.config.policy {
            OverrunPolicy::Skip => {
                if overrun {
                    skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
                    warn!(
                        tick = self.tick_count,
                        skipped,
                        late_ms = late_by.as_millis() as u64,
                        "tick fired late, skipping ahead"
                    );
                }
                now + interval
            }
            OverrunPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_millis() as u64,
                        "tick fired late, keeping cadence"
                    );
                }
                deadline + interval
            }
        };

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += skipped;
        if overrun {
            self.metrics.total_overruns += 1;
        }
        trace!(tick = self.tick_count, overrun, "tick fired");

        Tick {
            count: self.tick_count,
            late_by,
            overrun,
            skipped,
        }
    }

    /// Records that the work for the current tick is done.
    ///
    /// Warns when the run used more than the configured share of the
    /// interval. Does nothing if no tick is in progress.
    pub fn record_run_end(&mut self) {
        let Some(start) = self.run_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let interval = self.config.interval;
        let utilization = elapsed.as_secs_f64() / interval.as_secs_f64();

        if utilization >= 1.0 {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "run took longer than the interval"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "run approaching the interval"
            );
        }

        self.metrics.max_run_time = self.metrics.max_run_time.max(elapsed);
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn metrics(&self) -> &IntervalMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_clamps_interval_and_threshold() {
        let config = IntervalConfig {
            interval: Duration::ZERO,
            budget_warn_threshold: 3.0,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.interval, IntervalConfig::MIN_INTERVAL);
        assert_eq!(config.budget_warn_threshold, 1.0);
    }

    #[test]
    fn test_policy_names() {
        let policy: OverrunPolicy = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(policy, OverrunPolicy::Drop);
        assert_eq!(serde_json::to_string(&OverrunPolicy::Skip).unwrap(), "\"skip\"");
    }
}
