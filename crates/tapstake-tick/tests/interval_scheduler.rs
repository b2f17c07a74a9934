//! Integration tests for the interval scheduler.
//!
//! Every async test runs on a paused clock: sleeps resolve as soon as the
//! runtime is idle, and `time::advance` simulates slow work.

use std::time::Duration;

use tapstake_tick::{IntervalConfig, IntervalScheduler, OverrunPolicy};
use tokio::time::{self, Instant};

// =========================================================================
// Helpers
// =========================================================================

const INTERVAL: Duration = Duration::from_secs(10);

fn config(policy: OverrunPolicy) -> IntervalConfig {
    IntervalConfig {
        interval: INTERVAL,
        policy,
        initial_jitter: Duration::ZERO,
        ..Default::default()
    }
}

// =========================================================================
// Creation
// =========================================================================

#[test]
fn test_default_config() {
    let cfg = IntervalConfig::default();
    assert_eq!(cfg.interval, Duration::from_secs(60));
    assert_eq!(cfg.policy, OverrunPolicy::Skip);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_initial_state() {
    let s = IntervalScheduler::new(config(OverrunPolicy::Skip));
    assert_eq!(s.tick_count(), 0);
    assert_eq!(s.interval(), INTERVAL);
    assert_eq!(s.metrics().total_ticks, 0);
}

// =========================================================================
// Ticking
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_ticks_fire_every_interval() {
    let mut s = IntervalScheduler::new(config(OverrunPolicy::Skip));
    let start = Instant::now();

    let first = s.wait_for_tick().await;
    assert_eq!(first.count, 1);
    assert!(!first.overrun);
    assert_eq!(start.elapsed(), INTERVAL);

    let second = s.wait_for_tick().await;
    assert_eq!(second.count, 2);
    assert_eq!(start.elapsed(), INTERVAL * 2);
    assert_eq!(s.metrics().total_ticks, 2);
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_jitter_is_bounded() {
    let jitter = Duration::from_millis(500);
    let mut s = IntervalScheduler::new(IntervalConfig {
        initial_jitter: jitter,
        ..config(OverrunPolicy::Skip)
    });
    let start = Instant::now();
    s.wait_for_tick().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= INTERVAL);
    assert!(elapsed < INTERVAL + jitter);
}

// =========================================================================
// Overruns
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_skip_policy_skips_missed_ticks() {
    let mut s = IntervalScheduler::new(config(OverrunPolicy::Skip));
    s.wait_for_tick().await; // t = 10, next due at 20

    time::advance(Duration::from_secs(35)).await; // t = 45
    let late = s.wait_for_tick().await;
    assert!(late.overrun);
    assert_eq!(late.late_by, Duration::from_secs(25));
    assert_eq!(late.skipped, 2);

    // Rescheduled from now, not from the missed deadline.
    let start = Instant::now();
    let next = s.wait_for_tick().await;
    assert!(!next.overrun);
    assert_eq!(start.elapsed(), INTERVAL);

    assert_eq!(s.metrics().total_overruns, 1);
    assert_eq!(s.metrics().total_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_cadence() {
    let mut s = IntervalScheduler::new(config(OverrunPolicy::Drop));
    s.wait_for_tick().await; // t = 10, next due at 20

    time::advance(Duration::from_secs(25)).await; // t = 35
    let late = s.wait_for_tick().await;
    assert!(late.overrun);
    assert_eq!(late.skipped, 0);

    // The tick due at 30 is already past, so it fires right away.
    let start = Instant::now();
    let caught_up = s.wait_for_tick().await;
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(caught_up.late_by, Duration::from_secs(5));

    // Back on the original grid: next due at 40.
    let on_time = s.wait_for_tick().await;
    assert!(!on_time.overrun);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

// =========================================================================
// Run budget
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_record_run_end_tracks_run_time() {
    let mut s = IntervalScheduler::new(config(OverrunPolicy::Skip));
    s.wait_for_tick().await;
    time::advance(Duration::from_secs(9)).await;
    s.record_run_end();

    assert_eq!(s.metrics().max_run_time, Duration::from_secs(9));

    // A shorter run does not lower the maximum.
    s.wait_for_tick().await;
    time::advance(Duration::from_secs(2)).await;
    s.record_run_end();
    assert_eq!(s.metrics().max_run_time, Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn test_record_run_end_without_tick_is_noop() {
    let mut s = IntervalScheduler::new(config(OverrunPolicy::Skip));
    s.record_run_end();
    assert_eq!(s.metrics().max_run_time, Duration::ZERO);

    s.wait_for_tick().await;
    s.record_run_end();
    time::advance(Duration::from_secs(5)).await;
    // Second call for the same tick is ignored.
    s.record_run_end();
    assert_eq!(s.metrics().max_run_time, Duration::ZERO);
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_abandoned_wait_keeps_schedule() {
    let mut s = IntervalScheduler::new(config(OverrunPolicy::Skip));
    let start = Instant::now();

    // A select! branch losing the race drops the pending wait.
    let waited = time::timeout(INTERVAL / 2, s.wait_for_tick()).await;
    assert!(waited.is_err());
    assert_eq!(s.tick_count(), 0);

    let tick = s.wait_for_tick().await;
    assert_eq!(tick.count, 1);
    assert!(!tick.overrun);
    assert_eq!(start.elapsed(), INTERVAL);
}
