//! The background task that expires and starts rooms on a timer.

use std::sync::Arc;

use tapstake_room::RoomManager;
use tapstake_tick::{IntervalConfig, IntervalScheduler};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A running sweeper. Dropping the handle leaves the task running; call
/// [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the task and waits for it to finish its current pass.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "sweeper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a task calling [`RoomManager::sweep_expired`] once per tick.
pub fn spawn_sweeper(manager: Arc<RoomManager>, config: IntervalConfig) -> SweeperHandle {
    let (stop, stopped) = watch::channel(false);
    let scheduler = IntervalScheduler::new(config);
    let task = tokio::spawn(run(manager, scheduler, stopped));
    SweeperHandle { stop, task }
}

async fn run(
    manager: Arc<RoomManager>,
    mut scheduler: IntervalScheduler,
    mut stopped: watch::Receiver<bool>,
) {
    info!(interval_secs = scheduler.interval().as_secs(), "sweeper started");
    loop {
        tokio::select! {
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
            }
            tick = scheduler.wait_for_tick() => {
                let report = manager.sweep_expired().await;
                scheduler.record_run_end();
                debug!(tick = tick.count, ?report, "sweep pass done");
            }
        }
    }
    let metrics = scheduler.metrics();
    info!(
        ticks = metrics.total_ticks,
        overruns = metrics.total_overruns,
        skipped = metrics.total_skipped,
        max_run_ms = metrics.max_run_time.as_millis() as u64,
        "sweeper stopped"
    );
}
