//! `TapstakeServer` builder and run loop.
//!
//! Ties the layers together: SQLite store → ledger → room manager, with
//! events fanned out over a broadcast channel and a background sweeper.

use std::future::Future;
use std::sync::Arc;

use tapstake_protocol::{Clock, RoomEvent, SystemClock};
use tapstake_room::RoomManager;
use tapstake_store::Store;
use tapstake_tick::IntervalConfig;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::sweeper::{SweeperHandle, spawn_sweeper};
use crate::{AppConfig, BroadcastSink, TapstakeError};

/// Events buffered per subscriber before the slowest one starts lagging.
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Builder for configuring a Tapstake engine.
///
/// # Example
///
/// ```rust,ignore
/// let server = TapstakeServer::builder()
///     .config(AppConfig::load())
///     .build()
///     .await?;
/// server.run(tokio::signal::ctrl_c().map(|_| ())).await
/// ```
pub struct TapstakeServerBuilder {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    event_capacity: usize,
}

impl TapstakeServerBuilder {
    /// Creates a builder with default configuration and the system clock.
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            clock: Arc::new(SystemClock),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the clock, e.g. with a `ManualClock` in tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validates the configuration, opens the database and wires the
    /// engine.
    pub async fn build(self) -> Result<TapstakeServer, TapstakeError> {
        self.config.validate()?;
        let store = Store::open(self.config.store.clone()).await?;
        let events = BroadcastSink::new(self.event_capacity);
        let manager = RoomManager::with_events(
            store,
            self.config.rooms,
            self.clock,
            Arc::new(events.clone()),
        );
        Ok(TapstakeServer {
            manager: Arc::new(manager),
            events,
            sweep: self.config.sweep,
        })
    }
}

impl Default for TapstakeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired Tapstake engine.
///
/// Callers drive room operations through [`manager`](Self::manager);
/// [`run`](Self::run) keeps the sweeper going until shutdown.
#[derive(Debug)]
pub struct TapstakeServer {
    manager: Arc<RoomManager>,
    events: BroadcastSink,
    sweep: IntervalConfig,
}

impl TapstakeServer {
    pub fn builder() -> TapstakeServerBuilder {
        TapstakeServerBuilder::new()
    }

    pub fn manager(&self) -> &Arc<RoomManager> {
        &self.manager
    }

    /// Receives every room event committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Starts the background sweeper.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(Arc::clone(&self.manager), self.sweep.clone())
    }

    /// Checks the ledger, then runs the sweeper until `shutdown` resolves.
    ///
    /// Refuses to start if any account's balance disagrees with its ledger.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), TapstakeError> {
        let accounts = self.manager.ledger().reconcile_all().await.map_err(|e| {
            error!(error = %e, "ledger reconciliation failed at startup");
            e
        })?;
        info!(accounts = accounts.len(), "tapstake engine running");

        let sweeper = self.spawn_sweeper();
        shutdown.await;
        info!("shutdown requested");
        sweeper.shutdown().await;
        self.manager.store().close().await;
        info!("tapstake engine stopped");
        Ok(())
    }
}
