//! Room manager: the engine's public entry point.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tapstake_ledger::Ledger;
use tapstake_protocol::{
    AccessKey, Clock, DisconnectOutcome, JoinOutcome, LeaveOutcome,
    PayoutSummary, PrivateRoomCreated, RefundSummary, RoomEvent, RoomId,
    RoomKind, RoomSnapshot, RoomStatus, Stars, SweepReport, UserId,
};
use tapstake_store::{RoomRow, RoomSummary, Store};
use tracing::{debug, error, info, warn};

use crate::lifecycle::{CaughtUp, StartResult};
use crate::work::{RoomResult, UnitOfWork};
use crate::{EventSink, NullSink, RoomConfig, RoomError, RoomLookup};

/// Runs every room operation.
///
/// Each call is one transaction: it either commits completely or leaves
/// rooms, seats, balances and the ledger untouched. Transient storage
/// failures (lock timeouts) are retried from scratch up to
/// `max_tx_retries` times. Events are published only after a commit.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct RoomManager {
    store: Store,
    ledger: Ledger,
    config: RoomConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl RoomManager {
    /// Creates a manager that discards events.
    pub fn new(store: Store, config: RoomConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_events(store, config, clock, Arc::new(NullSink))
    }

    pub fn with_events(
        store: Store,
        config: RoomConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let ledger = Ledger::new(store.clone(), Arc::clone(&clock));
        Self {
            store,
            ledger,
            config,
            clock,
            events,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    // -- matchmaking --------------------------------------------------------

    /// Puts `user` into the oldest public room at `fee`, or a new one.
    pub async fn join_or_create(
        &self,
        user: UserId,
        fee: Stars,
    ) -> RoomResult<JoinOutcome> {
        self.with_retry("join_or_create", move || async move {
            let mut work = self.begin().await?;
            let outcome = work.join_or_create(user, fee).await?;
            Ok((outcome, work.commit().await?))
        })
        .await
    }

    /// Opens a private room; the creator is seated and staked.
    pub async fn create_private_room(
        &self,
        creator: UserId,
        fee: Stars,
    ) -> RoomResult<PrivateRoomCreated> {
        self.with_retry("create_private_room", move || async move {
            let mut work = self.begin().await?;
            let created = work.create_private_room(creator, fee).await?;
            Ok((created, work.commit().await?))
        })
        .await
    }

    /// Joins the private room behind `access_key`.
    pub async fn join_by_key(
        &self,
        access_key: &str,
        user: UserId,
        expected_fee: Stars,
    ) -> RoomResult<JoinOutcome> {
        self.with_retry("join_by_key", move || async move {
            let mut work = self.begin().await?;
            let outcome = work.join_by_key(access_key, user, expected_fee).await?;
            Ok((outcome, work.commit().await?))
        })
        .await
    }

    // -- lifecycle ----------------------------------------------------------

    /// Starts a game and returns the new status.
    ///
    /// If a creator starts with too few players the room is canceled and
    /// refunded; that outcome is committed and then reported as
    /// [`RoomError::TooFewParticipants`].
    pub async fn start_game(
        &self,
        room: RoomId,
        requester: UserId,
    ) -> RoomResult<RoomStatus> {
        let result = self
            .with_retry("start_game", move || async move {
                let mut work = self.begin().await?;
                let result = work.start(room, requester).await?;
                Ok((result, work.commit().await?))
            })
            .await?;
        match result {
            StartResult::Started(status) => Ok(status),
            StartResult::Canceled {
                count,
                required,
                refund,
            } => Err(RoomError::TooFewParticipants {
                room,
                count,
                required,
                refund,
            }),
        }
    }

    /// Declares the winner of an Active room and pays out. Idempotent for
    /// the same winner.
    pub async fn finish_game(
        &self,
        room: RoomId,
        winner: UserId,
    ) -> RoomResult<PayoutSummary> {
        self.with_retry("finish_game", move || async move {
            let mut work = self.begin().await?;
            let summary = work.settle(room, winner).await?;
            Ok((summary, work.commit().await?))
        })
        .await
    }

    /// Leaves a Waiting room with a refund.
    pub async fn leave_room(
        &self,
        room: RoomId,
        user: UserId,
    ) -> RoomResult<LeaveOutcome> {
        self.with_retry("leave_room", move || async move {
            let mut work = self.begin().await?;
            let outcome = work.leave(room, user).await?;
            Ok((outcome, work.commit().await?))
        })
        .await
    }

    /// Drops a player lost during the countdown.
    pub async fn report_disconnect(
        &self,
        room: RoomId,
        user: UserId,
    ) -> RoomResult<DisconnectOutcome> {
        self.with_retry("report_disconnect", move || async move {
            let mut work = self.begin().await?;
            let outcome = work.disconnect(room, user).await?;
            Ok((outcome, work.commit().await?))
        })
        .await
    }

    /// Cancels an open room and refunds everyone.
    pub async fn cancel_room(
        &self,
        room: RoomId,
        reason: &str,
    ) -> RoomResult<RefundSummary> {
        self.with_retry("cancel_room", move || async move {
            let mut work = self.begin().await?;
            let summary = work.cancel(room, reason).await?;
            Ok((summary, work.commit().await?))
        })
        .await
    }

    /// One background pass: expires time-boxed Waiting rooms past their
    /// window and starts Preparation rooms whose countdown is over.
    ///
    /// Each room gets its own transaction; a failure on one room is logged,
    /// counted, and left for the next pass.
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let due = match self.due_rooms(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to list rooms to sweep");
                report.failures += 1;
                return report;
            }
        };

        for room in due {
            let result = self
                .with_retry("sweep", move || async move {
                    let mut work = self.begin().await?;
                    let caught_up = work.catch_up(room).await?;
                    Ok((caught_up, work.commit().await?))
                })
                .await;
            match result {
                Ok(CaughtUp::Expired(refund)) => {
                    report.expired_rooms += 1;
                    report.refunded_participants += refund.refunds.len();
                }
                Ok(CaughtUp::Promoted) => report.promoted_rooms += 1,
                Ok(CaughtUp::Current) => debug!(room = %room, "room no longer due"),
                Err(e) => {
                    error!(room = %room, error = %e, "failed to sweep room");
                    report.failures += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                expired = report.expired_rooms,
                refunded = report.refunded_participants,
                promoted = report.promoted_rooms,
                failures = report.failures,
                "sweep finished"
            );
        }
        report
    }

    /// Rooms whose listing says a timed edge is due, expiries first.
    async fn due_rooms(&self, now: DateTime<Utc>) -> RoomResult<Vec<RoomId>> {
        let mut due = Vec::new();
        for kind in RoomKind::ALL {
            let policy = self.config.policy(kind);
            if policy.expiry_window.is_none() {
                continue;
            }
            for summary in self.store.waiting_rooms(kind, None).await? {
                if policy.expired_at(summary.status, summary.created_at, now) {
                    due.push(summary.id);
                }
            }
        }
        for summary in self.store.rooms_with_status(RoomStatus::Preparation).await? {
            let policy = self.config.policy(summary.kind);
            if policy.preparation_due(summary.status, summary.preparation_started_at, now) {
                due.push(summary.id);
            }
        }
        Ok(due)
    }

    // -- reads --------------------------------------------------------------

    /// A committed view of one room.
    pub async fn room(&self, id: RoomId) -> RoomResult<RoomSnapshot> {
        let row = self
            .store
            .room(id)
            .await?
            .ok_or(RoomError::RoomNotFound(RoomLookup::Id(id)))?;
        Ok(self.snapshot(row))
    }

    /// A committed view of the room behind `access_key`.
    pub async fn room_by_key(&self, access_key: &str) -> RoomResult<RoomSnapshot> {
        let key = AccessKey::parse(access_key)?;
        let missing = || RoomError::RoomNotFound(RoomLookup::Key(key.clone()));
        let id = self.store.room_id_for_key(&key).await?.ok_or_else(missing)?;
        let row = self.store.room(id).await?.ok_or_else(missing)?;
        Ok(self.snapshot(row))
    }

    /// Waiting rooms of `kind`, oldest first, expired ones left out.
    pub async fn list_waiting(
        &self,
        kind: RoomKind,
        fee: Option<Stars>,
    ) -> RoomResult<Vec<RoomSummary>> {
        let now = self.clock.now();
        let policy = self.config.policy(kind);
        let waiting = self.store.waiting_rooms(kind, fee).await?;
        Ok(waiting
            .into_iter()
            .filter(|s| !policy.expired_at(s.status, s.created_at, now))
            .collect())
    }

    // -- internals ----------------------------------------------------------

    async fn begin(&self) -> RoomResult<UnitOfWork<'_>> {
        UnitOfWork::begin(&self.ledger, &self.config).await
    }

    fn snapshot(&self, row: RoomRow) -> RoomSnapshot {
        let effective_status = self
            .config
            .policy(row.room.kind)
            .effective_status(&row.room, self.clock.now());
        RoomSnapshot {
            room: row.room,
            participants: row.participants,
            effective_status,
        }
    }

    /// Runs `attempt` until it succeeds, fails for a non-transient reason,
    /// or runs out of retries. Publishes the events of the committed
    /// attempt.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> RoomResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RoomResult<(T, Vec<RoomEvent>)>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Ok((value, events)) => {
                    for event in events {
                        self.events.publish(event);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && retries < self.config.max_tx_retries => {
                    retries += 1;
                    warn!(op, retry = retries, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * retries).await;
                }
                Err(e) => {
                    debug!(op, error = %e, "operation rejected");
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for RoomManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomManager")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
