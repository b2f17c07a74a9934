//! One engine operation's transaction plus the events it will publish.
//!
//! The engine's building blocks (registry, lifecycle, matchmaker,
//! settlement) are `impl UnitOfWork` blocks in their own modules. They
//! compose inside a single transaction: a join that fills a room seats the
//! player, debits the stake and starts the countdown in one commit.

use chrono::{DateTime, Utc};
use tapstake_ledger::Ledger;
use tapstake_protocol::{RoomEvent, RoomEventKind, RoomId, RoomKind};
use tapstake_store::{RoomRow, StorageError, Tx};

use crate::{RoomConfig, RoomError, RoomLookup, RoomPolicy};

pub(crate) type RoomResult<T> = Result<T, RoomError>;

pub(crate) struct UnitOfWork<'a> {
    pub(crate) tx: Tx,
    pub(crate) ledger: &'a Ledger,
    pub(crate) config: &'a RoomConfig,
    /// Fixed for the whole operation.
    pub(crate) now: DateTime<Utc>,
    events: Vec<RoomEvent>,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) async fn begin(ledger: &'a Ledger, config: &'a RoomConfig) -> RoomResult<Self> {
        let tx = ledger.store().begin().await?;
        Ok(Self {
            tx,
            ledger,
            config,
            now: ledger.now(),
            events: Vec::new(),
        })
    }

    pub(crate) fn policy(&self, kind: RoomKind) -> &'a RoomPolicy {
        self.config.policy(kind)
    }

    /// Loads a room as stored, or fails with `RoomNotFound`. Operations
    /// go through [`current_room`](Self::current_room) instead.
    pub(crate) async fn locked_room(&mut self, id: RoomId) -> RoomResult<&RoomRow> {
        self.tx
            .room(id)
            .await?
            .ok_or(RoomError::RoomNotFound(RoomLookup::Id(id)))
    }

    /// A room this unit already holds.
    pub(crate) fn held(&self, id: RoomId) -> RoomResult<&RoomRow> {
        self.tx
            .held_room(id)
            .ok_or(RoomError::Storage(StorageError::NotLocked {
                table: "rooms",
                id: id.0,
            }))
    }

    /// Queues an event describing the room's current (staged) state.
    pub(crate) fn emit(&mut self, id: RoomId, kind: RoomEventKind) {
        if let Some(row) = self.tx.held_room(id) {
            let event = RoomEvent {
                room_id: id,
                status: row.room.status,
                participant_count: row.participant_count(),
                at: self.now,
                kind,
            };
            self.events.push(event);
        }
    }

    /// Commits and hands back the events to publish.
    pub(crate) async fn commit(self) -> RoomResult<Vec<RoomEvent>> {
        self.tx.commit().await?;
        Ok(self.events)
    }
}
