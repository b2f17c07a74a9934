//! Room registry: creating rooms, issuing access keys, seating and
//! unseating participants.

use tapstake_ledger::Transfer;
use tapstake_protocol::{
    AccessKey, Participant, ParticipantId, Room, RoomEventKind, RoomId,
    RoomKind, RoomStatus, Stars, TransactionKind, UserId,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tapstake_store::{RoomRow, StorageError};
use tracing::{error, info, warn};

use crate::RoomError;
use crate::work::{RoomResult, UnitOfWork};

/// A newly taken seat.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Seat {
    pub(crate) participant_id: ParticipantId,
    pub(crate) participant_count: usize,
    /// This seat was the last free one.
    pub(crate) filled: bool,
}

impl UnitOfWork<'_> {
    /// Stages a new Waiting room. Private kinds get a freshly reserved
    /// access key.
    pub(crate) async fn create_room(
        &mut self,
        kind: RoomKind,
        creator: UserId,
        entry_fee: Stars,
    ) -> RoomResult<RoomId> {
        let policy = self.policy(kind);
        let id = self.tx.next_room_id().await?;
        let access_key = if policy.issues_access_key {
            let mut rng = StdRng::from_rng(&mut rand::rng());
            Some(self.reserve_key(id, || AccessKey::generate(&mut rng)).await?)
        } else {
            None
        };

        let room = Room::new(
            id,
            kind,
            entry_fee,
            policy.capacity,
            creator,
            access_key,
            self.now,
        );
        self.tx.insert_room(RoomRow::new(room));
        self.emit(id, RoomEventKind::Created);
        info!(room = %id, %kind, fee = %entry_fee, creator = %creator, "room created");
        Ok(id)
    }

    /// Draws keys until one is free in the unique column.
    pub(crate) async fn reserve_key(
        &mut self,
        room: RoomId,
        mut draw: impl FnMut() -> AccessKey,
    ) -> RoomResult<AccessKey> {
        let attempts = self.config.key_generation_attempts;
        for attempt in 1..=attempts {
            let key = draw();
            match self.tx.reserve_access_key(&key, room).await {
                Ok(()) => return Ok(key),
                Err(StorageError::UniqueViolation { .. }) => {
                    warn!(room = %room, attempt, "access key collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        error!(room = %room, attempts, "access key space exhausted");
        Err(RoomError::KeyGenerationExhausted(attempts))
    }

    /// Debits the entry fee and seats `user` in a room this unit holds.
    ///
    /// Rejects, in order: a room that is not Waiting, a user already
    /// seated, a full room. The debit comes last, so `InsufficientFunds`
    /// only surfaces for an otherwise valid join. Public seats also set
    /// the user's open-room marker.
    pub(crate) async fn add_participant(
        &mut self,
        room_id: RoomId,
        user: UserId,
    ) -> RoomResult<Seat> {
        let row = self.locked_room(room_id).await?;
        let (kind, fee, status) = (row.room.kind, row.room.entry_fee, row.room.status);
        if status != RoomStatus::Waiting {
            return Err(RoomError::RoomNotJoinable { room: room_id, status });
        }
        if row.participant(user).is_some() {
            return Err(RoomError::AlreadyJoined { room: room_id, user });
        }
        if row.is_full() {
            return Err(RoomError::RoomFull(room_id));
        }

        self.ledger
            .transfer(
                &mut self.tx,
                Transfer::new(
                    user,
                    TransactionKind::Entry,
                    fee,
                    format!("entry to room {room_id}"),
                )
                .for_room(room_id),
            )
            .await?;

        let participant = Participant {
            id: self.tx.next_participant_id().await?,
            room_id,
            user_id: user,
            joined_at: self.now,
            stake: fee,
        };
        let participant_id = participant.id;
        let row = self.tx.room_mut(room_id)?;
        row.participants.push(participant);
        let seat = Seat {
            participant_id,
            participant_count: row.participant_count(),
            filled: row.is_full(),
        };
        if kind == RoomKind::Public {
            self.tx.user_mut(user)?.open_public_room = Some(room_id);
        }

        self.emit(room_id, RoomEventKind::ParticipantJoined { user_id: user });
        info!(
            room = %room_id,
            user = %user,
            count = seat.participant_count,
            filled = seat.filled,
            "participant joined"
        );
        Ok(seat)
    }

    /// Refunds and removes a Waiting room's participant. A room left
    /// empty is canceled.
    pub(crate) async fn remove_participant(
        &mut self,
        room_id: RoomId,
        user: UserId,
    ) -> RoomResult<Stars> {
        let status = self.locked_room(room_id).await?.room.status;
        if status != RoomStatus::Waiting {
            return Err(RoomError::WrongState {
                room: room_id,
                status,
                action: "leave",
            });
        }
        let refunded = self.unseat(room_id, user).await?;
        if self.held(room_id)?.participants.is_empty() {
            self.refund_all_participants(room_id, RoomStatus::Canceled)
                .await?;
        }
        Ok(refunded)
    }

    /// Refunds one participant's stake and drops their seat, whatever the
    /// room's status. Callers check the status.
    pub(crate) async fn unseat(
        &mut self,
        room_id: RoomId,
        user: UserId,
    ) -> RoomResult<Stars> {
        let stake = self
            .held(room_id)?
            .participant(user)
            .map(|p| p.stake)
            .ok_or(RoomError::NotParticipant { room: room_id, user })?;

        self.ledger
            .transfer(
                &mut self.tx,
                Transfer::new(
                    user,
                    TransactionKind::Refund,
                    stake,
                    format!("left room {room_id}"),
                )
                .for_room(room_id),
            )
            .await?;
        self.tx
            .room_mut(room_id)?
            .participants
            .retain(|p| p.user_id != user);
        self.tx.user_mut(user)?.release(room_id);

        self.emit(room_id, RoomEventKind::ParticipantLeft { user_id: user });
        info!(room = %room_id, user = %user, %stake, "participant left");
        Ok(stake)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tapstake_ledger::Ledger;
    use tapstake_protocol::SystemClock;
    use tapstake_store::Store;

    use super::*;
    use crate::RoomConfig;

    /// A ledger whose store already holds a committed private room keyed
    /// `taken`.
    async fn ledger_with_room_keyed(config: &RoomConfig, taken: &AccessKey) -> Ledger {
        let ledger = Ledger::new(Store::in_memory().await.unwrap(), Arc::new(SystemClock));
        let creator = ledger.open_account(false).await.unwrap();

        let mut work = UnitOfWork::begin(&ledger, config).await.unwrap();
        let id = work.tx.next_room_id().await.unwrap();
        let key = work.reserve_key(id, || taken.clone()).await.unwrap();
        let room = Room::new(
            id,
            RoomKind::Private,
            Stars::whole(20),
            config.private.capacity,
            creator,
            Some(key),
            work.now,
        );
        work.tx.insert_room(RoomRow::new(room));
        work.commit().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_reserve_key_gives_up_after_configured_attempts() {
        let config = RoomConfig {
            key_generation_attempts: 4,
            ..RoomConfig::default()
        };
        let taken = AccessKey::parse("TAKEN1").unwrap();
        let ledger = ledger_with_room_keyed(&config, &taken).await;

        let mut work = UnitOfWork::begin(&ledger, &config).await.unwrap();
        let mut draws = 0;
        let err = work
            .reserve_key(RoomId(2), || {
                draws += 1;
                taken.clone()
            })
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::KeyGenerationExhausted(4));
        assert_eq!(draws, 4);
    }

    #[tokio::test]
    async fn test_reserve_key_redraws_on_collision() {
        let config = RoomConfig::default();
        let taken = AccessKey::parse("TAKEN1").unwrap();
        let free = AccessKey::parse("FREE22").unwrap();
        let ledger = ledger_with_room_keyed(&config, &taken).await;

        let mut work = UnitOfWork::begin(&ledger, &config).await.unwrap();
        let mut keys = vec![free.clone(), taken.clone()];
        let key = work
            .reserve_key(RoomId(2), || keys.pop().unwrap())
            .await
            .unwrap();
        assert_eq!(key, free);
        // Claimed for the rest of this unit.
        let err = work.reserve_key(RoomId(3), || free.clone()).await.unwrap_err();
        assert!(matches!(err, RoomError::KeyGenerationExhausted(_)));

        drop(work);
        let mut work = UnitOfWork::begin(&ledger, &config).await.unwrap();
        assert_eq!(work.reserve_key(RoomId(4), || free.clone()).await.unwrap(), free);
    }
}
