//! Getting players into rooms: public auto-match, private rooms by key.

use tapstake_protocol::{
    AccessKey, JoinOutcome, PrivateRoomCreated, RoomKind, RoomStatus, Stars,
    UserId,
};
use tracing::debug;

use crate::work::{RoomResult, UnitOfWork};
use crate::{RoomError, RoomLookup};

impl UnitOfWork<'_> {
    /// Rejects fees the engine does not offer.
    pub(crate) fn check_fee(&self, kind: RoomKind, fee: Stars) -> RoomResult<()> {
        if !fee.is_positive() {
            return Err(RoomError::Validation(format!(
                "entry fee must be positive, got {fee}"
            )));
        }
        let tiers = &self.config.fee_tiers;
        if kind == RoomKind::Public && !tiers.is_empty() && !tiers.contains(&fee) {
            return Err(RoomError::Validation(format!(
                "{fee} is not an offered entry fee"
            )));
        }
        Ok(())
    }

    /// Seats `user` in the oldest open public room at `fee`, creating one
    /// if none has a free seat.
    ///
    /// The listing is read inside the unit's transaction, which holds the
    /// write lock: two players racing for the last seat can never both get
    /// it, and two players finding no room never create two half-empty
    /// ones. A candidate past its expiry window is expired on the way.
    pub(crate) async fn join_or_create(
        &mut self,
        user: UserId,
        fee: Stars,
    ) -> RoomResult<JoinOutcome> {
        self.check_fee(RoomKind::Public, fee)?;

        let candidates = self.tx.waiting_rooms(RoomKind::Public, Some(fee)).await?;
        let mut chosen = None;
        for candidate in candidates {
            if !candidate.has_spare_seat() {
                continue;
            }
            let row = self.current_room(candidate.id).await?;
            if row.room.status == RoomStatus::Waiting && !row.is_full() {
                chosen = Some(candidate.id);
                break;
            }
            debug!(room = %candidate.id, status = %row.room.status, "candidate no longer usable");
        }

        let (room_id, created) = match chosen {
            Some(id) => (id, false),
            None => (self.create_room(RoomKind::Public, user, fee).await?, true),
        };

        let open = self
            .tx
            .user(user)
            .await?
            .ok_or(RoomError::UserNotFound(user))?
            .open_public_room;
        if let Some(open) = open {
            return Err(RoomError::AlreadyInRoom { user, room: open });
        }

        let seat = self.add_participant(room_id, user).await?;
        if seat.filled {
            self.on_filled(room_id)?;
        }
        Ok(JoinOutcome {
            room_id,
            participant_id: seat.participant_id,
            status: self.held(room_id)?.room.status,
            participant_count: seat.participant_count,
            created,
        })
    }

    /// Creates a private room with `creator` seated and staked.
    pub(crate) async fn create_private_room(
        &mut self,
        creator: UserId,
        fee: Stars,
    ) -> RoomResult<PrivateRoomCreated> {
        self.check_fee(RoomKind::Private, fee)?;
        let organizing = self
            .tx
            .user(creator)
            .await?
            .ok_or(RoomError::UserNotFound(creator))?
            .organizing_room;
        if let Some(open) = organizing {
            return Err(RoomError::AlreadyHasOpenRoom {
                user: creator,
                room: open,
            });
        }

        let room_id = self.create_room(RoomKind::Private, creator, fee).await?;
        let seat = self.add_participant(room_id, creator).await?;
        self.tx.user_mut(creator)?.organizing_room = Some(room_id);
        if seat.filled {
            self.on_filled(room_id)?;
        }

        let access_key = self
            .held(room_id)?
            .room
            .access_key
            .clone()
            .ok_or_else(|| {
                RoomError::Validation("private policy must issue access keys".into())
            })?;
        Ok(PrivateRoomCreated {
            room_id,
            access_key,
            participant_id: seat.participant_id,
        })
    }

    /// Seats `user` in the room behind `key`.
    ///
    /// Checks run cheapest-first, and the balance is the last thing
    /// checked: key format, room exists, not expired, still Waiting,
    /// caller is not the organizer, fee matches, not already seated, a
    /// seat is free, the stake is affordable.
    pub(crate) async fn join_by_key(
        &mut self,
        key: &str,
        user: UserId,
        expected_fee: Stars,
    ) -> RoomResult<JoinOutcome> {
        let key = AccessKey::parse(key)?;
        let room_id = self
            .tx
            .room_id_for_key(&key)
            .await?
            .ok_or(RoomError::RoomNotFound(RoomLookup::Key(key)))?;
        let room = self.current_room(room_id).await?.room.clone();

        if room.status == RoomStatus::Expired {
            return Err(RoomError::RoomExpired(room_id));
        }
        if room.status != RoomStatus::Waiting {
            return Err(RoomError::RoomNotJoinable {
                room: room_id,
                status: room.status,
            });
        }
        if room.creator_id == user {
            return Err(RoomError::SelfJoin { room: room_id, user });
        }
        if room.entry_fee != expected_fee {
            return Err(RoomError::FeeMismatch {
                room: room_id,
                expected: room.entry_fee,
                actual: expected_fee,
            });
        }

        let seat = self.add_participant(room_id, user).await?;
        if seat.filled {
            self.on_filled(room_id)?;
        }
        Ok(JoinOutcome {
            room_id,
            participant_id: seat.participant_id,
            status: self.held(room_id)?.room.status,
            participant_count: seat.participant_count,
            created: false,
        })
    }
}
