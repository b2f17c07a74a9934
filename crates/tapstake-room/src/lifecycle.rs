//! The room state machine.
//!
//! ```text
//! Waiting ──filled (auto-start)──→ Preparation ──countdown──→ Active
//! Waiting ──filled, no countdown──────────────────────────────↑
//! Waiting ──creator starts───────────────────────────────────↑
//! Waiting ──expiry window──→ Expired
//! Waiting ──emptied──→ Canceled
//! Preparation ──below min players──→ Canceled
//! Active ──finish──→ Finished
//! any open ──operator cancel──→ Canceled
//! ```
//!
//! Every terminal edge settles exactly once, in the same transaction as
//! the status change: Finished pays out (see `settlement`), Canceled and
//! Expired refund every remaining stake.
//!
//! The two timed edges (countdown over, expiry window passed) are applied
//! by [`UnitOfWork::catch_up`] whenever an operation loads its room, and
//! by the sweep for rooms nobody touches.

use tapstake_ledger::Transfer;
use tapstake_protocol::{
    DisconnectOutcome, LeaveOutcome, Refund, RefundSummary, RoomEventKind,
    RoomId, RoomStatus, Settlement, Stars, TransactionKind, UserId,
};
use tracing::{info, warn};

use tapstake_store::RoomRow;

use crate::RoomError;
use crate::work::{RoomResult, UnitOfWork};

/// The timed edge [`UnitOfWork::catch_up`] applied, if any.
#[derive(Debug)]
pub(crate) enum CaughtUp {
    Current,
    /// The countdown was over: Preparation → Active.
    Promoted,
    /// The expiry window had passed: refunded and Expired.
    Expired(RefundSummary),
}

/// How a start request ended.
#[derive(Debug)]
pub(crate) enum StartResult {
    Started(RoomStatus),
    /// Too few players: the room was canceled and refunded instead.
    Canceled {
        count: usize,
        required: usize,
        refund: RefundSummary,
    },
}

fn action(target: RoomStatus) -> &'static str {
    match target {
        RoomStatus::Waiting => "reopen",
        RoomStatus::Preparation => "prepare",
        RoomStatus::Active => "start",
        RoomStatus::Finished => "finish",
        RoomStatus::Canceled => "cancel",
        RoomStatus::Expired => "expire",
    }
}

impl UnitOfWork<'_> {
    /// Moves a held room along one edge of the state machine and stamps
    /// the matching timestamp.
    pub(crate) fn transition(
        &mut self,
        room_id: RoomId,
        target: RoomStatus,
    ) -> RoomResult<RoomStatus> {
        let now = self.now;
        let row = self.tx.room_mut(room_id)?;
        let from = row.room.status;
        if !from.can_transition_to(target) {
            return Err(RoomError::WrongState {
                room: room_id,
                status: from,
                action: action(target),
            });
        }
        row.room.status = target;
        match target {
            RoomStatus::Preparation => row.room.preparation_started_at = Some(now),
            RoomStatus::Active => row.room.active_started_at = Some(now),
            RoomStatus::Finished | RoomStatus::Canceled | RoomStatus::Expired => {
                row.room.finished_at = Some(now);
            }
            RoomStatus::Waiting => {}
        }
        self.emit(room_id, RoomEventKind::StatusChanged { from, to: target });
        info!(room = %room_id, %from, to = %target, "room status changed");
        Ok(from)
    }

    /// What a room does once its last seat is taken: count down, go
    /// straight to Active, or (creator-started kinds) nothing.
    pub(crate) fn on_filled(&mut self, room_id: RoomId) -> RoomResult<()> {
        let kind = self.held(room_id)?.room.kind;
        let policy = self.policy(kind);
        if policy.creator_starts {
            return Ok(());
        }
        let target = if policy.preparation_window.is_some() {
            RoomStatus::Preparation
        } else {
            RoomStatus::Active
        };
        self.transition(room_id, target)?;
        Ok(())
    }

    /// Refunds every participant's stake, releases their open-room
    /// markers and moves the room to `terminal` (Canceled or Expired).
    ///
    /// Participant records are kept; they are the audit trail matching the
    /// refund entries.
    pub(crate) async fn refund_all_participants(
        &mut self,
        room_id: RoomId,
        terminal: RoomStatus,
    ) -> RoomResult<RefundSummary> {
        let row = self.held(room_id)?;
        let creator = row.room.creator_id;
        let stakes: Vec<(UserId, Stars)> = row
            .participants
            .iter()
            .map(|p| (p.user_id, p.stake))
            .collect();

        let mut users: Vec<UserId> = stakes.iter().map(|(user, _)| *user).collect();
        users.push(creator);
        self.tx.lock_users(&users).await?;

        let mut refunds = Vec::with_capacity(stakes.len());
        for (user, stake) in stakes {
            self.ledger
                .transfer(
                    &mut self.tx,
                    Transfer::new(
                        user,
                        TransactionKind::Refund,
                        stake,
                        format!("refund from room {room_id} ({terminal})"),
                    )
                    .for_room(room_id),
                )
                .await?;
            refunds.push(Refund {
                user_id: user,
                amount: stake,
            });
        }
        self.release_markers(room_id, &users)?;
        self.transition(room_id, terminal)?;

        let summary = RefundSummary {
            room_id,
            status: terminal,
            total: refunds.iter().map(|r| r.amount).sum(),
            refunds,
        };
        self.tx.room_mut(room_id)?.room.settlement =
            Some(Settlement::Refund(summary.clone()));
        self.emit(
            room_id,
            RoomEventKind::Settled {
                settlement: Settlement::Refund(summary.clone()),
            },
        );
        info!(
            room = %room_id,
            status = %terminal,
            refunds = summary.refunds.len(),
            total = %summary.total,
            "room refunded"
        );
        Ok(summary)
    }

    /// Clears every marker pointing at `room_id` on already-locked users.
    pub(crate) fn release_markers(
        &mut self,
        room_id: RoomId,
        users: &[UserId],
    ) -> RoomResult<()> {
        for user in users {
            self.tx.user_mut(*user)?.release(room_id);
        }
        Ok(())
    }

    /// Loads a room and applies any timed edge that is already due.
    ///
    /// An elapsed countdown moves the room to Active; a Waiting room past
    /// its expiry window is refunded and moved to Expired. The decision
    /// uses the same predicates as the sweep, so a room reads the same
    /// whether or not the sweep has run.
    pub(crate) async fn catch_up(&mut self, room_id: RoomId) -> RoomResult<CaughtUp> {
        let room = self.locked_room(room_id).await?.room.clone();
        let policy = self.policy(room.kind);
        if policy.preparation_elapsed(&room, self.now) {
            self.transition(room_id, RoomStatus::Active)?;
            return Ok(CaughtUp::Promoted);
        }
        if policy.is_expired(&room, self.now) {
            let summary = self
                .refund_all_participants(room_id, RoomStatus::Expired)
                .await?;
            return Ok(CaughtUp::Expired(summary));
        }
        Ok(CaughtUp::Current)
    }

    /// [`catch_up`](Self::catch_up), then the room as it now stands.
    pub(crate) async fn current_room(&mut self, room_id: RoomId) -> RoomResult<&RoomRow> {
        self.catch_up(room_id).await?;
        self.held(room_id)
    }

    /// Starts a game.
    ///
    /// Creator-started kinds: only the creator, only while Waiting and
    /// unexpired, and only with at least `min_players` seated. Too few
    /// players cancels and refunds the room. Auto-started kinds: any
    /// participant may confirm the start once the countdown is over.
    pub(crate) async fn start(
        &mut self,
        room_id: RoomId,
        requester: UserId,
    ) -> RoomResult<StartResult> {
        let row = self.current_room(room_id).await?;
        let room = row.room.clone();
        let count = row.participant_count();
        let seated = row.participant(requester).is_some();
        let policy = self.policy(room.kind);

        if !policy.creator_starts {
            if !seated {
                return Err(RoomError::NotParticipant {
                    room: room_id,
                    user: requester,
                });
            }
            if room.status != RoomStatus::Active {
                return Err(RoomError::WrongState {
                    room: room_id,
                    status: room.status,
                    action: "start",
                });
            }
            return Ok(StartResult::Started(RoomStatus::Active));
        }

        if requester != room.creator_id {
            return Err(RoomError::NotCreator {
                room: room_id,
                user: requester,
            });
        }
        if room.status == RoomStatus::Expired {
            return Err(RoomError::RoomExpired(room_id));
        }
        if room.status != RoomStatus::Waiting {
            return Err(RoomError::WrongState {
                room: room_id,
                status: room.status,
                action: "start",
            });
        }
        if count < policy.min_players {
            warn!(room = %room_id, count, required = policy.min_players, "start with too few players");
            let refund = self
                .refund_all_participants(room_id, RoomStatus::Canceled)
                .await?;
            return Ok(StartResult::Canceled {
                count,
                required: policy.min_players,
                refund,
            });
        }
        self.transition(room_id, RoomStatus::Active)?;
        Ok(StartResult::Started(RoomStatus::Active))
    }

    /// A participant leaves a Waiting room.
    ///
    /// The leaver is refunded. An organizer leaving a creator-started room
    /// cancels it for everyone; the last participant leaving cancels it
    /// empty. A room past its expiry window can no longer be left: it is
    /// refunded as a whole.
    pub(crate) async fn leave(
        &mut self,
        room_id: RoomId,
        user: UserId,
    ) -> RoomResult<LeaveOutcome> {
        let row = self.current_room(room_id).await?;
        let (status, kind, creator) = (row.room.status, row.room.kind, row.room.creator_id);
        let stake = row.participant(user).map(|p| p.stake);

        if status == RoomStatus::Expired {
            return Err(RoomError::RoomExpired(room_id));
        }
        if status != RoomStatus::Waiting {
            return Err(RoomError::WrongState {
                room: room_id,
                status,
                action: "leave",
            });
        }
        let Some(stake) = stake else {
            return Err(RoomError::NotParticipant { room: room_id, user });
        };

        if self.policy(kind).creator_starts && user == creator {
            let summary = self
                .refund_all_participants(room_id, RoomStatus::Canceled)
                .await?;
            return Ok(LeaveOutcome {
                room_id,
                refunded: stake,
                status: RoomStatus::Canceled,
                canceled: Some(summary),
            });
        }

        let refunded = self.remove_participant(room_id, user).await?;
        Ok(LeaveOutcome {
            room_id,
            refunded,
            status: self.held(room_id)?.room.status,
            canceled: None,
        })
    }

    /// A participant dropped during the countdown. They are refunded and
    /// unseated; if that leaves fewer than `min_players`, the room is
    /// canceled and everyone else refunded too.
    ///
    /// Once the countdown is over the room is Active and the report is
    /// rejected.
    pub(crate) async fn disconnect(
        &mut self,
        room_id: RoomId,
        user: UserId,
    ) -> RoomResult<DisconnectOutcome> {
        let row = self.current_room(room_id).await?;
        let (status, kind) = (row.room.status, row.room.kind);
        if status == RoomStatus::Expired {
            return Err(RoomError::RoomExpired(room_id));
        }
        if status != RoomStatus::Preparation {
            return Err(RoomError::WrongState {
                room: room_id,
                status,
                action: "drop a player from",
            });
        }

        let refunded = self.unseat(room_id, user).await?;
        let remaining = self.held(room_id)?.participant_count();
        let canceled = if remaining < self.policy(kind).min_players {
            Some(
                self.refund_all_participants(room_id, RoomStatus::Canceled)
                    .await?,
            )
        } else {
            None
        };
        Ok(DisconnectOutcome {
            room_id,
            refunded,
            remaining,
            canceled,
        })
    }

    /// Operator cancel of an open room. Repeating it on a Canceled or
    /// Expired room returns the recorded refunds; a room already past its
    /// expiry window is settled as Expired.
    pub(crate) async fn cancel(
        &mut self,
        room_id: RoomId,
        reason: &str,
    ) -> RoomResult<RefundSummary> {
        let room = self.current_room(room_id).await?.room.clone();
        match (&room.status, &room.settlement) {
            (RoomStatus::Canceled | RoomStatus::Expired, Some(Settlement::Refund(summary))) => {
                return Ok(summary.clone());
            }
            (status, _) if status.is_terminal() => {
                return Err(RoomError::WrongState {
                    room: room_id,
                    status: *status,
                    action: "cancel",
                });
            }
            _ => {}
        }
        warn!(room = %room_id, status = %room.status, reason, "operator cancel");
        self.refund_all_participants(room_id, RoomStatus::Canceled)
            .await
    }
}
