//! Prize settlement for finished games.

use rust_decimal::Decimal;
use tapstake_ledger::Transfer;
use tapstake_protocol::{
    PayoutSummary, RoomEventKind, RoomId, RoomStatus, Settlement, Stars,
    TransactionKind, UserId,
};
use tracing::info;

use crate::RoomError;
use crate::work::{RoomResult, UnitOfWork};

/// How a pool divides between winner and organizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrizeSplit {
    pub pool: Stars,
    pub winner_amount: Stars,
    pub organizer_amount: Stars,
}

/// Splits `entry_fee × participants`.
///
/// The organizer's cut is rounded toward zero to 2 places and the winner
/// takes the rest, so the two parts always add up to the pool exactly.
/// Fails with [`RoomError::Validation`] if the pool does not fit.
pub fn split_pool(
    entry_fee: Stars,
    participants: usize,
    organizer_share: Decimal,
) -> Result<PrizeSplit, RoomError> {
    let pool = entry_fee.checked_times(participants).ok_or_else(|| {
        RoomError::Validation(format!(
            "prize pool of {participants} × {entry_fee} overflows"
        ))
    })?;
    let organizer_amount = pool.share(organizer_share);
    Ok(PrizeSplit {
        pool,
        winner_amount: pool - organizer_amount,
        organizer_amount,
    })
}

impl UnitOfWork<'_> {
    /// Finishes an Active room and pays the pool out.
    ///
    /// The winner must be seated, and cannot be the organizer of a room
    /// whose creator starts it or takes a share. Re-finishing with the
    /// recorded winner returns the recorded summary and writes nothing.
    pub(crate) async fn settle(
        &mut self,
        room_id: RoomId,
        winner: UserId,
    ) -> RoomResult<PayoutSummary> {
        let row = self.current_room(room_id).await?;
        let room = row.room.clone();
        let participants = row.participant_ids();
        let seated = row.participant(winner).is_some();

        if room.status == RoomStatus::Finished {
            return match room.settlement {
                Some(Settlement::Payout(summary)) if summary.winner_id == winner => Ok(summary),
                _ => Err(RoomError::WrongState {
                    room: room_id,
                    status: room.status,
                    action: "finish",
                }),
            };
        }
        if room.status != RoomStatus::Active {
            return Err(RoomError::WrongState {
                room: room_id,
                status: room.status,
                action: "finish",
            });
        }
        if !seated {
            return Err(RoomError::NotParticipant {
                room: room_id,
                user: winner,
            });
        }

        let policy = self.policy(room.kind);
        if winner == room.creator_id && policy.is_organized() {
            return Err(RoomError::OrganizerCannotWin {
                room: room_id,
                user: winner,
            });
        }
        let count = participants.len();
        let split = split_pool(room.entry_fee, count, policy.organizer_share)?;

        let mut users = participants;
        users.push(room.creator_id);
        self.tx.lock_users(&users).await?;

        self.ledger
            .transfer(
                &mut self.tx,
                Transfer::new(
                    winner,
                    TransactionKind::Payout,
                    split.winner_amount,
                    format!("prize from room {room_id}"),
                )
                .for_room(room_id),
            )
            .await?;
        let organizer_id = if split.organizer_amount.is_positive() {
            self.ledger
                .transfer(
                    &mut self.tx,
                    Transfer::new(
                        room.creator_id,
                        TransactionKind::Fee,
                        split.organizer_amount,
                        format!("organizer fee from room {room_id}"),
                    )
                    .for_room(room_id),
                )
                .await?;
            Some(room.creator_id)
        } else {
            None
        };

        self.release_markers(room_id, &users)?;
        self.transition(room_id, RoomStatus::Finished)?;

        let summary = PayoutSummary {
            room_id,
            winner_id: winner,
            participant_count: count,
            pool: split.pool,
            winner_amount: split.winner_amount,
            organizer_id,
            organizer_amount: split.organizer_amount,
        };
        let row = self.tx.room_mut(room_id)?;
        row.room.winner_id = Some(winner);
        row.room.settlement = Some(Settlement::Payout(summary.clone()));
        self.emit(
            room_id,
            RoomEventKind::Settled {
                settlement: Settlement::Payout(summary.clone()),
            },
        );
        info!(
            room = %room_id,
            winner = %winner,
            pool = %summary.pool,
            winner_amount = %summary.winner_amount,
            organizer_amount = %summary.organizer_amount,
            "room settled"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_split_private_pool_with_organizer_share() {
        let split = split_pool(Stars::whole(50), 4, dec!(0.05)).unwrap();
        assert_eq!(split.pool, Stars::whole(200));
        assert_eq!(split.organizer_amount, Stars::whole(10));
        assert_eq!(split.winner_amount, Stars::whole(190));
    }

    #[test]
    fn test_split_public_pool_goes_to_winner() {
        let split = split_pool(Stars::whole(20), 10, Decimal::ZERO).unwrap();
        assert_eq!(split.winner_amount, Stars::whole(200));
        assert_eq!(split.organizer_amount, Stars::ZERO);
    }

    #[test]
    fn test_split_remainder_goes_to_winner() {
        // 3 × 11.11 = 33.33; 5% = 1.6665 → 1.66, winner 31.67.
        let split = split_pool(Stars::from_cents(1111), 3, dec!(0.05)).unwrap();
        assert_eq!(split.organizer_amount, Stars::from_cents(166));
        assert_eq!(split.winner_amount, Stars::from_cents(3167));
        assert_eq!(split.winner_amount + split.organizer_amount, split.pool);
    }

    #[test]
    fn test_split_rejects_pool_overflow() {
        let huge = Stars::new(Decimal::MAX).unwrap();
        let err = split_pool(huge, 3, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, RoomError::Validation(_)));
    }
}
