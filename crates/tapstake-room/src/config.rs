//! Room policies: the per-kind configuration that drives the one shared
//! state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tapstake_protocol::{Room, RoomKind, RoomStatus, Stars};

// ---------------------------------------------------------------------------
// RoomPolicy
// ---------------------------------------------------------------------------

/// How rooms of one kind behave.
///
/// Public and private rooms are not separate types: each is a `RoomPolicy`
/// value plugged into the same lifecycle. A kind is time-boxed when it has
/// an `expiry_window`, counts down when it has a `preparation_window`,
/// and pays its organizer when `organizer_share` is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPolicy {
    /// Seats per room.
    pub capacity: usize,

    /// Fewest players a game may start (or keep counting down) with.
    pub min_players: usize,

    /// A Waiting room older than this expires. `None` = never.
    pub expiry_window: Option<Duration>,

    /// Countdown between filling up and going Active. `None` = filling
    /// goes straight to Active. Only used by kinds that auto-start.
    pub preparation_window: Option<Duration>,

    /// Fraction of the pool paid to the room's creator on finish.
    pub organizer_share: Decimal,

    /// Whether rooms of this kind get an access key.
    pub issues_access_key: bool,

    /// Whether the creator starts the game. When `false`, the room starts
    /// itself once full.
    pub creator_starts: bool,
}

impl RoomPolicy {
    /// Auto-matched rooms: 10 seats, 10 s countdown, no fee, no expiry.
    pub fn public() -> Self {
        Self {
            capacity: 10,
            min_players: 2,
            expiry_window: None,
            preparation_window: Some(Duration::from_secs(10)),
            organizer_share: Decimal::ZERO,
            issues_access_key: false,
            creator_starts: false,
        }
    }

    /// Invite-only rooms: 10 seats, 5 minutes to start, 5% to the
    /// organizer.
    pub fn private() -> Self {
        Self {
            capacity: 10,
            min_players: 2,
            expiry_window: Some(Duration::from_secs(5 * 60)),
            preparation_window: None,
            organizer_share: Decimal::new(5, 2),
            issues_access_key: true,
            creator_starts: true,
        }
    }

    /// The single expiry predicate.
    ///
    /// A room is expired iff it is still Waiting, its kind is time-boxed,
    /// and strictly more than `expiry_window` has passed since creation.
    /// Reads, joins, starts and the sweep all decide through this.
    pub fn is_expired(&self, room: &Room, now: DateTime<Utc>) -> bool {
        self.expired_at(room.status, room.created_at, now)
    }

    /// [`is_expired`](Self::is_expired) over the listing fields, for
    /// callers holding a summary rather than a locked row.
    pub fn expired_at(
        &self,
        status: RoomStatus,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        status == RoomStatus::Waiting
            && self
                .expiry_window
                .is_some_and(|window| elapsed(created_at, now) > window)
    }

    /// The status a reader should act on: Expired for a room past its
    /// window, Active for one whose countdown is over, the stored status
    /// otherwise. Matches what the next operation on the room will see.
    pub fn effective_status(&self, room: &Room, now: DateTime<Utc>) -> RoomStatus {
        if self.is_expired(room, now) {
            RoomStatus::Expired
        } else if self.preparation_elapsed(room, now) {
            RoomStatus::Active
        } else {
            room.status
        }
    }

    /// Whether rooms of this kind have an organizer rather than just a
    /// first player. An organizer cannot win their own room.
    pub fn is_organized(&self) -> bool {
        self.creator_starts || self.organizer_share > Decimal::ZERO
    }

    /// Returns `true` once a Preparation room's countdown has run out.
    pub fn preparation_elapsed(&self, room: &Room, now: DateTime<Utc>) -> bool {
        self.preparation_due(room.status, room.preparation_started_at, now)
    }

    /// [`preparation_elapsed`](Self::preparation_elapsed) over the listing
    /// fields.
    pub fn preparation_due(
        &self,
        status: RoomStatus,
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if status != RoomStatus::Preparation {
            return false;
        }
        match (self.preparation_window, started_at) {
            (Some(window), Some(started)) => elapsed(started, now) >= window,
            _ => true,
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity < 2 {
            return Err(format!("capacity must be at least 2, got {}", self.capacity));
        }
        if self.min_players < 2 || self.min_players > self.capacity {
            return Err(format!(
                "min_players must be between 2 and capacity ({}), got {}",
                self.capacity, self.min_players
            ));
        }
        if self.organizer_share < Decimal::ZERO || self.organizer_share >= Decimal::ONE {
            return Err(format!(
                "organizer_share must be in [0, 1), got {}",
                self.organizer_share
            ));
        }
        if self.expiry_window.is_some_and(|w| w.is_zero()) {
            return Err("expiry_window must be non-zero when set".to_string());
        }
        Ok(())
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Engine-wide room settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub public: RoomPolicy,
    pub private: RoomPolicy,

    /// Allowed public entry fees. Empty = any valid fee.
    pub fee_tiers: Vec<Stars>,

    /// How many times an operation is retried after a transient storage
    /// error before the error is returned.
    pub max_tx_retries: u32,

    /// Pause before each retry, multiplied by the attempt number.
    pub retry_backoff: Duration,

    /// Access-key draws per room before giving up.
    pub key_generation_attempts: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            public: RoomPolicy::public(),
            private: RoomPolicy::private(),
            fee_tiers: Vec::new(),
            max_tx_retries: 3,
            retry_backoff: Duration::from_millis(10),
            key_generation_attempts: 16,
        }
    }
}

impl RoomConfig {
    pub fn policy(&self, kind: RoomKind) -> &RoomPolicy {
        match kind {
            RoomKind::Public => &self.public,
            RoomKind::Private => &self.private,
        }
    }

    /// Checks both policies and the engine settings.
    pub fn validate(&self) -> Result<(), String> {
        self.public.validate().map_err(|e| format!("public: {e}"))?;
        self.private.validate().map_err(|e| format!("private: {e}"))?;
        if self.private.creator_starts && !self.private.issues_access_key {
            return Err("private: creator-started rooms need an access key".to_string());
        }
        if let Some(tier) = self.fee_tiers.iter().find(|t| !t.is_positive()) {
            return Err(format!("fee tier {tier} must be positive"));
        }
        if self.key_generation_attempts == 0 {
            return Err("key_generation_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapstake_protocol::{RoomId, UserId};

    fn room_created_at(kind: RoomKind, created_at: DateTime<Utc>) -> Room {
        Room::new(RoomId(1), kind, Stars::whole(50), 10, UserId(1), None, created_at)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RoomConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.private.organizer_share, Decimal::new(5, 2));
        assert_eq!(config.private.expiry_window, Some(Duration::from_secs(300)));
        assert!(config.public.expiry_window.is_none());
    }

    #[test]
    fn test_expiry_predicate_is_strict() {
        let policy = RoomPolicy::private();
        let t0 = Utc::now();
        let room = room_created_at(RoomKind::Private, t0);

        let at_window = t0 + chrono::Duration::seconds(300);
        assert!(!policy.is_expired(&room, at_window));
        assert!(policy.is_expired(&room, at_window + chrono::Duration::milliseconds(1)));
        assert_eq!(
            policy.effective_status(&room, at_window + chrono::Duration::seconds(1)),
            RoomStatus::Expired
        );
    }

    #[test]
    fn test_expiry_only_applies_to_waiting_time_boxed_rooms() {
        let t0 = Utc::now();
        let later = t0 + chrono::Duration::hours(1);

        let public = room_created_at(RoomKind::Public, t0);
        assert!(!RoomPolicy::public().is_expired(&public, later));

        let mut active = room_created_at(RoomKind::Private, t0);
        active.status = RoomStatus::Active;
        assert!(!RoomPolicy::private().is_expired(&active, later));
        assert_eq!(
            RoomPolicy::private().effective_status(&active, later),
            RoomStatus::Active
        );
    }

    #[test]
    fn test_preparation_elapsed() {
        let policy = RoomPolicy::public();
        let t0 = Utc::now();
        let mut room = room_created_at(RoomKind::Public, t0);
        assert!(!policy.preparation_elapsed(&room, t0));

        room.status = RoomStatus::Preparation;
        room.preparation_started_at = Some(t0);
        let before = t0 + chrono::Duration::seconds(9);
        let after = t0 + chrono::Duration::seconds(10);
        assert!(!policy.preparation_elapsed(&room, before));
        assert!(policy.preparation_elapsed(&room, after));
        assert_eq!(policy.effective_status(&room, before), RoomStatus::Preparation);
        assert_eq!(policy.effective_status(&room, after), RoomStatus::Active);
    }

    #[test]
    fn test_only_private_rooms_have_an_organizer() {
        assert!(!RoomPolicy::public().is_organized());
        assert!(RoomPolicy::private().is_organized());

        let mut shared = RoomPolicy::public();
        shared.organizer_share = Decimal::new(1, 2);
        assert!(shared.is_organized());
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let mut policy = RoomPolicy::public();
        policy.capacity = 1;
        assert!(policy.validate().is_err());

        let mut policy = RoomPolicy::public();
        policy.min_players = 11;
        assert!(policy.validate().is_err());

        let mut policy = RoomPolicy::private();
        policy.organizer_share = Decimal::ONE;
        assert!(policy.validate().is_err());

        let config = RoomConfig {
            fee_tiers: vec![Stars::whole(20), Stars::ZERO],
            ..RoomConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
