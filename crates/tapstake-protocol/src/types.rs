//! Core records: identities, rooms, participants, users, and ledger rows.
//!
//! Everything here is plain data plus the rules that hold for a single
//! value. Cross-row invariants (capacity, one open room per user, balance
//! reconciliation) are enforced by the store and engine crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Settlement, Stars};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Internal account identifier.
///
/// The identity-bootstrap service maps an external chat-platform user to
/// one of these; the engine never sees the external id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// Room identifier. Allocated from a monotonic sequence, so ordering by
/// id is ordering by creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Identifier of a (room, user) join record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Identifier of a ledger entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AccessKey
// ---------------------------------------------------------------------------

/// The 6-character key an organizer shares to let players into a private
/// room.
///
/// Keys are drawn from `[A-Z0-9]`. Parsing trims whitespace and
/// upper-cases the input, since players type these by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Key length in characters.
    pub const LEN: usize = 6;

    /// The alphabet keys are drawn from.
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Draws a random key. Uniqueness is NOT guaranteed here. The store's
    /// unique index decides whether a key can be used.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let key = (0..Self::LEN)
            .map(|_| {
                let idx = rng.random_range(0..Self::ALPHABET.len());
                char::from(Self::ALPHABET[idx])
            })
            .collect();
        Self(key)
    }

    /// Validates and normalizes user-supplied input.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let key = input.trim().to_ascii_uppercase();
        let valid = key.len() == Self::LEN
            && key.bytes().all(|b| Self::ALPHABET.contains(&b));
        if valid {
            Ok(Self(key))
        } else {
            Err(ProtocolError::InvalidAccessKey(input.to_string()))
        }
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccessKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RoomKind / RoomStatus
// ---------------------------------------------------------------------------

/// How a room is acquired.
///
/// The kind only selects a configuration (`RoomPolicy` in
/// `tapstake-room`); every kind runs through the same state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Auto-matched by fee tier; fills, counts down, and starts itself.
    Public,
    /// Joined by access key; the organizer starts it.
    Private,
}

impl RoomKind {
    /// Every kind, for sweeps that walk each configuration.
    pub const ALL: [Self; 2] = [Self::Public, Self::Private];
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownName {
                what: "room kind",
                value: s.to_string(),
            })
    }
}

/// The lifecycle state of a room.
///
/// ```text
/// Waiting ──fill (public)──→ Preparation ──timer──→ Active ──finish──→ Finished
///    │  └──creator start (private)──────────────────↑
///    ├──expiry (time-boxed)──→ Expired
///    └──empty / cancel──→ Canceled ←──below min / cancel── Preparation, Active
/// ```
///
/// Finished, Canceled and Expired are terminal: each is reached exactly
/// once and carries exactly one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Waiting,
    Preparation,
    Active,
    Finished,
    Canceled,
    Expired,
}

impl RoomStatus {
    /// Returns `true` if the room is accepting new participants.
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns `true` for Waiting, Preparation and Active, the states in
    /// which a participation counts as "open".
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Returns `true` for Finished, Canceled and Expired.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Expired)
    }

    /// Returns `true` if moving from `self` to `target` is an edge of the
    /// state machine. Kind-specific rules (e.g. only public rooms enter
    /// Preparation) are checked by the lifecycle on top of this.
    pub fn can_transition_to(self, target: Self) -> bool {
        use RoomStatus::*;
        matches!(
            (self, target),
            (Waiting, Preparation)
                | (Waiting, Active)
                | (Waiting, Expired)
                | (Waiting, Canceled)
                | (Preparation, Active)
                | (Preparation, Canceled)
                | (Active, Finished)
                | (Active, Canceled)
        )
    }
}

impl RoomStatus {
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::Preparation,
        Self::Active,
        Self::Finished,
        Self::Canceled,
        Self::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Preparation => "Preparation",
            Self::Active => "Active",
            Self::Finished => "Finished",
            Self::Canceled => "Canceled",
            Self::Expired => "Expired",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownName {
                what: "room status",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A player account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Running balance; always equals the sum of the user's transactions.
    pub balance: Stars,
    /// Whether the user linked an external wallet (required to withdraw).
    pub has_external_wallet: bool,
    pub created_at: DateTime<Utc>,
}

/// A room record. Participants are stored alongside it by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub entry_fee: Stars,
    pub capacity: usize,
    pub status: RoomStatus,
    pub creator_id: UserId,
    /// Set iff `kind == Private`.
    pub access_key: Option<AccessKey>,
    pub created_at: DateTime<Utc>,
    pub preparation_started_at: Option<DateTime<Utc>>,
    pub active_started_at: Option<DateTime<Utc>>,
    /// When the room reached any terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    pub winner_id: Option<UserId>,
    /// What the terminal transition paid out; replayed on re-invocation.
    pub settlement: Option<Settlement>,
}

impl Room {
    /// A fresh Waiting room.
    pub fn new(
        id: RoomId,
        kind: RoomKind,
        entry_fee: Stars,
        capacity: usize,
        creator_id: UserId,
        access_key: Option<AccessKey>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            entry_fee,
            capacity,
            status: RoomStatus::Waiting,
            creator_id,
            access_key,
            created_at,
            preparation_started_at: None,
            active_started_at: None,
            finished_at: None,
            winner_id: None,
            settlement: None,
        }
    }
}

/// A (room, user) join record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    /// The entry fee this participant paid; refunds return exactly this.
    pub stake: Stars,
}

/// What a ledger entry represents. The kind fixes the sign of the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Stake paid to enter a room (debit).
    Entry,
    /// Prize paid to a room's winner (credit).
    Payout,
    /// Organizer's cut of a private room's pool (credit).
    Fee,
    /// Stake returned from a canceled/expired room or on leaving (credit).
    Refund,
    /// Referral bonus (credit).
    Referral,
    /// Stars bought through the payment sink (credit).
    Deposit,
    /// Stars sent to the user's external wallet (debit).
    Withdrawal,
}

impl TransactionKind {
    /// `true` if entries of this kind reduce the balance.
    pub fn is_debit(self) -> bool {
        matches!(self, Self::Entry | Self::Withdrawal)
    }
}

impl TransactionKind {
    pub const ALL: [Self; 7] = [
        Self::Entry,
        Self::Payout,
        Self::Fee,
        Self::Refund,
        Self::Referral,
        Self::Deposit,
        Self::Withdrawal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Payout => "payout",
            Self::Fee => "fee",
            Self::Refund => "refund",
            Self::Referral => "referral",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownName {
                what: "transaction kind",
                value: s.to_string(),
            })
    }
}

/// An append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    /// The room this entry belongs to, for entry/payout/fee/refund.
    pub room_id: Option<RoomId>,
    /// Signed: debits are negative.
    pub amount: Stars,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_status_transitions_follow_state_machine() {
        use RoomStatus::*;
        assert!(Waiting.can_transition_to(Preparation));
        assert!(Waiting.can_transition_to(Active));
        assert!(Waiting.can_transition_to(Expired));
        assert!(Preparation.can_transition_to(Active));
        assert!(Preparation.can_transition_to(Canceled));
        assert!(Active.can_transition_to(Finished));

        assert!(!Preparation.can_transition_to(Waiting));
        assert!(!Preparation.can_transition_to(Expired));
        assert!(!Active.can_transition_to(Expired));
        assert!(!Waiting.can_transition_to(Finished));
        for terminal in [Finished, Canceled, Expired] {
            for target in [Waiting, Preparation, Active, Finished, Canceled, Expired] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_room_status_predicates() {
        assert!(RoomStatus::Waiting.is_joinable());
        assert!(!RoomStatus::Preparation.is_joinable());
        assert!(RoomStatus::Active.is_open());
        assert!(!RoomStatus::Expired.is_open());
        assert!(RoomStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_access_key_generate_uses_alphabet() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let key = AccessKey::generate(&mut rng);
            assert_eq!(key.as_str().len(), AccessKey::LEN);
            assert!(AccessKey::parse(key.as_str()).is_ok());
        }
    }

    #[test]
    fn test_access_key_parse_normalizes_case() {
        let key = AccessKey::parse(" ab12cd ").unwrap();
        assert_eq!(key.as_str(), "AB12CD");
    }

    #[test]
    fn test_access_key_parse_rejects_bad_input() {
        assert!(AccessKey::parse("ABC").is_err());
        assert!(AccessKey::parse("ABCDEFG").is_err());
        assert!(AccessKey::parse("AB-12C").is_err());
        assert!(AccessKey::parse("").is_err());
    }

    #[test]
    fn test_transaction_kind_direction() {
        assert!(TransactionKind::Entry.is_debit());
        assert!(TransactionKind::Withdrawal.is_debit());
        assert!(!TransactionKind::Payout.is_debit());
        assert!(!TransactionKind::Fee.is_debit());
        assert!(!TransactionKind::Refund.is_debit());
    }

    #[test]
    fn test_names_parse_back() {
        for status in RoomStatus::ALL {
            assert_eq!(status.as_str().parse::<RoomStatus>().unwrap(), status);
        }
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert_eq!("private".parse::<RoomKind>().unwrap(), RoomKind::Private);
        assert!(matches!(
            "waiting".parse::<RoomStatus>(),
            Err(ProtocolError::UnknownName { what: "room status", .. })
        ));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(UserId(7).to_string(), "U-7");
        assert_eq!(RoomId(3).to_string(), "R-3");
    }
}
