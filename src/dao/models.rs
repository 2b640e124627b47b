use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Lowest number a player may pick.
pub const MIN_NUMBER: u8 = 1;
/// Highest number a player may pick.
pub const MAX_NUMBER: u8 = 10;

/// Whether `value` lies inside the playable range.
pub fn is_valid_number(value: i64) -> bool {
    (i64::from(MIN_NUMBER)..=i64::from(MAX_NUMBER)).contains(&value)
}

/// One timed round of the game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Public token players use to join the session.
    pub token: String,
    /// True while the session accepts joins and guesses.
    pub is_active: bool,
    /// When the session opened.
    pub started_at: SystemTime,
    /// Length of the guessing window in seconds.
    pub duration_secs: u64,
    /// When the session was closed, if it was.
    pub ended_at: Option<SystemTime>,
    /// Number drawn when the session closed.
    pub winning_number: Option<u8>,
}

impl SessionEntity {
    /// Build a freshly opened session.
    pub fn open(token: String, started_at: SystemTime, duration_secs: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            is_active: true,
            started_at,
            duration_secs,
            ended_at: None,
            winning_number: None,
        }
    }

    /// Instant past which the session no longer accepts guesses.
    pub fn deadline(&self) -> SystemTime {
        self.started_at + Duration::from_secs(self.duration_secs)
    }

    /// Whether `now` has reached the deadline.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.deadline()
    }
}

/// Number chosen by a player, or the absence of one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "number", rename_all = "snake_case")]
pub enum Selection {
    /// Joined the session without picking yet.
    Unanswered,
    /// Picked a number in `[MIN_NUMBER, MAX_NUMBER]`.
    Selected(u8),
}

impl Selection {
    /// The picked number, if any.
    pub fn number(self) -> Option<u8> {
        match self {
            Selection::Unanswered => None,
            Selection::Selected(number) => Some(number),
        }
    }
}

/// A player's participation record in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuessEntity {
    /// Primary key of the guess.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Participating user.
    pub user_id: Uuid,
    /// When the user joined the session.
    pub joined_at: SystemTime,
    /// Current pick.
    pub selection: Selection,
    /// Settlement outcome, unset until the session has been settled.
    pub is_winner: Option<bool>,
}

impl GuessEntity {
    /// Build the record created when a user joins a session.
    pub fn joined(session_id: Uuid, user_id: Uuid, joined_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id,
            joined_at,
            selection: Selection::Unanswered,
            is_winner: None,
        }
    }
}

/// Registered player with cumulative stats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Primary key of the user.
    pub id: Uuid,
    /// Unique display name.
    pub username: String,
    /// Settled sessions won.
    pub wins: u64,
    /// Settled sessions lost.
    pub losses: u64,
    /// Registration timestamp.
    pub created_at: SystemTime,
}

impl UserEntity {
    /// Build a user with zeroed stats.
    pub fn new(username: String, created_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            wins: 0,
            losses: 0,
            created_at,
        }
    }
}
