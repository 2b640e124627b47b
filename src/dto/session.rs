use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dao::models::SessionEntity, dto::format_system_time, state::lifecycle::SessionStatus};

/// Public projection of a session. The winning number stays hidden while it runs.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Session id, used to fetch the result.
    pub id: Uuid,
    /// Token players use to join and guess.
    pub token: String,
    /// Whether guesses are still accepted.
    pub is_active: bool,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// Length of the guessing window.
    pub duration_secs: u64,
    /// RFC 3339 deadline after which guesses are refused.
    pub ends_at: String,
}

impl From<&SessionEntity> for SessionSummary {
    fn from(value: &SessionEntity) -> Self {
        Self {
            id: value.id,
            token: value.token.clone(),
            is_active: value.is_active,
            started_at: format_system_time(value.started_at),
            duration_secs: value.duration_secs,
            ends_at: format_system_time(value.deadline()),
        }
    }
}

/// Snapshot returned by `/session/status` and sent to SSE clients on connect.
///
/// Exactly one of `time_left_in_seconds` and `next_session_in` is set.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Running session, if any.
    pub active_session: Option<SessionSummary>,
    /// Whole seconds left to guess in the running session.
    pub time_left_in_seconds: Option<u64>,
    /// Whole seconds until the next session may open.
    pub next_session_in: Option<u64>,
}

impl From<&SessionStatus> for StatusResponse {
    fn from(value: &SessionStatus) -> Self {
        match value {
            SessionStatus::Active { session, time_left } => Self {
                active_session: Some(session.into()),
                time_left_in_seconds: Some(time_left.as_secs()),
                next_session_in: None,
            },
            SessionStatus::Waiting { next_session_in } => Self {
                active_session: None,
                time_left_in_seconds: None,
                next_session_in: Some(next_session_in.as_secs()),
            },
        }
    }
}

/// Returned after a player joined the active session.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinResponse {
    /// Joined session.
    pub session_id: Uuid,
    /// Players in the session, including the caller.
    pub total_players: u64,
}

/// Payload used to submit a guess.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GuessRequest {
    /// Number between 1 and 10 inclusive.
    pub number: i64,
}

/// Acknowledges a recorded guess.
#[derive(Debug, Serialize, ToSchema)]
pub struct GuessResponse {
    /// Session the guess belongs to.
    pub session_id: Uuid,
    /// Recorded number.
    pub number: u8,
}

/// The caller's own participation in a settled session.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ViewerOutcome {
    /// `None` when the player joined but never guessed.
    pub selected_number: Option<u8>,
    /// Whether the pick matched the winning number.
    pub is_winner: bool,
}

/// Outcome of a finished session.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResultSnapshot {
    /// Settled session.
    pub session_id: Uuid,
    /// Number drawn at close.
    pub winning_number: u8,
    /// Players who joined.
    pub total_players: u64,
    /// Players who picked the winning number.
    pub total_wins: u64,
    /// Winner usernames in join order.
    pub winners: Vec<String>,
    /// Present when the request identified a player who joined the session.
    pub viewer: Option<ViewerOutcome>,
}
