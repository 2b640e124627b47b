use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name.
    pub event: Option<String>,
    /// JSON body sent as `data:`.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a new session opens.
pub struct SessionStartedEvent {
    /// New session.
    pub session_id: Uuid,
    /// Token players use to join and guess.
    pub token: String,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// Seconds players have to join and guess.
    pub time_left: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a session closes and its number is drawn.
pub struct SessionEndedEvent {
    /// Closed session.
    pub session_id: Uuid,
    /// Number drawn.
    pub winning_number: u8,
    /// Seconds until the next session may open.
    pub next_session_in: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player joins the active session.
pub struct PlayerJoinedEvent {
    /// Players in the session after this join.
    pub total_players: u64,
    /// Who joined.
    pub username: String,
}
