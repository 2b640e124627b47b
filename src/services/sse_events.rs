use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    dao::models::SessionEntity,
    dto::{
        format_system_time,
        session::{ResultSnapshot, StatusResponse},
        sse::{PlayerJoinedEvent, ServerEvent, SessionEndedEvent, SessionStartedEvent},
    },
    state::{SharedState, lifecycle::SessionStatus},
};

const EVENT_SESSION_STARTED: &str = "session.started";
const EVENT_SESSION_ENDED: &str = "session.ended";
const EVENT_PLAYER_JOINED: &str = "player.joined";
const EVENT_GAME_RESULT: &str = "game.result";
const EVENT_STATUS: &str = "status";

/// Announce a freshly opened session.
pub fn broadcast_session_started(state: &SharedState, session: &SessionEntity) {
    let payload = SessionStartedEvent {
        session_id: session.id,
        token: session.token.clone(),
        started_at: format_system_time(session.started_at),
        time_left: session.duration_secs,
    };
    send_public_event(state, EVENT_SESSION_STARTED, &payload);
}

/// Announce the end of a session and its winning number.
pub fn broadcast_session_ended(state: &SharedState, session: &SessionEntity, winning_number: u8) {
    let payload = SessionEndedEvent {
        session_id: session.id,
        winning_number,
        next_session_in: state.config().cooldown.as_secs(),
    };
    send_public_event(state, EVENT_SESSION_ENDED, &payload);
}

/// Announce a new player in the active session.
pub fn broadcast_player_joined(state: &SharedState, total_players: u64, username: &str) {
    let payload = PlayerJoinedEvent {
        total_players,
        username: username.to_owned(),
    };
    send_public_event(state, EVENT_PLAYER_JOINED, &payload);
}

/// Publish the settled outcome of a session, without any viewer-specific data.
pub fn broadcast_game_result(state: &SharedState, snapshot: &ResultSnapshot) {
    send_public_event(state, EVENT_GAME_RESULT, snapshot);
}

/// Build the `status` event sent to a subscriber when it connects.
pub fn status_event(status: &SessionStatus) -> Option<ServerEvent> {
    let payload = StatusResponse::from(status);
    match ServerEvent::json(Some(EVENT_STATUS.to_string()), &payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialize status SSE payload");
            None
        }
    }
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(payload) => {
            let delivered = state.public_sse().broadcast(payload);
            debug!(event, delivered, "public SSE event sent");
        }
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}
