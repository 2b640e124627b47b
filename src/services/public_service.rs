//! Read-only projections of the game for public clients.

use uuid::Uuid;

use crate::{
    dto::{
        session::StatusResponse,
        user::{LeaderboardResponse, UserSummary},
    },
    error::ServiceError,
    state::{
        SharedState,
        lifecycle::{self, SessionStatus},
    },
};

/// Entries returned by the leaderboard when no limit is given.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
/// Largest accepted leaderboard limit.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Derive the lifecycle status at the current clock time.
pub async fn current_status(state: &SharedState) -> Result<SessionStatus, ServiceError> {
    let store = state.require_session_store().await?;
    let now = state.now();
    let mut tx = store.begin().await?;
    let active = tx.find_active_session().await?;
    let last_ended = match active {
        Some(_) => None,
        None => tx.find_last_ended_session().await?,
    };

    Ok(lifecycle::compute_remaining_or_wait(
        now,
        active.as_ref(),
        last_ended.as_ref(),
        state.config().cooldown,
    ))
}

/// Return the active session and its remaining time, or the cooldown left.
pub async fn get_status(state: &SharedState) -> Result<StatusResponse, ServiceError> {
    let status = current_status(state).await?;
    Ok(StatusResponse::from(&status))
}

/// Return a single user and their stats.
pub async fn get_user(state: &SharedState, id: Uuid) -> Result<UserSummary, ServiceError> {
    let store = state.require_session_store().await?;
    store
        .find_user(id)
        .await?
        .map(UserSummary::from)
        .ok_or_else(|| ServiceError::NotFound(format!("user `{id}` not found")))
}

/// Return the best players, most wins first.
pub async fn leaderboard(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<LeaderboardResponse, ServiceError> {
    let limit = limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    let store = state.require_session_store().await?;
    let users = store
        .top_users(limit)
        .await?
        .into_iter()
        .map(UserSummary::from)
        .collect();
    Ok(LeaderboardResponse { users })
}
