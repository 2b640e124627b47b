use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::session::{GuessRequest, GuessResponse, JoinResponse, ResultSnapshot, StatusResponse},
    error::AppError,
    routes::caller::{Caller, OptionalCaller},
    services::{game_service, public_service, result_engine},
    state::SharedState,
};

/// Session status, participation and results.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/session/status", get(get_status))
        .route("/sessions/{session}/join", post(join_session))
        .route("/sessions/{session}/guess", post(submit_guess))
        .route("/sessions/{session}/result", get(get_result))
}

#[utoipa::path(
    get,
    path = "/session/status",
    tag = "session",
    responses(
        (status = 200, description = "Active session or cooldown", body = StatusResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Return the active session and its remaining time, or the time until the next one.
pub async fn get_status(
    State(state): State<SharedState>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = public_service::get_status(&state).await?;
    Ok(Json(status))
}

#[utoipa::path(
    post,
    path = "/sessions/{session}/join",
    tag = "session",
    params(
        ("session" = String, Path, description = "Join token of the active session"),
        ("x-user-id" = Uuid, Header, description = "Identifier of the joining user")
    ),
    responses(
        (status = 200, description = "Joined", body = JoinResponse),
        (status = 401, description = "Missing or malformed user id"),
        (status = 404, description = "Unknown session or user"),
        (status = 409, description = "Session closed or already joined")
    )
)]
/// Join the active session.
pub async fn join_session(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Caller(user_id): Caller,
) -> Result<Json<JoinResponse>, AppError> {
    let joined = game_service::join_session(&state, &token, user_id).await?;
    Ok(Json(joined))
}

#[utoipa::path(
    post,
    path = "/sessions/{session}/guess",
    tag = "session",
    request_body = GuessRequest,
    params(
        ("session" = String, Path, description = "Join token of the active session"),
        ("x-user-id" = Uuid, Header, description = "Identifier of the guessing user")
    ),
    responses(
        (status = 200, description = "Guess recorded", body = GuessResponse),
        (status = 401, description = "Missing or malformed user id"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Out of range, not joined, already guessed or session closed")
    )
)]
/// Submit the caller's number for the active session.
pub async fn submit_guess(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Caller(user_id): Caller,
    Json(payload): Json<GuessRequest>,
) -> Result<Json<GuessResponse>, AppError> {
    let guess = game_service::submit_guess(&state, &token, user_id, payload.number).await?;
    Ok(Json(guess))
}

#[utoipa::path(
    get,
    path = "/sessions/{session}/result",
    tag = "session",
    params(
        ("session" = Uuid, Path, description = "Identifier of the session"),
        ("x-user-id" = Option<Uuid>, Header, description = "Adds the caller's own outcome")
    ),
    responses(
        (status = 200, description = "Settled result", body = ResultSnapshot),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session still running")
    )
)]
/// Settle a finished session if needed and return its result.
pub async fn get_result(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    OptionalCaller(viewer): OptionalCaller,
) -> Result<Json<ResultSnapshot>, AppError> {
    let snapshot = result_engine::settle(&state, id, viewer).await?;
    Ok(Json(snapshot))
}
