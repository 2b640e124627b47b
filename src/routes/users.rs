use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::user::{LeaderboardQuery, LeaderboardResponse, RegisterUserRequest, UserSummary},
    error::AppError,
    services::{game_service, public_service},
    state::SharedState,
};

/// Player registration, lookup and ranking.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/{id}", get(get_user))
        .route("/leaderboard", get(get_leaderboard))
}

/// Register a new player.
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = RegisterUserRequest,
    responses(
        (status = 200, description = "User registered", body = UserSummary),
        (status = 400, description = "Invalid username"),
        (status = 409, description = "Username already taken")
    )
)]
/// Register a player.
pub async fn register_user(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RegisterUserRequest>>,
) -> Result<Json<UserSummary>, AppError> {
    let user = game_service::register_user(&state, &payload.username).await?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "Identifier of the user")),
    responses(
        (status = 200, description = "User stats", body = UserSummary),
        (status = 404, description = "Unknown user")
    )
)]
/// Return a player's cumulative wins and losses.
pub async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserSummary>, AppError> {
    let user = public_service::get_user(&state, id).await?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/leaderboard",
    tag = "users",
    params(LeaderboardQuery),
    responses((status = 200, description = "Best players first", body = LeaderboardResponse))
)]
/// Return the best players.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let board = public_service::leaderboard(&state, query.limit).await?;
    Ok(Json(board))
}
