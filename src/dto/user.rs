use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{dao::models::UserEntity, dto::validation::validate_username};

/// Payload used to register a new player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RegisterUserRequest {
    /// Display name, unique once trimmed.
    #[validate(custom(function = "validate_username"))]
    pub username: String,
}

/// Public projection of a player and their cumulative stats.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserSummary {
    /// Id to send in the `x-user-id` header.
    pub id: Uuid,
    /// Display name.
    pub username: String,
    /// Settled sessions won.
    pub wins: u64,
    /// Settled sessions lost, unanswered ones included.
    pub losses: u64,
}

impl From<UserEntity> for UserSummary {
    fn from(value: UserEntity) -> Self {
        Self {
            id: value.id,
            username: value.username,
            wins: value.wins,
            losses: value.losses,
        }
    }
}

/// Query parameters accepted by the leaderboard route.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Number of entries to return (1 to 100, default 10).
    pub limit: Option<usize>,
}

/// Best players first.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    /// Ranked by wins, then fewest losses, then username.
    pub users: Vec<UserSummary>,
}
