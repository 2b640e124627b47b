use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Lucky Draw Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::users::register_user,
        crate::routes::users::get_user,
        crate::routes::users::get_leaderboard,
        crate::routes::session::get_status,
        crate::routes::session::join_session,
        crate::routes::session::submit_guess,
        crate::routes::session::get_result,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::user::RegisterUserRequest,
            crate::dto::user::UserSummary,
            crate::dto::user::LeaderboardResponse,
            crate::dto::session::SessionSummary,
            crate::dto::session::StatusResponse,
            crate::dto::session::JoinResponse,
            crate::dto::session::GuessRequest,
            crate::dto::session::GuessResponse,
            crate::dto::session::ResultSnapshot,
            crate::dto::session::ViewerOutcome,
            crate::dto::sse::SessionStartedEvent,
            crate::dto::sse::SessionEndedEvent,
            crate::dto::sse::PlayerJoinedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "users", description = "Player registration and stats"),
        (name = "session", description = "Session status, join, guess and results"),
    )
)]
/// OpenAPI document of every route.
pub struct ApiDoc;
