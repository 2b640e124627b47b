use axum::Router;

use crate::state::SharedState;

/// Caller identity extractors.
pub mod caller;
/// Swagger UI.
pub mod docs;
/// `/healthcheck`.
pub mod health;
/// Status, join, guess and result routes.
pub mod session;
/// Server-sent events.
pub mod sse;
/// Registration, user stats and leaderboard.
pub mod users;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sse::router())
        .merge(users::router())
        .merge(session::router())
        .merge(docs::router())
        .with_state(state)
}
