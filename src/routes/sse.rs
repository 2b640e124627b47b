use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/public",
    tag = "sse",
    responses((status = 200, description = "Lifecycle and result events", content_type = "text/event-stream", body = String))
)]
/// Stream lifecycle events, starting with the current status.
pub async fn public_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading the status so no event falls in between.
    let receiver = sse_service::subscribe_public(&state);
    let greeting = sse_service::connect_event(&state).await;
    info!(
        subscribers = state.public_sse().subscriber_count(),
        "public SSE subscriber connected"
    );
    sse_service::to_sse_stream(receiver, greeting, state.shutdown_watcher())
}

/// Routes serving server-sent events.
pub fn router() -> Router<SharedState> {
    Router::new().route("/sse/public", get(public_stream))
}
