/// OpenAPI documentation generation.
pub mod documentation;
/// Join and guess operations on the active session.
pub mod game_service;
/// Storage health reporting.
pub mod health_service;
/// Read-only status, player and leaderboard queries.
pub mod public_service;
/// Settlement of finished sessions.
pub mod result_engine;
/// Session lifecycle driver.
pub mod scheduler;
/// Typed lifecycle events published to SSE subscribers.
pub mod sse_events;
/// SSE subscription streams.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;

#[cfg(test)]
mod test_support;
