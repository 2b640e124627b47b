use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health payloads.
pub mod health;
/// Session status, join, guess and result payloads.
pub mod session;
/// SSE event payloads.
pub mod sse;
/// Player payloads.
pub mod user;
/// Request validators.
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
