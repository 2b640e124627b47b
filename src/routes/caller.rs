//! Identification of the calling player through the `x-user-id` header.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Player making the request. Rejects with 401 when the header is missing or malformed.
pub struct Caller(pub Uuid);

/// Like [`Caller`] but tolerates a missing header.
pub struct OptionalCaller(pub Option<Uuid>);

fn read_user_id(parts: &Parts) -> Result<Option<Uuid>, AppError> {
    let Some(value) = parts.headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .map(Some)
        .ok_or_else(|| AppError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        read_user_id(parts)?
            .map(Caller)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_ID_HEADER} header")))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for OptionalCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        read_user_id(parts).map(OptionalCaller)
    }
}
