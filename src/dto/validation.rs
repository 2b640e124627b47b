//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted username, in characters.
pub const MAX_USERNAME_CHARS: usize = 32;

/// Validates that a username is non-blank, short enough and free of control characters.
///
/// # Examples
///
/// ```ignore
/// validate_username("ada")         // Ok
/// validate_username("   ")         // Err - blank
/// validate_username("tab\tname")   // Err - control character
/// ```
pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("username_blank");
        err.message = Some("Username must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_USERNAME_CHARS {
        let mut err = ValidationError::new("username_length");
        err.message = Some(
            format!("Username must be at most {MAX_USERNAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("username_format");
        err.message = Some("Username must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}
