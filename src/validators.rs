/// Request input validation
///
/// Shape checks on submitted fields. Each validator returns the cleaned value
/// or the `ValidationError` that becomes a 400.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MAX_NAME_LENGTH: usize = 100;
const MAX_CODE_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();
}

/// A field that must be present and non-blank. Returns it trimmed.
pub fn require<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::EmptyField(field.to_string())),
    }
}

/// Validates and normalizes an email address
pub fn valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }
    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    Ok(trimmed.to_string())
}

/// New passwords: 8 to 128 characters. Content is not restricted.
pub fn valid_new_password(field: &str, password: &str) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort(field.to_string(), MIN_PASSWORD_LENGTH));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong(field.to_string(), MAX_PASSWORD_LENGTH));
    }
    Ok(())
}

/// First or last name
pub fn valid_name(field: &str, name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong(field.to_string(), MAX_NAME_LENGTH));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat(field.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Unit and designation codes
pub fn valid_code(code: &str) -> Result<String, ValidationError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("code".to_string()));
    }
    if trimmed.len() > MAX_CODE_LENGTH {
        return Err(ValidationError::TooLong("code".to_string(), MAX_CODE_LENGTH));
    }
    Ok(trimmed.to_string())
}

pub fn valid_role(role: &str) -> Result<Role, ValidationError> {
    Role::parse(role).ok_or_else(|| ValidationError::InvalidFormat("role".to_string()))
}

pub fn valid_uuid(field: &str, id: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(id.trim()).map_err(|_| ValidationError::InvalidFormat(field.to_string()))
}
