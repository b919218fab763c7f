mod auth;
mod designations;
mod health;
mod units;
mod users;

pub use auth::{change_password, login, logout, me, refresh};
pub use designations::{
    create_designation, delete_designation, get_designation, list_designations,
    update_designation,
};
pub use health::health;
pub use units::{create_unit, delete_unit, get_unit, list_units, update_unit};
pub use users::{
    create_user, delete_user, get_preferences, get_user, list_users, reset_password,
    update_preferences, update_user,
};

use actix_web::{error::JsonPayloadError, error::QueryPayloadError, HttpRequest};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ValidationError};
use crate::validators;

/// `{"message": ...}` acknowledgement body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
/// Use together with `#[serde(default)]`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Path or body id.
pub(crate) fn parse_id(field: &str, raw: &str) -> Result<Uuid, ValidationError> {
    validators::valid_uuid(field, raw)
}

/// Optional reference id from a request body: `null` or `""` clears it.
pub(crate) fn parse_reference(
    field: &str,
    raw: Option<Option<String>>,
) -> Result<Option<Option<Uuid>>, ValidationError> {
    match raw {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(s)) if s.trim().is_empty() => Ok(Some(None)),
        Some(Some(s)) => parse_id(field, &s).map(|id| Some(Some(id))),
    }
}

/// Optional free text: blank becomes `None`.
pub(crate) fn clean_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `isActive` query flag. Anything other than `"true"` means false; blank means unset.
pub(crate) fn parse_flag(raw: Option<&str>) -> Option<bool> {
    match raw.map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(value == "true"),
    }
}

/// Malformed JSON bodies become a 400 with the usual error body.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected request body");
    AppError::from(ValidationError::InvalidFormat("request body".to_string())).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected query string");
    AppError::from(ValidationError::InvalidFormat("query".to_string())).into()
}
