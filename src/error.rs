/// Application Error Handling
///
/// Every failure an operation can produce is one of the kinds below. Handlers
/// return `Result<_, AppError>` and the actix `ResponseError` implementation turns
/// the kind into a status code and a stable JSON body. Callers branch on the kind,
/// never on message text.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Malformed request input (400)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
    NotAnObject(String),
    NothingToUpdate,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is required", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} must be at least {} characters", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} must be at most {} characters", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::NotAnObject(field) => write!(f, "{} must be an object", field),
            ValidationError::NothingToUpdate => {
                write!(f, "At least one field must be provided for update")
            }
        }
    }
}

impl StdError for ValidationError {}

/// Authentication and authorization failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown email, inactive account or wrong password. Never says which.
    InvalidCredentials,
    /// No credential was presented.
    AuthenticationRequired,
    /// Signature, expiry or store mismatch on an access or refresh token.
    InvalidOrExpiredToken,
    /// The refresh endpoint was called without a refresh cookie.
    RefreshRequired,
    /// The token is valid but its user is gone or deactivated.
    UserNotFound,
    /// Authenticated, but the role is not allowed to do this.
    InsufficientPermissions,
    /// Password change with a wrong current password.
    IncorrectCurrentPassword,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::AuthenticationRequired => write!(f, "Authentication required"),
            AuthError::InvalidOrExpiredToken => write!(f, "Invalid or expired token"),
            AuthError::RefreshRequired => write!(f, "Refresh token required"),
            AuthError::UserNotFound => write!(f, "User not found"),
            AuthError::InsufficientPermissions => write!(f, "Insufficient permissions"),
            AuthError::IncorrectCurrentPassword => write!(f, "Current password is incorrect"),
        }
    }
}

impl StdError for AuthError {}

/// Business-rule violations raised by the management endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Deactivating or deleting your own account.
    SelfModification(String),
    /// A unique key (email, code) is already taken.
    Duplicate(String),
    /// The entity is still referenced by others.
    InUse(String),
    /// A referenced entity does not exist or the reference is circular.
    InvalidReference(String),
    /// Only admins may touch admin accounts.
    ProtectedAccount(String),
}

impl ConflictError {
    fn status(&self) -> StatusCode {
        match self {
            ConflictError::ProtectedAccount(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictError::SelfModification(msg)
            | ConflictError::Duplicate(msg)
            | ConflictError::InUse(msg)
            | ConflictError::InvalidReference(msg)
            | ConflictError::ProtectedAccount(msg) => write!(f, "{}", msg),
        }
    }
}

impl StdError for ConflictError {}

/// Database operation errors
#[derive(Debug)]
pub enum DatabaseError {
    NotFound(String),
    ConnectionPool(String),
    UnexpectedError(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::NotFound(entity) => write!(f, "{} not found", entity),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            DatabaseError::UnexpectedError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Auth(AuthError),
    Conflict(ConflictError),
    Database(DatabaseError),
    Internal(String),
}

impl AppError {
    /// Shorthand for a missing entity (404).
    pub fn not_found(entity: &str) -> Self {
        AppError::Database(DatabaseError::NotFound(entity.to_string()))
    }

    /// The auth kind carried by this error, if any.
    pub fn auth_kind(&self) -> Option<AuthError> {
        match self {
            AppError::Auth(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Conflict(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ConflictError> for AppError {
    fn from(err: ConflictError) -> Self {
        AppError::Conflict(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::not_found("Record"),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                AppError::Conflict(ConflictError::Duplicate(
                    "Record already exists".to_string(),
                ))
            }
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503") => {
                AppError::Conflict(ConflictError::InvalidReference(
                    "Referenced record does not exist".to_string(),
                ))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::ConnectionPool(err.to_string()))
            }
            _ => AppError::Database(DatabaseError::UnexpectedError(err.to_string())),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error body returned to callers.
///
/// Deliberately carries no request id or timestamp: two failures of the same
/// kind must be indistinguishable on the wire.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Converts errors into HTTP responses with server-side logging
pub trait ErrorHandler {
    fn error_response(&self) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),

            AppError::Auth(e) => {
                let code = match e {
                    AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                    AuthError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
                    AuthError::InvalidOrExpiredToken => "TOKEN_INVALID",
                    AuthError::RefreshRequired => "REFRESH_REQUIRED",
                    AuthError::UserNotFound => "USER_NOT_FOUND",
                    AuthError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
                    AuthError::IncorrectCurrentPassword => "INCORRECT_PASSWORD",
                };
                (self.status_code(), code, e.to_string())
            }

            AppError::Conflict(e) => (e.status(), "CONFLICT", e.to_string()),

            AppError::Database(e) => match e {
                DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                ),
            },

            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        (status, ErrorResponse::new(message, code))
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Conflict(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Business rule violation");
            }
            AppError::Database(DatabaseError::NotFound(_)) => {
                tracing::debug!(request_id = request_id, error = %self, "Entity not found");
            }
            AppError::Database(e) => {
                tracing::error!(request_id = request_id, error = %e, "Database error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, body) = <Self as ErrorHandler>::error_response(self);
        HttpResponse::build(status).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::InsufficientPermissions) => StatusCode::FORBIDDEN,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(e) => e.status(),
            AppError::Database(DatabaseError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-operation context attached to log lines
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Logs `error` and hands it back, for use in `map_err`.
    pub fn fail(&self, error: AppError) -> AppError {
        self.log_error(&error);
        error
    }

    /// Logs an unexpected failure with full detail. Expected kinds are logged
    /// by the response mapping and are skipped here.
    pub fn log_error(&self, error: &AppError) {
        match error {
            AppError::Database(DatabaseError::NotFound(_))
            | AppError::Validation(_)
            | AppError::Auth(_)
            | AppError::Conflict(_) => {}
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    user_id = ?self.user_id,
                    error = %error,
                    "Operation failed"
                );
            }
        }
    }
}
