/// Token claim set
///
/// Access and refresh tokens carry the same claims. Times are Unix seconds as
/// required by RFC 7519.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::roles::Role;

/// Who a token speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// JWT payload
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    /// Unique per token, so two tokens minted in the same second differ.
    pub jti: Uuid,
}

impl Claims {
    /// Build claims for `identity` that expire `lifetime_ms` from now.
    pub fn new(identity: &Identity, lifetime_ms: i64, issuer: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            user_id: identity.user_id,
            email: identity.email.clone(),
            role: identity.role,
            iat: now,
            exp: now + lifetime_ms / 1000,
            iss: issuer.to_string(),
            jti: Uuid::new_v4(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            email: self.email.clone(),
            role: self.role,
        }
    }

    /// Expiry in epoch milliseconds.
    pub fn expires_at_ms(&self) -> i64 {
        self.exp * 1000
    }
}
