/// Token Codec
///
/// Signs and verifies the two classes of bearer tokens. Access and refresh tokens
/// have their own secret and lifetime; every verification failure collapses into
/// a single `InvalidOrExpiredToken` outcome.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use crate::auth::claims::{Claims, Identity};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// A freshly signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

#[derive(Clone)]
struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime_ms: i64,
}

impl TokenKeys {
    fn new(secret: &str, lifetime_ms: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_ms,
        }
    }
}

/// Built once from configuration and shared read-only across requests.
#[derive(Clone)]
pub struct TokenCodec {
    access: TokenKeys,
    refresh: TokenKeys,
    issuer: String,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(config: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.leeway = 0;

        Self {
            access: TokenKeys::new(&config.access_secret, config.access_token_expiry_ms),
            refresh: TokenKeys::new(&config.refresh_secret, config.refresh_token_expiry_ms),
            issuer: config.issuer.clone(),
            validation,
        }
    }

    pub fn access_lifetime_ms(&self) -> i64 {
        self.access.lifetime_ms
    }

    pub fn refresh_lifetime_ms(&self) -> i64 {
        self.refresh.lifetime_ms
    }

    pub fn sign_access(&self, identity: &Identity) -> Result<IssuedToken, AppError> {
        self.sign(identity, &self.access)
    }

    pub fn sign_refresh(&self, identity: &Identity) -> Result<IssuedToken, AppError> {
        self.sign(identity, &self.refresh)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token, &self.access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token, &self.refresh)
    }

    fn sign(&self, identity: &Identity, keys: &TokenKeys) -> Result<IssuedToken, AppError> {
        let claims = Claims::new(identity, keys.lifetime_ms, &self.issuer);
        let token = encode(&Header::default(), &claims, &keys.encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(IssuedToken { token, claims })
    }

    fn verify(&self, token: &str, keys: &TokenKeys) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &keys.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                AuthError::InvalidOrExpiredToken
            })
    }
}

/// SHA-256 digest of a token, hex-encoded, for refresh-token-at-rest storage.
pub fn hash_for_storage(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
