/// Session lifecycle
///
/// Login, refresh, logout, password change and admin password reset. Every
/// operation returns the `Set-Cookie` values it wants sent; the HTTP layer only
/// copies them onto the response.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditLog, EntityType};
use crate::auth::claims::{Claims, Identity};
use crate::auth::cookies::{CookiePolicy, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::auth::jwt::{hash_for_storage, TokenCodec};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::refresh_token::RefreshTokenStore;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ValidationError};
use crate::request_info::RequestInfo;
use crate::store::{Stores, User, UserProfile, UserStore};
use crate::telemetry::{AUTH_TARGET, SECURITY_TARGET};
use crate::validators;

// Verified against when the email is unknown, so both failure paths pay for bcrypt.
// Same cost as `HASH_COST`.
const DUMMY_HASH: &str = "$2b$10$MAXEkHLEDPYtOy50Oyi4Y.igN22qwpAmAkbBfp1rF7PdR6bow/hW6";

/// Body returned by login and refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub user: UserProfile,
    pub requires_password_change: bool,
}

/// A successful login or refresh
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub body: SessionBody,
    pub set_cookies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogoutOutcome {
    /// Caller identified from the access cookie, else the refresh cookie.
    pub user_id: Option<Uuid>,
    pub revoked: u64,
    pub set_cookies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub user: UserProfile,
    /// Access token expiry in epoch milliseconds.
    pub expires_at: i64,
}

/// Built once at startup and shared by every request.
#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    audit: AuditLog,
    codec: TokenCodec,
    cookies: CookiePolicy,
    rotate_refresh_tokens: bool,
}

impl SessionService {
    pub fn new(stores: &Stores, jwt: &JwtSettings, cookies: CookiePolicy) -> Self {
        Self {
            users: stores.users.clone(),
            refresh_tokens: stores.refresh_tokens.clone(),
            audit: AuditLog::new(stores.audit.clone()),
            codec: TokenCodec::new(jwt),
            cookies,
            rotate_refresh_tokens: jwt.rotate_refresh_tokens,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Exchange email and password for an access/refresh cookie pair.
    pub async fn login(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        request: &RequestInfo,
    ) -> Result<SessionGrant, AppError> {
        let email = validators::require("email", email)?;
        let password = match password {
            Some(p) if !p.is_empty() => p,
            _ => return Err(ValidationError::EmptyField("password".to_string()).into()),
        };

        let user = match self.users.find_active_by_email(email).await? {
            Some(user) => user,
            None => {
                verify_password(password, DUMMY_HASH);
                tracing::warn!(
                    target: SECURITY_TARGET,
                    event = "LOGIN_FAILED",
                    email = %email,
                    reason = "user_not_found",
                    ip = %request.ip_address
                );
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_password(password, &user.password_hash) {
            tracing::warn!(
                target: SECURITY_TARGET,
                event = "LOGIN_FAILED",
                email = %email,
                user_id = %user.id,
                reason = "invalid_password",
                ip = %request.ip_address
            );
            return Err(AuthError::InvalidCredentials.into());
        }

        let identity = user.identity();
        let access = self.codec.sign_access(&identity)?;
        let refresh_cookie = self.issue_refresh_token(&identity).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::Login, EntityType::User)
                    .actor(user.id)
                    .entity(user.id)
                    .request(request),
            )
            .await;

        tracing::info!(
            target: AUTH_TARGET,
            event = "LOGIN_SUCCESS",
            user_id = %user.id,
            email = %user.email,
            role = %user.role,
            ip = %request.ip_address,
            user_agent = %request.user_agent
        );

        Ok(SessionGrant {
            body: session_body(&user),
            set_cookies: vec![self.access_cookie(&access.token), refresh_cookie],
        })
    }

    /// Mint a new access token from a stored refresh token.
    ///
    /// The refresh token itself is left in place unless rotation is enabled.
    pub async fn refresh(
        &self,
        refresh_token: Option<&str>,
        request: &RequestInfo,
    ) -> Result<SessionGrant, AppError> {
        let token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::RefreshRequired)?;

        let claims = self.codec.verify_refresh(token)?;
        let digest = hash_for_storage(token);

        if !self.refresh_tokens.is_valid(&digest, claims.user_id).await? {
            tracing::warn!(
                target: SECURITY_TARGET,
                event = "REFRESH_REJECTED",
                user_id = %claims.user_id,
                ip = %request.ip_address
            );
            return Err(AuthError::InvalidOrExpiredToken.into());
        }

        let user = self
            .users
            .find_by_id(claims.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::UserNotFound)?;

        // Only the request that actually deletes the row may rotate it.
        if self.rotate_refresh_tokens && self.refresh_tokens.revoke(&digest).await? == 0 {
            tracing::warn!(
                target: SECURITY_TARGET,
                event = "REFRESH_REPLAYED",
                user_id = %claims.user_id,
                ip = %request.ip_address
            );
            return Err(AuthError::InvalidOrExpiredToken.into());
        }

        let identity = user.identity();
        let access = self.codec.sign_access(&identity)?;
        let mut set_cookies = vec![self.access_cookie(&access.token)];

        if self.rotate_refresh_tokens {
            set_cookies.push(self.issue_refresh_token(&identity).await?);
        }

        tracing::info!(
            target: AUTH_TARGET,
            event = "TOKEN_REFRESHED",
            user_id = %user.id,
            rotated = self.rotate_refresh_tokens,
            ip = %request.ip_address
        );

        Ok(SessionGrant {
            body: session_body(&user),
            set_cookies,
        })
    }

    /// Revoke the presented refresh token and clear both cookies.
    ///
    /// Succeeds whether or not any cookie was presented.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        request: &RequestInfo,
    ) -> Result<LogoutOutcome, AppError> {
        let user_id = access_token
            .and_then(|t| self.codec.verify_access(t).ok())
            .or_else(|| refresh_token.and_then(|t| self.codec.verify_refresh(t).ok()))
            .map(|claims| claims.user_id);

        let revoked = match refresh_token.filter(|t| !t.is_empty()) {
            Some(token) => self.refresh_tokens.revoke(&hash_for_storage(token)).await?,
            None => 0,
        };

        if let Some(user_id) = user_id {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::Logout, EntityType::User)
                        .actor(user_id)
                        .entity(user_id)
                        .request(request),
                )
                .await;

            tracing::info!(
                target: AUTH_TARGET,
                event = "LOGOUT",
                user_id = %user_id,
                revoked = revoked,
                ip = %request.ip_address
            );
        }

        Ok(LogoutOutcome {
            user_id,
            revoked,
            set_cookies: vec![
                self.cookies.clear_cookie(ACCESS_COOKIE),
                self.cookies.clear_cookie(REFRESH_COOKIE),
            ],
        })
    }

    /// Replace the caller's password and end every other session.
    pub async fn change_password(
        &self,
        caller: &Claims,
        current_password: Option<&str>,
        new_password: Option<&str>,
        request: &RequestInfo,
    ) -> Result<(), AppError> {
        let current_password = non_empty("currentPassword", current_password)?;
        let new_password = non_empty("newPassword", new_password)?;
        validators::valid_new_password("newPassword", new_password)?;

        let user = self
            .users
            .find_by_id(caller.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        if !verify_password(current_password, &user.password_hash) {
            tracing::warn!(
                target: SECURITY_TARGET,
                event = "PASSWORD_CHANGE_FAILED",
                user_id = %user.id,
                ip = %request.ip_address
            );
            return Err(AuthError::IncorrectCurrentPassword.into());
        }

        let password_hash = hash_password(new_password)?;
        self.users
            .set_password(user.id, &password_hash, false, user.id)
            .await?;
        let revoked = self.refresh_tokens.revoke_all_for_user(user.id).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::ChangePassword, EntityType::User)
                    .actor(user.id)
                    .entity(user.id)
                    .request(request),
            )
            .await;

        tracing::info!(
            target: AUTH_TARGET,
            event = "PASSWORD_CHANGED",
            user_id = %user.id,
            revoked = revoked,
            ip = %request.ip_address
        );

        Ok(())
    }

    /// Admin-initiated reset: the target must change the password at next login.
    pub async fn reset_password(
        &self,
        actor: &Claims,
        target_id: Uuid,
        new_password: Option<&str>,
        request: &RequestInfo,
    ) -> Result<(), AppError> {
        let new_password = non_empty("newPassword", new_password)?;
        validators::valid_new_password("newPassword", new_password)?;

        let target = self
            .users
            .find_by_id(target_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        let password_hash = hash_password(new_password)?;
        self.users
            .set_password(target.id, &password_hash, true, actor.user_id)
            .await?;
        let revoked = self.refresh_tokens.revoke_all_for_user(target.id).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::ResetPassword, EntityType::User)
                    .actor(actor.user_id)
                    .entity(target.id)
                    .request(request),
            )
            .await;

        tracing::warn!(
            target: SECURITY_TARGET,
            event = "RESET_PASSWORD",
            user_id = %target.id,
            email = %target.email,
            reset_by = %actor.user_id,
            revoked = revoked,
            ip = %request.ip_address
        );

        Ok(())
    }

    /// The caller's profile and the expiry of the token they presented.
    pub async fn current_user(&self, caller: &Claims) -> Result<CurrentUser, AppError> {
        let user = self
            .users
            .find_by_id(caller.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        Ok(CurrentUser {
            user: user.profile(),
            expires_at: caller.expires_at_ms(),
        })
    }

    async fn issue_refresh_token(&self, identity: &Identity) -> Result<String, AppError> {
        let refresh = self.codec.sign_refresh(identity)?;
        let expires_at = Utc::now() + Duration::milliseconds(self.codec.refresh_lifetime_ms());
        self.refresh_tokens
            .store(identity.user_id, &hash_for_storage(&refresh.token), expires_at)
            .await?;

        Ok(self.cookies.session_cookie(
            REFRESH_COOKIE,
            &refresh.token,
            self.codec.refresh_lifetime_ms(),
        ))
    }

    fn access_cookie(&self, token: &str) -> String {
        self.cookies
            .session_cookie(ACCESS_COOKIE, token, self.codec.access_lifetime_ms())
    }
}

fn session_body(user: &User) -> SessionBody {
    SessionBody {
        user: user.profile(),
        requires_password_change: user.force_password_change,
    }
}

/// Password fields are checked for presence but never trimmed.
fn non_empty<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::EmptyField(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cookies::parse_cookies;
    use crate::auth::Role;
    use crate::store::memory::MemoryBackend;
    use crate::store::NewUser;

    const PASSWORD: &str = "Secret123!";

    struct TestSession {
        backend: MemoryBackend,
        service: SessionService,
        request: RequestInfo,
    }

    fn jwt_settings() -> JwtSettings {
        JwtSettings::with_secrets(
            "access-secret-key-at-least-32-characters",
            "refresh-secret-key-at-least-32-characters",
        )
    }

    async fn setup_with(jwt: JwtSettings) -> TestSession {
        let backend = MemoryBackend::new();
        let service = SessionService::new(&backend.stores(), &jwt, CookiePolicy::new(false));
        TestSession {
            backend,
            service,
            request: RequestInfo {
                ip_address: "127.0.0.1".to_string(),
                user_agent: "test".to_string(),
            },
        }
    }

    async fn setup() -> TestSession {
        setup_with(jwt_settings()).await
    }

    async fn seed_user(session: &TestSession, email: &str, role: Role) -> User {
        session
            .backend
            .users
            .create(NewUser {
                email: email.to_string(),
                password_hash: hash_password(PASSWORD).unwrap(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role,
                unit_id: None,
                designation_id: None,
                force_password_change: false,
                metadata: serde_json::json!({}),
                created_by: None,
            })
            .await
            .unwrap()
    }

    /// Value of the named cookie among `Set-Cookie` strings.
    fn cookie_value(set_cookies: &[String], name: &str) -> Option<String> {
        set_cookies.iter().find_map(|c| {
            let pair = c.split(';').next()?;
            parse_cookies(pair).remove(name)
        })
    }

    #[tokio::test]
    async fn test_login_issues_matching_tokens() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;

        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();

        assert_eq!(grant.set_cookies.len(), 2);
        assert_eq!(grant.body.user.role, Role::Admin);
        assert!(!grant.body.requires_password_change);

        let access = cookie_value(&grant.set_cookies, ACCESS_COOKIE).unwrap();
        let claims = session.service.codec().verify_access(&access).unwrap();
        assert_eq!(claims.identity(), user.identity());
    }

    #[tokio::test]
    async fn test_login_persists_refresh_digest_for_seven_days() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;

        let before = Utc::now();
        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();

        let refresh = cookie_value(&grant.set_cookies, REFRESH_COOKIE).unwrap();
        let rows = session.backend.refresh_tokens.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, user.id);
        assert_eq!(rows[0].token_hash, hash_for_storage(&refresh));

        let expected = before + Duration::days(7);
        let drift = (rows[0].expires_at - expected).num_seconds().abs();
        assert!(drift <= 5, "expiry drifted by {}s", drift);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let session = setup().await;
        seed_user(&session, "admin@test.dev", Role::Admin).await;

        let wrong_password = session
            .service
            .login(Some("admin@test.dev"), Some("wrong-password"), &session.request)
            .await
            .unwrap_err();
        let unknown_email = session
            .service
            .login(Some("nobody@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap_err();

        assert_eq!(wrong_password.auth_kind(), Some(AuthError::InvalidCredentials));
        assert_eq!(unknown_email.auth_kind(), Some(AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(session.backend.refresh_tokens.rows().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_login() {
        let session = setup().await;
        let user = seed_user(&session, "gone@test.dev", Role::User).await;
        session.backend.users.deactivate(user.id, user.id).await.unwrap();

        let err = session
            .service
            .login(Some("gone@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_requires_both_fields() {
        let session = setup().await;
        let err = session
            .service
            .login(Some("admin@test.dev"), None, &session.request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::EmptyField(_))));
    }

    #[tokio::test]
    async fn test_login_writes_audit_entry() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;
        session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();

        let entries = session.backend.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Login);
        assert_eq!(entries[0].user_id, Some(user.id));
        assert_eq!(entries[0].ip_address.as_deref(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_refresh_issues_only_an_access_cookie() {
        let session = setup().await;
        seed_user(&session, "admin@test.dev", Role::Admin).await;
        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        let refresh = cookie_value(&grant.set_cookies, REFRESH_COOKIE).unwrap();

        let refreshed = session
            .service
            .refresh(Some(&refresh), &session.request)
            .await
            .unwrap();

        assert_eq!(refreshed.set_cookies.len(), 1);
        assert!(cookie_value(&refreshed.set_cookies, ACCESS_COOKIE).is_some());
        assert!(cookie_value(&refreshed.set_cookies, REFRESH_COOKIE).is_none());
        assert_eq!(session.backend.refresh_tokens.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_token() {
        let session = setup().await;
        let err = session.service.refresh(None, &session.request).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::RefreshRequired));
    }

    #[tokio::test]
    async fn test_refresh_with_forged_token() {
        let session = setup().await;
        let err = session
            .service
            .refresh(Some("not.a.token"), &session.request)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn test_refresh_fails_after_row_is_deleted() {
        let session = setup().await;
        seed_user(&session, "admin@test.dev", Role::Admin).await;
        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        let refresh = cookie_value(&grant.set_cookies, REFRESH_COOKIE).unwrap();

        session
            .backend
            .refresh_tokens
            .revoke(&hash_for_storage(&refresh))
            .await
            .unwrap();

        // The token itself is still cryptographically valid.
        assert!(session.service.codec().verify_refresh(&refresh).is_ok());
        let err = session
            .service
            .refresh(Some(&refresh), &session.request)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn test_refresh_for_deactivated_user() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;
        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        let refresh = cookie_value(&grant.set_cookies, REFRESH_COOKIE).unwrap();

        session.backend.users.deactivate(user.id, user.id).await.unwrap();

        let err = session
            .service
            .refresh(Some(&refresh), &session.request)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn test_refresh_rotation_replaces_the_row() {
        let mut jwt = jwt_settings();
        jwt.rotate_refresh_tokens = true;
        let session = setup_with(jwt).await;
        seed_user(&session, "admin@test.dev", Role::Admin).await;

        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        let first = cookie_value(&grant.set_cookies, REFRESH_COOKIE).unwrap();

        let rotated = session
            .service
            .refresh(Some(&first), &session.request)
            .await
            .unwrap();
        let second = cookie_value(&rotated.set_cookies, REFRESH_COOKIE).unwrap();
        assert_ne!(first, second);

        let rows = session.backend.refresh_tokens.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token_hash, hash_for_storage(&second));

        let err = session
            .service
            .refresh(Some(&first), &session.request)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidOrExpiredToken));
    }

    /// Refresh store that validates every digest but whose row is already gone,
    /// as seen by the losing side of two concurrent refreshes.
    #[derive(Default)]
    struct AlreadyRevokedStore {
        stored: std::sync::Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl RefreshTokenStore for AlreadyRevokedStore {
        async fn store(
            &self,
            _user_id: Uuid,
            _token_digest: &str,
            _expires_at: chrono::DateTime<Utc>,
        ) -> Result<(), AppError> {
            *self.stored.lock().unwrap() += 1;
            Ok(())
        }

        async fn is_valid(&self, _token_digest: &str, _user_id: Uuid) -> Result<bool, AppError> {
            Ok(true)
        }

        async fn revoke(&self, _token_digest: &str) -> Result<u64, AppError> {
            Ok(0)
        }

        async fn revoke_all_for_user(&self, _user_id: Uuid) -> Result<u64, AppError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_rotation_refuses_a_token_revoked_by_a_concurrent_refresh() {
        let mut jwt = jwt_settings();
        jwt.rotate_refresh_tokens = true;
        let session = setup_with(jwt.clone()).await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;

        let raced = Arc::new(AlreadyRevokedStore::default());
        let mut stores = session.backend.stores();
        stores.refresh_tokens = raced.clone();
        let service = SessionService::new(&stores, &jwt, CookiePolicy::new(false));

        let refresh = service.codec().sign_refresh(&user.identity()).unwrap();
        let err = service
            .refresh(Some(&refresh.token), &session.request)
            .await
            .unwrap_err();

        assert_eq!(err.auth_kind(), Some(AuthError::InvalidOrExpiredToken));
        assert_eq!(*raced.stored.lock().unwrap(), 0);
    }

    #[test]
    fn test_dummy_hash_is_a_real_bcrypt_hash() {
        assert!(DUMMY_HASH.starts_with("$2b$10$"));
        assert!(bcrypt::verify("saiqa-timing-equalizer", DUMMY_HASH).unwrap());
    }

    #[tokio::test]
    async fn test_logout_deletes_exactly_one_row() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;

        let first = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        assert_eq!(session.backend.refresh_tokens.count_for_user(user.id), 2);

        let refresh = cookie_value(&first.set_cookies, REFRESH_COOKIE).unwrap();
        let outcome = session
            .service
            .logout(None, Some(&refresh), &session.request)
            .await
            .unwrap();

        assert_eq!(outcome.revoked, 1);
        assert_eq!(outcome.user_id, Some(user.id));
        assert_eq!(session.backend.refresh_tokens.count_for_user(user.id), 1);
        assert!(outcome.set_cookies.iter().all(|c| c.contains("Max-Age=0")));

        // Second logout with the same cookie is a no-op.
        let again = session
            .service
            .logout(None, Some(&refresh), &session.request)
            .await
            .unwrap();
        assert_eq!(again.revoked, 0);
    }

    #[tokio::test]
    async fn test_logout_without_cookies() {
        let session = setup().await;
        let outcome = session
            .service
            .logout(None, None, &session.request)
            .await
            .unwrap();
        assert_eq!(outcome.revoked, 0);
        assert_eq!(outcome.user_id, None);
        assert_eq!(outcome.set_cookies.len(), 2);
        assert!(session.backend.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_revokes_every_session() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;

        let grant = session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        session
            .service
            .login(Some("admin@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        let refresh = cookie_value(&grant.set_cookies, REFRESH_COOKIE).unwrap();
        let access = cookie_value(&grant.set_cookies, ACCESS_COOKIE).unwrap();
        let claims = session.service.codec().verify_access(&access).unwrap();

        session
            .service
            .change_password(&claims, Some(PASSWORD), Some("NewSecret456!"), &session.request)
            .await
            .unwrap();

        assert!(!session
            .backend
            .refresh_tokens
            .is_valid(&hash_for_storage(&refresh), user.id)
            .await
            .unwrap());
        assert_eq!(session.backend.refresh_tokens.count_for_user(user.id), 0);

        let stored = session.backend.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!verify_password(PASSWORD, &stored.password_hash));
        assert!(verify_password("NewSecret456!", &stored.password_hash));
        assert!(!stored.force_password_change);
    }

    #[tokio::test]
    async fn test_change_password_rejects_wrong_current_password() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;
        let claims = Claims::new(&user.identity(), 60_000, "saiqa");

        let err = session
            .service
            .change_password(&claims, Some("nope-nope"), Some("NewSecret456!"), &session.request)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::IncorrectCurrentPassword));
    }

    #[tokio::test]
    async fn test_change_password_rejects_short_password() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;
        let claims = Claims::new(&user.identity(), 60_000, "saiqa");

        let err = session
            .service
            .change_password(&claims, Some(PASSWORD), Some("short"), &session.request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::TooShort(_, 8))));
    }

    #[tokio::test]
    async fn test_reset_password_forces_change() {
        let session = setup().await;
        let admin = seed_user(&session, "admin@test.dev", Role::Admin).await;
        let target = seed_user(&session, "user@test.dev", Role::User).await;
        session
            .service
            .login(Some("user@test.dev"), Some(PASSWORD), &session.request)
            .await
            .unwrap();
        let claims = Claims::new(&admin.identity(), 60_000, "saiqa");

        session
            .service
            .reset_password(&claims, target.id, Some("Temporary123"), &session.request)
            .await
            .unwrap();

        assert_eq!(session.backend.refresh_tokens.count_for_user(target.id), 0);
        let grant = session
            .service
            .login(Some("user@test.dev"), Some("Temporary123"), &session.request)
            .await
            .unwrap();
        assert!(grant.body.requires_password_change);

        let reset = session
            .backend
            .audit
            .entries()
            .into_iter()
            .find(|e| e.action == AuditAction::ResetPassword)
            .unwrap();
        assert_eq!(reset.user_id, Some(admin.id));
        assert_eq!(reset.entity_id, Some(target.id));
    }

    #[tokio::test]
    async fn test_current_user_reports_expiry_in_millis() {
        let session = setup().await;
        let user = seed_user(&session, "admin@test.dev", Role::Admin).await;
        let claims = Claims::new(&user.identity(), 900_000, "saiqa");

        let me = session.service.current_user(&claims).await.unwrap();
        assert_eq!(me.user.id, user.id);
        assert_eq!(me.expires_at, claims.exp * 1000);
    }
}
