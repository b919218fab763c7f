/// Authentication and authorization
///
/// Password hashing, token signing, refresh-token persistence, cookie transport,
/// role checks and the session operations built from them.

pub mod claims;
pub mod cookies;
pub mod jwt;
pub mod password;
pub mod rbac;
pub mod refresh_token;
pub mod roles;
pub mod session;

pub use claims::{Claims, Identity};
pub use cookies::{CookiePolicy, ACCESS_COOKIE, REFRESH_COOKIE};
pub use jwt::{hash_for_storage, IssuedToken, TokenCodec};
pub use password::{generate_password, hash_password, verify_password};
pub use refresh_token::{PgRefreshTokenStore, RefreshTokenStore};
pub use roles::Role;
pub use session::SessionService;
