/// Cookie transport for session tokens
///
/// Parsing of the `Cookie` request header and serialization of `Set-Cookie`
/// values. Values are percent-encoded on the way out and decoded on the way in.

use actix_web::http::header::{HeaderMap, COOKIE};
use std::collections::HashMap;

/// Cookie carrying the access token
pub const ACCESS_COOKIE: &str = "accessToken";
/// Cookie carrying the refresh token
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Attributes of a `Set-Cookie` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    /// Emits `SameSite=Strict`; session cookies never go cross-site.
    pub same_site_strict: bool,
    /// Seconds. `Some(0)` expires the cookie immediately.
    pub max_age: Option<i64>,
    pub path: Option<String>,
}

/// Parse a `Cookie` header into name/value pairs.
///
/// Pairs with an empty name or value are skipped. Values that are not valid
/// percent-encoding are kept verbatim.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                return None;
            }
            let value = urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string());
            Some((name.to_string(), value))
        })
        .collect()
}

/// Read one cookie from request headers.
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .filter_map(|value| value.to_str().ok())
        .find_map(|header| parse_cookies(header).remove(name))
}

/// Render a complete `Set-Cookie` value.
pub fn serialize_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut parts = vec![format!("{}={}", name, urlencoding::encode(value))];

    if options.http_only {
        parts.push("HttpOnly".to_string());
    }
    if options.secure {
        parts.push("Secure".to_string());
    }
    if options.same_site_strict {
        parts.push("SameSite=Strict".to_string());
    }
    if let Some(max_age) = options.max_age {
        parts.push(format!("Max-Age={}", max_age));
    }
    if let Some(path) = &options.path {
        parts.push(format!("Path={}", path));
    }

    parts.join("; ")
}

/// Attribute policy shared by both session cookies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn options(&self, max_age: i64) -> CookieOptions {
        CookieOptions {
            http_only: true,
            secure: self.secure,
            same_site_strict: true,
            max_age: Some(max_age),
            path: Some("/".to_string()),
        }
    }

    /// Session cookie living as long as its token (`lifetime_ms` in milliseconds).
    pub fn session_cookie(&self, name: &str, value: &str, lifetime_ms: i64) -> String {
        serialize_cookie(name, value, &self.options(lifetime_ms / 1000))
    }

    /// Expire a session cookie.
    pub fn clear_cookie(&self, name: &str) -> String {
        serialize_cookie(name, "", &self.options(0))
    }
}
