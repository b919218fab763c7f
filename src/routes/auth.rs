/// Authentication Routes
///
/// Login, token refresh, logout, password change and current user. Tokens travel
/// only in HTTP-only cookies; response bodies never contain them.

use actix_web::{http::header::SET_COOKIE, web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde::Deserialize;

use crate::auth::cookies::get_cookie;
use crate::auth::{SessionService, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::error::AppError;
use crate::middleware::{AnyRole, Authorized};
use crate::request_info::RequestInfo;
use crate::routes::MessageResponse;

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

fn with_cookies(mut builder: HttpResponseBuilder, set_cookies: &[String]) -> HttpResponseBuilder {
    for cookie in set_cookies {
        builder.append_header((SET_COOKIE, cookie.as_str()));
    }
    builder
}

/// POST /api/auth/login
///
/// Sets `accessToken` and `refreshToken` cookies and returns the user.
///
/// # Errors
/// - 400: email or password missing
/// - 401: unknown email, inactive account or wrong password (same body for all)
pub async fn login(
    body: web::Json<LoginRequest>,
    request: RequestInfo,
    session: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let grant = session
        .login(body.email.as_deref(), body.password.as_deref(), &request)
        .await?;

    Ok(with_cookies(HttpResponse::Ok(), &grant.set_cookies).json(grant.body))
}

/// POST /api/auth/refresh
///
/// Reissues the access cookie from the refresh cookie.
///
/// # Errors
/// - 401: refresh cookie missing, invalid, revoked or expired; user gone
pub async fn refresh(
    req: HttpRequest,
    request: RequestInfo,
    session: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let token = get_cookie(req.headers(), REFRESH_COOKIE);
    let grant = session.refresh(token.as_deref(), &request).await?;

    Ok(with_cookies(HttpResponse::Ok(), &grant.set_cookies).json(grant.body))
}

/// POST /api/auth/logout
///
/// Always succeeds and clears both cookies.
pub async fn logout(
    req: HttpRequest,
    request: RequestInfo,
    session: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let access = get_cookie(req.headers(), ACCESS_COOKIE);
    let refresh = get_cookie(req.headers(), REFRESH_COOKIE);
    let outcome = session
        .logout(access.as_deref(), refresh.as_deref(), &request)
        .await?;

    Ok(with_cookies(HttpResponse::Ok(), &outcome.set_cookies)
        .json(MessageResponse::new("Logged out successfully")))
}

/// POST /api/auth/change-password
///
/// # Errors
/// - 400: a field is missing or the new password is shorter than 8 characters
/// - 401: current password is wrong
/// - 404: the caller's account no longer exists
pub async fn change_password(
    caller: Authorized<AnyRole>,
    body: web::Json<ChangePasswordRequest>,
    request: RequestInfo,
    session: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    session
        .change_password(
            caller.claims(),
            body.current_password.as_deref(),
            body.new_password.as_deref(),
            &request,
        )
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Password changed successfully")))
}

/// GET /api/auth/me
pub async fn me(
    caller: Authorized<AnyRole>,
    session: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let current = session.current_user(caller.claims()).await?;
    Ok(HttpResponse::Ok().json(current))
}
