/// Authorization Gate
///
/// `Authorized<R>` is a handler argument that only extracts when the claims
/// attached by `Authenticate` carry a role in `R::ALLOWED`.

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use std::marker::PhantomData;
use std::ops::Deref;

use crate::auth::rbac::{self, ADMIN_ONLY, MANAGER_OR_ADMIN};
use crate::auth::{Claims, Role};
use crate::error::{AppError, AuthError};
use crate::telemetry::SECURITY_TARGET;

/// A fixed set of roles allowed through the gate
pub trait RoleSet {
    const ALLOWED: &'static [Role];
}

pub struct AdminOnly;

impl RoleSet for AdminOnly {
    const ALLOWED: &'static [Role] = ADMIN_ONLY;
}

pub struct ManagerOrAdmin;

impl RoleSet for ManagerOrAdmin {
    const ALLOWED: &'static [Role] = MANAGER_OR_ADMIN;
}

/// Any authenticated caller
pub struct AnyRole;

impl RoleSet for AnyRole {
    const ALLOWED: &'static [Role] = &Role::ALL;
}

pub struct Authorized<R: RoleSet> {
    claims: Claims,
    _roles: PhantomData<R>,
}

impl<R: RoleSet> Authorized<R> {
    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

impl<R: RoleSet> Deref for Authorized<R> {
    type Target = Claims;

    fn deref(&self) -> &Claims {
        &self.claims
    }
}

fn authorize_request(req: &HttpRequest, allowed: &[Role]) -> Result<Claims, AuthError> {
    let extensions = req.extensions();
    let result = rbac::authorize(extensions.get::<Claims>(), allowed).map(Claims::clone);

    if let Err(AuthError::InsufficientPermissions) = result {
        if let Some(claims) = extensions.get::<Claims>() {
            tracing::warn!(
                target: SECURITY_TARGET,
                user_id = %claims.user_id,
                role = %claims.role,
                path = %req.path(),
                "Permission denied"
            );
        }
    }
    result
}

impl<R: RoleSet> FromRequest for Authorized<R> {
    type Error = AppError;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let result = authorize_request(req, R::ALLOWED)
            .map(|claims| Authorized {
                claims,
                _roles: PhantomData,
            })
            .map_err(AppError::from);
        std::future::ready(result)
    }
}
