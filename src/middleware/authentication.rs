/// Authentication Gate
///
/// Reads the access token from the `accessToken` cookie, verifies it and
/// attaches the resulting `Claims` to the request extensions. A missing or
/// invalid token ends the request with a 401 before any handler runs.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::cookies::get_cookie;
use crate::auth::{TokenCodec, ACCESS_COOKIE};
use crate::error::{AppError, AuthError};
use crate::telemetry::SECURITY_TARGET;

/// Wrap a scope with this to require a valid access cookie on every route in it.
pub struct Authenticate {
    codec: TokenCodec,
}

impl Authenticate {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authenticate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticateService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthenticateService {
            service: Rc::new(service),
            codec: self.codec.clone(),
        }))
    }
}

pub struct AuthenticateService<S> {
    service: Rc<S>,
    codec: TokenCodec,
}

impl<S> AuthenticateService<S> {
    /// Any failure here is an authentication failure, never a 500.
    fn authenticate(&self, req: &ServiceRequest) -> Result<(), AuthError> {
        let token = get_cookie(req.headers(), ACCESS_COOKIE)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::AuthenticationRequired)?;

        let claims = self.codec.verify_access(&token)?;

        tracing::debug!(
            user_id = %claims.user_id,
            role = %claims.role,
            "Access token verified"
        );
        req.extensions_mut().insert(claims);
        Ok(())
    }
}

impl<S, B> Service<ServiceRequest> for AuthenticateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match self.authenticate(&req) {
            Ok(()) => {
                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(kind) => {
                tracing::warn!(
                    target: SECURITY_TARGET,
                    path = %req.path(),
                    reason = %kind,
                    "Request rejected by authentication gate"
                );
                Box::pin(async move { Err(AppError::from(kind).into()) })
            }
        }
    }
}
