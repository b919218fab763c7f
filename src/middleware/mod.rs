/// Middleware module
///
/// The authentication gate runs as a `Transform` around the protected scope;
/// the authorization gate is an extractor evaluated per handler.

mod authentication;
mod authorization;

pub use authentication::Authenticate;
pub use authorization::{AdminOnly, AnyRole, Authorized, ManagerOrAdmin, RoleSet};
