/// Role-based access control
///
/// `authorize` is the authorization gate applied to every protected operation.
/// The `ensure_*` functions are the account-management rules layered on top of
/// it at the call sites that create, update or delete users.

use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::auth::roles::Role;
use crate::error::{AppError, AuthError, ConflictError};

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const MANAGER_OR_ADMIN: &[Role] = &[Role::Admin, Role::Manager];

/// Check the caller's role against the allowed set.
///
/// `identity` is whatever the authentication gate attached to the request.
pub fn authorize<'a>(identity: Option<&'a Claims>, allowed: &[Role]) -> Result<&'a Claims, AuthError> {
    let claims = identity.ok_or(AuthError::AuthenticationRequired)?;
    if allowed.contains(&claims.role) {
        Ok(claims)
    } else {
        Err(AuthError::InsufficientPermissions)
    }
}

/// A caller may not deactivate or delete their own account.
pub fn ensure_not_self(actor_id: Uuid, target_id: Uuid, action: &str) -> Result<(), ConflictError> {
    if actor_id == target_id {
        return Err(ConflictError::SelfModification(format!(
            "Cannot {} your own account",
            action
        )));
    }
    Ok(())
}

/// Only admins may manage accounts that hold the admin role.
pub fn ensure_can_manage(actor: Role, target: Role) -> Result<(), ConflictError> {
    if target == Role::Admin && actor != Role::Admin {
        return Err(ConflictError::ProtectedAccount(
            "Only admins can manage admin users".to_string(),
        ));
    }
    Ok(())
}

/// Role assignment on create (`current = None`) or update.
///
/// Granting admin requires an admin. Changing an existing role also requires an admin.
pub fn ensure_can_assign_role(
    actor: Role,
    current: Option<Role>,
    requested: Role,
) -> Result<(), AuthError> {
    if actor == Role::Admin {
        return Ok(());
    }
    if requested == Role::Admin {
        return Err(AuthError::InsufficientPermissions);
    }
    match current {
        Some(current) if current != requested => Err(AuthError::InsufficientPermissions),
        _ => Ok(()),
    }
}

/// Every rule for updating `target` (currently `target_role`) in one place.
pub fn ensure_can_update(
    actor: &Claims,
    target_id: Uuid,
    target_role: Role,
    requested_role: Option<Role>,
    deactivating: bool,
) -> Result<(), AppError> {
    ensure_can_manage(actor.role, target_role)?;
    if let Some(requested) = requested_role {
        ensure_can_assign_role(actor.role, Some(target_role), requested)?;
    }
    if deactivating {
        ensure_not_self(actor.user_id, target_id, "deactivate")?;
    }
    Ok(())
}
