/// User management routes
///
/// Listing and lookup are open to every authenticated caller. Creation and
/// deletion are admin only; updates are allowed to managers within the rules
/// in `auth::rbac`. Every caller may read and replace their own preferences.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditLog, EntityType};
use crate::auth::{generate_password, hash_password, rbac, SessionService};
use crate::error::{AppError, ConflictError, ErrorContext, ValidationError};
use crate::middleware::{AdminOnly, AnyRole, Authorized, ManagerOrAdmin};
use crate::request_info::RequestInfo;
use crate::routes::{clean_text, nullable, parse_flag, parse_id, parse_reference, MessageResponse};
use crate::store::{
    NewUser, PageRequest, Pagination, Stores, UserChanges, UserFilter, UserProfile,
};
use crate::telemetry::ACTIVITY_TARGET;
use crate::validators;

const GENERATED_PASSWORD_LENGTH: usize = 12;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub unit_id: Option<String>,
    pub is_active: Option<String>,
}

#[derive(Serialize)]
struct UserList {
    users: Vec<UserProfile>,
    pagination: Pagination,
}

#[derive(Serialize)]
struct UserEnvelope {
    user: UserProfile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedUser {
    user: UserProfile,
    /// Present only when the server generated the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub unit_id: Option<String>,
    pub designation_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub unit_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub designation_id: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub new_password: Option<String>,
}

/// Unit and designation references must point at existing rows.
async fn check_references(
    stores: &Stores,
    unit_id: Option<Uuid>,
    designation_id: Option<Uuid>,
) -> Result<(), AppError> {
    if let Some(unit_id) = unit_id {
        if stores.units.find_by_id(unit_id).await?.is_none() {
            return Err(ConflictError::InvalidReference("Unit not found".to_string()).into());
        }
    }
    if let Some(designation_id) = designation_id {
        if stores.designations.find_by_id(designation_id).await?.is_none() {
            return Err(
                ConflictError::InvalidReference("Designation not found".to_string()).into(),
            );
        }
    }
    Ok(())
}

/// GET /api/users
pub async fn list_users(
    _caller: Authorized<AnyRole>,
    query: web::Query<ListUsersQuery>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let role = match clean_text(query.role) {
        Some(role) => Some(validators::valid_role(&role)?),
        None => None,
    };
    let unit_id = match clean_text(query.unit_id) {
        Some(id) => Some(parse_id("unitId", &id)?),
        None => None,
    };

    let filter = UserFilter {
        search: clean_text(query.search),
        role,
        unit_id,
        is_active: parse_flag(query.is_active.as_deref()),
        page: PageRequest::new(query.page, query.limit),
    };

    let page = stores.users.list(&filter).await?;
    Ok(HttpResponse::Ok().json(UserList {
        users: page.items,
        pagination: page.pagination,
    }))
}

/// GET /api/users/{id}
pub async fn get_user(
    _caller: Authorized<AnyRole>,
    path: web::Path<String>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id("id", &path)?;
    let user = stores
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(HttpResponse::Ok().json(UserEnvelope {
        user: user.profile(),
    }))
}

/// POST /api/users
///
/// Without a `password` the server generates one, returns it once and the user
/// must change it at first login.
pub async fn create_user(
    caller: Authorized<AdminOnly>,
    body: web::Json<CreateUserRequest>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("create_user").with_user_id(caller.user_id);
    let body = body.into_inner();

    let email = validators::valid_email(validators::require("email", body.email.as_deref())?)?;
    let first_name = validators::valid_name(
        "firstName",
        validators::require("firstName", body.first_name.as_deref())?,
    )?;
    let last_name = validators::valid_name(
        "lastName",
        validators::require("lastName", body.last_name.as_deref())?,
    )?;
    let role = validators::valid_role(validators::require("role", body.role.as_deref())?)?;
    rbac::ensure_can_assign_role(caller.role, None, role)?;

    let unit_id = parse_reference("unitId", body.unit_id.map(Some))?.flatten();
    let designation_id = parse_reference("designationId", body.designation_id.map(Some))?.flatten();

    let (password, generated) = match body.password.filter(|p| !p.is_empty()) {
        Some(password) => (password, false),
        None => (generate_password(GENERATED_PASSWORD_LENGTH), true),
    };
    validators::valid_new_password("password", &password)?;

    if stores.users.email_exists(&email).await.map_err(|e| ctx.fail(e))? {
        return Err(ConflictError::Duplicate("Email already exists".to_string()).into());
    }
    check_references(&stores, unit_id, designation_id).await?;

    let password_hash = hash_password(&password)?;
    let user = stores
        .users
        .create(NewUser {
            email,
            password_hash,
            first_name,
            last_name,
            role,
            unit_id,
            designation_id,
            force_password_change: true,
            metadata: body.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_by: Some(caller.user_id),
        })
        .await
        .map_err(|e| ctx.fail(e))?;
    let profile = user.profile();

    audit
        .record(
            AuditEntry::new(AuditAction::Create, EntityType::User)
                .actor(caller.user_id)
                .entity(user.id)
                .after(&profile)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "CREATE_USER",
        user_id = %user.id,
        created_by = %caller.user_id,
        email = %user.email,
        role = %user.role,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Created().json(CreatedUser {
        user: profile,
        generated_password: generated.then_some(password),
    }))
}

/// PUT /api/users/{id}
///
/// # Errors
/// - 400: nothing to update, bad field, self-deactivation, unknown unit or designation
/// - 403: manager touching an admin, or a non-admin changing a role
/// - 404: no such user
pub async fn update_user(
    caller: Authorized<ManagerOrAdmin>,
    path: web::Path<String>,
    body: web::Json<UpdateUserRequest>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("update_user").with_user_id(caller.user_id);
    let id = parse_id("id", &path)?;
    let body = body.into_inner();

    let changes = UserChanges {
        first_name: clean_text(body.first_name)
            .map(|name| validators::valid_name("firstName", &name))
            .transpose()?,
        last_name: clean_text(body.last_name)
            .map(|name| validators::valid_name("lastName", &name))
            .transpose()?,
        role: clean_text(body.role)
            .map(|role| validators::valid_role(&role))
            .transpose()?,
        unit_id: parse_reference("unitId", body.unit_id)?,
        designation_id: parse_reference("designationId", body.designation_id)?,
        is_active: body.is_active,
        metadata: body
            .metadata
            .filter(|m| m.as_object().map_or(true, |o| !o.is_empty())),
    };
    if changes.is_empty() {
        return Err(ValidationError::NothingToUpdate.into());
    }

    let current = stores
        .users
        .find_by_id(id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("User"))?;

    rbac::ensure_can_update(
        caller.claims(),
        current.id,
        current.role,
        changes.role,
        changes.is_active == Some(false),
    )?;
    check_references(
        &stores,
        changes.unit_id.flatten(),
        changes.designation_id.flatten(),
    )
    .await?;

    let updated = stores
        .users
        .update(id, &changes, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("User"))?;
    let profile = updated.profile();

    audit
        .record(
            AuditEntry::new(AuditAction::Update, EntityType::User)
                .actor(caller.user_id)
                .entity(id)
                .before(&current.profile())
                .after(&profile)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "UPDATE_USER",
        user_id = %id,
        updated_by = %caller.user_id,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(UserEnvelope { user: profile }))
}

/// DELETE /api/users/{id}
///
/// Soft delete: the account is deactivated, never removed.
pub async fn delete_user(
    caller: Authorized<AdminOnly>,
    path: web::Path<String>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("delete_user").with_user_id(caller.user_id);
    let id = parse_id("id", &path)?;

    let current = stores
        .users
        .find_by_id(id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("User"))?;

    rbac::ensure_not_self(caller.user_id, id, "delete")?;
    rbac::ensure_can_manage(caller.role, current.role)?;

    if !stores
        .users
        .deactivate(id, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
    {
        return Err(AppError::not_found("User"));
    }

    audit
        .record(
            AuditEntry::new(AuditAction::Delete, EntityType::User)
                .actor(caller.user_id)
                .entity(id)
                .before(&current.profile())
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "DELETE_USER",
        user_id = %id,
        deleted_by = %caller.user_id,
        email = %current.email,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(MessageResponse::new("User deleted successfully")))
}

/// POST /api/users/{id}/reset-password
pub async fn reset_password(
    caller: Authorized<AdminOnly>,
    path: web::Path<String>,
    body: web::Json<ResetPasswordRequest>,
    request: RequestInfo,
    session: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id("id", &path)?;
    session
        .reset_password(caller.claims(), id, body.new_password.as_deref(), &request)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "Password reset successfully. User will be required to change password on next login.",
    )))
}

#[derive(Serialize)]
struct PreferencesEnvelope {
    preferences: Value,
}

/// GET /api/users/me/preferences
pub async fn get_preferences(
    caller: Authorized<AnyRole>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let preferences = stores
        .users
        .get_preferences(caller.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(HttpResponse::Ok().json(PreferencesEnvelope { preferences }))
}

/// PUT /api/users/me/preferences
///
/// The body replaces the stored object wholesale.
pub async fn update_preferences(
    caller: Authorized<AnyRole>,
    body: web::Json<Value>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("update_preferences").with_user_id(caller.user_id);
    let preferences = body.into_inner();
    if !preferences.is_object() {
        return Err(ValidationError::NotAnObject("Preferences".to_string()).into());
    }

    let previous = stores
        .users
        .get_preferences(caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("User"))?;

    let updated = stores
        .users
        .set_preferences(caller.user_id, &preferences, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("User"))?;

    audit
        .record(
            AuditEntry::new(AuditAction::UpdatePreferences, EntityType::User)
                .actor(caller.user_id)
                .entity(caller.user_id)
                .before(&previous)
                .after(&updated)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "UPDATE_PREFERENCES",
        user_id = %caller.user_id,
        changes = %preferences,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(PreferencesEnvelope {
        preferences: updated,
    }))
}
