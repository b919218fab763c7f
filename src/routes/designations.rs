use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditAction, AuditEntry, AuditLog, EntityType};
use crate::error::{AppError, ConflictError, ErrorContext, ValidationError};
use crate::middleware::{AnyRole, Authorized, ManagerOrAdmin};
use crate::request_info::RequestInfo;
use crate::routes::{clean_text, nullable, parse_flag, parse_id, MessageResponse};
use crate::store::{
    Designation, DesignationChanges, DesignationFilter, NewDesignation, PageRequest, Pagination,
    Stores,
};
use crate::telemetry::ACTIVITY_TARGET;
use crate::validators;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDesignationsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub level: Option<i32>,
    pub is_active: Option<String>,
}

#[derive(Serialize)]
struct DesignationList {
    designations: Vec<Designation>,
    pagination: Pagination,
}

#[derive(Serialize)]
struct DesignationEnvelope {
    designation: Designation,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDesignationRequest {
    pub title: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub level: Option<i32>,
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDesignationRequest {
    pub title: Option<String>,
    pub code: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub level: Option<Option<i32>>,
    pub is_active: Option<bool>,
    pub metadata: Option<Value>,
}

/// GET /api/designations
pub async fn list_designations(
    _caller: Authorized<AnyRole>,
    query: web::Query<ListDesignationsQuery>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let filter = DesignationFilter {
        search: clean_text(query.search),
        level: query.level,
        is_active: parse_flag(query.is_active.as_deref()),
        page: PageRequest::new(query.page, query.limit),
    };

    let page = stores.designations.list(&filter).await?;
    Ok(HttpResponse::Ok().json(DesignationList {
        designations: page.items,
        pagination: page.pagination,
    }))
}

/// GET /api/designations/{id}
pub async fn get_designation(
    _caller: Authorized<AnyRole>,
    path: web::Path<String>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id("id", &path)?;
    let designation = stores
        .designations
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("Designation"))?;

    Ok(HttpResponse::Ok().json(DesignationEnvelope { designation }))
}

/// POST /api/designations
pub async fn create_designation(
    caller: Authorized<ManagerOrAdmin>,
    body: web::Json<CreateDesignationRequest>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("create_designation").with_user_id(caller.user_id);
    let body = body.into_inner();

    let title =
        validators::valid_name("title", validators::require("title", body.title.as_deref())?)?;
    let code = validators::valid_code(validators::require("code", body.code.as_deref())?)?;

    if stores
        .designations
        .code_exists(&code, None)
        .await
        .map_err(|e| ctx.fail(e))?
    {
        return Err(
            ConflictError::Duplicate("Designation code already exists".to_string()).into(),
        );
    }

    let designation = stores
        .designations
        .create(NewDesignation {
            title,
            code,
            description: clean_text(body.description),
            level: body.level,
            metadata: body.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_by: caller.user_id,
        })
        .await
        .map_err(|e| ctx.fail(e))?;

    audit
        .record(
            AuditEntry::new(AuditAction::Create, EntityType::Designation)
                .actor(caller.user_id)
                .entity(designation.id)
                .after(&designation)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "CREATE_DESIGNATION",
        designation_id = %designation.id,
        created_by = %caller.user_id,
        code = %designation.code,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Created().json(DesignationEnvelope { designation }))
}

/// PUT /api/designations/{id}
pub async fn update_designation(
    caller: Authorized<ManagerOrAdmin>,
    path: web::Path<String>,
    body: web::Json<UpdateDesignationRequest>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("update_designation").with_user_id(caller.user_id);
    let id = parse_id("id", &path)?;
    let body = body.into_inner();

    let changes = DesignationChanges {
        title: clean_text(body.title)
            .map(|title| validators::valid_name("title", &title))
            .transpose()?,
        code: clean_text(body.code)
            .map(|code| validators::valid_code(&code))
            .transpose()?,
        description: body.description.map(clean_text),
        level: body.level,
        is_active: body.is_active,
        metadata: body
            .metadata
            .filter(|m| m.as_object().map_or(true, |o| !o.is_empty())),
    };
    if changes.is_empty() {
        return Err(ValidationError::NothingToUpdate.into());
    }

    let current = stores
        .designations
        .find_by_id(id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("Designation"))?;

    if let Some(code) = changes.code.as_deref() {
        if code != current.code && stores.designations.code_exists(code, Some(id)).await? {
            return Err(
                ConflictError::Duplicate("Designation code already exists".to_string()).into(),
            );
        }
    }

    let updated = stores
        .designations
        .update(id, &changes, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("Designation"))?;

    audit
        .record(
            AuditEntry::new(AuditAction::Update, EntityType::Designation)
                .actor(caller.user_id)
                .entity(id)
                .before(&current)
                .after(&updated)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "UPDATE_DESIGNATION",
        designation_id = %id,
        updated_by = %caller.user_id,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(DesignationEnvelope {
        designation: updated,
    }))
}

/// DELETE /api/designations/{id}
///
/// Refused while users hold the designation.
pub async fn delete_designation(
    caller: Authorized<ManagerOrAdmin>,
    path: web::Path<String>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("delete_designation").with_user_id(caller.user_id);
    let id = parse_id("id", &path)?;

    let current = stores
        .designations
        .find_by_id(id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("Designation"))?;

    if stores.users.count_in_designation(id).await? > 0 {
        return Err(ConflictError::InUse(
            "Cannot delete designation with assigned users".to_string(),
        )
        .into());
    }

    if !stores
        .designations
        .deactivate(id, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
    {
        return Err(AppError::not_found("Designation"));
    }

    audit
        .record(
            AuditEntry::new(AuditAction::Delete, EntityType::Designation)
                .actor(caller.user_id)
                .entity(id)
                .before(&current)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "DELETE_DESIGNATION",
        designation_id = %id,
        deleted_by = %caller.user_id,
        code = %current.code,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(MessageResponse::new("Designation deleted successfully")))
}
