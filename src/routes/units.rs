use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditLog, EntityType};
use crate::error::{AppError, ConflictError, ErrorContext, ValidationError};
use crate::middleware::{AnyRole, Authorized, ManagerOrAdmin};
use crate::request_info::RequestInfo;
use crate::routes::{clean_text, nullable, parse_flag, parse_id, parse_reference, MessageResponse};
use crate::store::{NewUnit, PageRequest, Pagination, Stores, Unit, UnitChanges, UnitFilter};
use crate::telemetry::ACTIVITY_TARGET;
use crate::validators;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUnitsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<String>,
    /// A unit id, or `null` for root units.
    pub parent_unit_id: Option<String>,
}

#[derive(Serialize)]
struct UnitList {
    units: Vec<Unit>,
    pagination: Pagination,
}

#[derive(Serialize)]
struct UnitEnvelope {
    unit: Unit,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnitRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub parent_unit_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUnitRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub parent_unit_id: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub metadata: Option<Value>,
}

fn parent_filter(raw: Option<String>) -> Result<Option<Option<Uuid>>, ValidationError> {
    match clean_text(raw) {
        None => Ok(None),
        Some(value) if value == "null" => Ok(Some(None)),
        Some(value) => parse_id("parentUnitId", &value).map(|id| Some(Some(id))),
    }
}

async fn ensure_parent_exists(stores: &Stores, parent_id: Uuid) -> Result<(), AppError> {
    if stores.units.find_by_id(parent_id).await?.is_none() {
        return Err(ConflictError::InvalidReference("Parent unit not found".to_string()).into());
    }
    Ok(())
}

/// GET /api/units
pub async fn list_units(
    _caller: Authorized<AnyRole>,
    query: web::Query<ListUnitsQuery>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let filter = UnitFilter {
        search: clean_text(query.search),
        is_active: parse_flag(query.is_active.as_deref()),
        parent_unit_id: parent_filter(query.parent_unit_id)?,
        page: PageRequest::new(query.page, query.limit),
    };

    let page = stores.units.list(&filter).await?;
    Ok(HttpResponse::Ok().json(UnitList {
        units: page.items,
        pagination: page.pagination,
    }))
}

/// GET /api/units/{id}
pub async fn get_unit(
    _caller: Authorized<AnyRole>,
    path: web::Path<String>,
    stores: web::Data<Stores>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id("id", &path)?;
    let unit = stores
        .units
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("Unit"))?;

    Ok(HttpResponse::Ok().json(UnitEnvelope { unit }))
}

/// POST /api/units
pub async fn create_unit(
    caller: Authorized<ManagerOrAdmin>,
    body: web::Json<CreateUnitRequest>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("create_unit").with_user_id(caller.user_id);
    let body = body.into_inner();

    let name = validators::valid_name("name", validators::require("name", body.name.as_deref())?)?;
    let code = validators::valid_code(validators::require("code", body.code.as_deref())?)?;
    let parent_unit_id = parse_reference("parentUnitId", body.parent_unit_id.map(Some))?.flatten();

    if stores.units.code_exists(&code, None).await.map_err(|e| ctx.fail(e))? {
        return Err(ConflictError::Duplicate("Unit code already exists".to_string()).into());
    }
    if let Some(parent_id) = parent_unit_id {
        ensure_parent_exists(&stores, parent_id).await?;
    }

    let unit = stores
        .units
        .create(NewUnit {
            name,
            code,
            description: clean_text(body.description),
            parent_unit_id,
            metadata: body.metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_by: caller.user_id,
        })
        .await
        .map_err(|e| ctx.fail(e))?;

    audit
        .record(
            AuditEntry::new(AuditAction::Create, EntityType::Unit)
                .actor(caller.user_id)
                .entity(unit.id)
                .after(&unit)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "CREATE_UNIT",
        unit_id = %unit.id,
        created_by = %caller.user_id,
        code = %unit.code,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Created().json(UnitEnvelope { unit }))
}

/// PUT /api/units/{id}
pub async fn update_unit(
    caller: Authorized<ManagerOrAdmin>,
    path: web::Path<String>,
    body: web::Json<UpdateUnitRequest>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("update_unit").with_user_id(caller.user_id);
    let id = parse_id("id", &path)?;
    let body = body.into_inner();

    let changes = UnitChanges {
        name: clean_text(body.name)
            .map(|name| validators::valid_name("name", &name))
            .transpose()?,
        code: clean_text(body.code)
            .map(|code| validators::valid_code(&code))
            .transpose()?,
        description: body.description.map(clean_text),
        parent_unit_id: parse_reference("parentUnitId", body.parent_unit_id)?,
        is_active: body.is_active,
        metadata: body
            .metadata
            .filter(|m| m.as_object().map_or(true, |o| !o.is_empty())),
    };
    if changes.is_empty() {
        return Err(ValidationError::NothingToUpdate.into());
    }

    let current = stores
        .units
        .find_by_id(id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("Unit"))?;

    if let Some(code) = changes.code.as_deref() {
        if code != current.code && stores.units.code_exists(code, Some(id)).await? {
            return Err(ConflictError::Duplicate("Unit code already exists".to_string()).into());
        }
    }
    if let Some(Some(parent_id)) = changes.parent_unit_id {
        if parent_id == id {
            return Err(ConflictError::InvalidReference(
                "Unit cannot be its own parent".to_string(),
            )
            .into());
        }
        ensure_parent_exists(&stores, parent_id).await?;
    }

    let updated = stores
        .units
        .update(id, &changes, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("Unit"))?;

    audit
        .record(
            AuditEntry::new(AuditAction::Update, EntityType::Unit)
                .actor(caller.user_id)
                .entity(id)
                .before(&current)
                .after(&updated)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "UPDATE_UNIT",
        unit_id = %id,
        updated_by = %caller.user_id,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(UnitEnvelope { unit: updated }))
}

/// DELETE /api/units/{id}
///
/// Refused while the unit has child units or assigned users.
pub async fn delete_unit(
    caller: Authorized<ManagerOrAdmin>,
    path: web::Path<String>,
    request: RequestInfo,
    stores: web::Data<Stores>,
    audit: web::Data<AuditLog>,
) -> Result<HttpResponse, AppError> {
    let ctx = ErrorContext::new("delete_unit").with_user_id(caller.user_id);
    let id = parse_id("id", &path)?;

    let current = stores
        .units
        .find_by_id(id)
        .await
        .map_err(|e| ctx.fail(e))?
        .ok_or_else(|| AppError::not_found("Unit"))?;

    if stores.units.count_children(id).await? > 0 {
        return Err(ConflictError::InUse("Cannot delete unit with child units".to_string()).into());
    }
    if stores.users.count_in_unit(id).await? > 0 {
        return Err(
            ConflictError::InUse("Cannot delete unit with assigned users".to_string()).into(),
        );
    }

    if !stores
        .units
        .deactivate(id, caller.user_id)
        .await
        .map_err(|e| ctx.fail(e))?
    {
        return Err(AppError::not_found("Unit"));
    }

    audit
        .record(
            AuditEntry::new(AuditAction::Delete, EntityType::Unit)
                .actor(caller.user_id)
                .entity(id)
                .before(&current)
                .request(&request),
        )
        .await;

    tracing::info!(
        target: ACTIVITY_TARGET,
        event = "DELETE_UNIT",
        unit_id = %id,
        deleted_by = %caller.user_id,
        code = %current.code,
        ip = %request.ip_address
    );

    Ok(HttpResponse::Ok().json(MessageResponse::new("Unit deleted successfully")))
}
