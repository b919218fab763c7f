use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{Page, PageRequest, Pagination};

/// Organizational unit. Units form a tree through `parent_unit_id`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub parent_unit_id: Option<Uuid>,
    pub parent_unit_name: Option<String>,
    pub is_active: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewUnit {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub parent_unit_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
}

/// Partial update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct UnitChanges {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<Option<String>>,
    pub parent_unit_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

impl UnitChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.description.is_none()
            && self.parent_unit_id.is_none()
            && self.is_active.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    /// Matches name or code, case-insensitively.
    pub search: Option<String>,
    pub is_active: Option<bool>,
    /// `Some(None)` selects root units only.
    pub parent_unit_id: Option<Option<Uuid>>,
    pub page: PageRequest,
}

#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn list(&self, filter: &UnitFilter) -> Result<Page<Unit>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Unit>, AppError>;

    /// True when another unit (other than `exclude`) already uses `code`.
    async fn code_exists(&self, code: &str, exclude: Option<Uuid>) -> Result<bool, AppError>;

    async fn create(&self, unit: NewUnit) -> Result<Unit, AppError>;

    async fn update(
        &self,
        id: Uuid,
        changes: &UnitChanges,
        updated_by: Uuid,
    ) -> Result<Option<Unit>, AppError>;

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError>;

    async fn count_children(&self, id: Uuid) -> Result<i64, AppError>;
}

const UNIT_SELECT: &str = r#"
    SELECT u.id, u.name, u.code, u.description, u.parent_unit_id, parent.name AS parent_unit_name,
           u.is_active, u.metadata, u.created_at, u.updated_at, u.created_by, u.updated_by
    FROM units u
    LEFT JOIN units parent ON u.parent_unit_id = parent.id
"#;

pub struct PgUnitStore {
    pool: PgPool,
}

impl PgUnitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_unit_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UnitFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        qb.push(" AND (u.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.code ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND u.is_active = ").push_bind(is_active);
    }
    match filter.parent_unit_id {
        Some(Some(parent)) => {
            qb.push(" AND u.parent_unit_id = ").push_bind(parent);
        }
        Some(None) => {
            qb.push(" AND u.parent_unit_id IS NULL");
        }
        None => {}
    }
}

#[async_trait]
impl UnitStore for PgUnitStore {
    async fn list(&self, filter: &UnitFilter) -> Result<Page<Unit>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM units u");
        push_unit_filters(&mut count, filter);
        let (total,) = count.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(UNIT_SELECT);
        push_unit_filters(&mut qb, filter);
        qb.push(" ORDER BY u.created_at DESC LIMIT ")
            .push_bind(filter.page.limit)
            .push(" OFFSET ")
            .push_bind(filter.page.offset());

        let items = qb.build_query_as::<Unit>().fetch_all(&self.pool).await?;

        Ok(Page {
            items,
            pagination: Pagination::new(filter.page, total),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Unit>, AppError> {
        let sql = format!("{} WHERE u.id = $1", UNIT_SELECT);
        let unit = sqlx::query_as::<_, Unit>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(unit)
    }

    async fn code_exists(&self, code: &str, exclude: Option<Uuid>) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM units WHERE code = $1 AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(code)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create(&self, unit: NewUnit) -> Result<Unit, AppError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO units (id, name, code, description, parent_unit_id, metadata, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&unit.name)
        .bind(&unit.code)
        .bind(&unit.description)
        .bind(unit.parent_unit_id)
        .bind(&unit.metadata)
        .bind(unit.created_by)
        .fetch_one(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or_else(|| AppError::not_found("Unit"))
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &UnitChanges,
        updated_by: Uuid,
    ) -> Result<Option<Unit>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE units SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(name) = &changes.name {
                set.push("name = ").push_bind_unseparated(name.clone());
            }
            if let Some(code) = &changes.code {
                set.push("code = ").push_bind_unseparated(code.clone());
            }
            if let Some(description) = &changes.description {
                set.push("description = ").push_bind_unseparated(description.clone());
            }
            if let Some(parent) = changes.parent_unit_id {
                set.push("parent_unit_id = ").push_bind_unseparated(parent);
            }
            if let Some(is_active) = changes.is_active {
                set.push("is_active = ").push_bind_unseparated(is_active);
            }
            if let Some(metadata) = &changes.metadata {
                set.push("metadata = ").push_bind_unseparated(metadata.clone());
            }
            set.push("updated_by = ").push_bind_unseparated(updated_by);
            set.push("updated_at = NOW()");
        }
        qb.push(" WHERE id = ").push_bind(id);

        if qb.build().execute(&self.pool).await?.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE units SET is_active = false, updated_by = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(updated_by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_children(&self, id: Uuid) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM units WHERE parent_unit_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
