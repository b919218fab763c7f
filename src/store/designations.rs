use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{Page, PageRequest, Pagination};

/// Job title with an optional seniority level
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Designation {
    pub id: Uuid,
    pub title: String,
    pub code: String,
    pub description: Option<String>,
    pub level: Option<i32>,
    pub is_active: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewDesignation {
    pub title: String,
    pub code: String,
    pub description: Option<String>,
    pub level: Option<i32>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct DesignationChanges {
    pub title: Option<String>,
    pub code: Option<String>,
    pub description: Option<Option<String>>,
    pub level: Option<Option<i32>>,
    pub is_active: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

impl DesignationChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.code.is_none()
            && self.description.is_none()
            && self.level.is_none()
            && self.is_active.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DesignationFilter {
    /// Matches title, code or description, case-insensitively.
    pub search: Option<String>,
    pub level: Option<i32>,
    pub is_active: Option<bool>,
    pub page: PageRequest,
}

#[async_trait]
pub trait DesignationStore: Send + Sync {
    /// Ordered by level, then newest first.
    async fn list(&self, filter: &DesignationFilter) -> Result<Page<Designation>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Designation>, AppError>;

    async fn code_exists(&self, code: &str, exclude: Option<Uuid>) -> Result<bool, AppError>;

    async fn create(&self, designation: NewDesignation) -> Result<Designation, AppError>;

    async fn update(
        &self,
        id: Uuid,
        changes: &DesignationChanges,
        updated_by: Uuid,
    ) -> Result<Option<Designation>, AppError>;

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError>;
}

const DESIGNATION_COLUMNS: &str = "id, title, code, description, level, is_active, metadata, \
                                   created_at, updated_at, created_by, updated_by";

pub struct PgDesignationStore {
    pool: PgPool,
}

impl PgDesignationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_designation_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &DesignationFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(level) = filter.level {
        qb.push(" AND level = ").push_bind(level);
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(is_active);
    }
}

#[async_trait]
impl DesignationStore for PgDesignationStore {
    async fn list(&self, filter: &DesignationFilter) -> Result<Page<Designation>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM designations");
        push_designation_filters(&mut count, filter);
        let (total,) = count.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM designations",
            DESIGNATION_COLUMNS
        ));
        push_designation_filters(&mut qb, filter);
        qb.push(" ORDER BY level ASC NULLS LAST, created_at DESC LIMIT ")
            .push_bind(filter.page.limit)
            .push(" OFFSET ")
            .push_bind(filter.page.offset());

        let items = qb
            .build_query_as::<Designation>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items,
            pagination: Pagination::new(filter.page, total),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Designation>, AppError> {
        let sql = format!("SELECT {} FROM designations WHERE id = $1", DESIGNATION_COLUMNS);
        let designation = sqlx::query_as::<_, Designation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(designation)
    }

    async fn code_exists(&self, code: &str, exclude: Option<Uuid>) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM designations WHERE code = $1 AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(code)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create(&self, designation: NewDesignation) -> Result<Designation, AppError> {
        let sql = format!(
            "INSERT INTO designations (id, title, code, description, level, metadata, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            DESIGNATION_COLUMNS
        );
        let created = sqlx::query_as::<_, Designation>(&sql)
            .bind(Uuid::new_v4())
            .bind(&designation.title)
            .bind(&designation.code)
            .bind(&designation.description)
            .bind(designation.level)
            .bind(&designation.metadata)
            .bind(designation.created_by)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &DesignationChanges,
        updated_by: Uuid,
    ) -> Result<Option<Designation>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE designations SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(title) = &changes.title {
                set.push("title = ").push_bind_unseparated(title.clone());
            }
            if let Some(code) = &changes.code {
                set.push("code = ").push_bind_unseparated(code.clone());
            }
            if let Some(description) = &changes.description {
                set.push("description = ").push_bind_unseparated(description.clone());
            }
            if let Some(level) = changes.level {
                set.push("level = ").push_bind_unseparated(level);
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
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(DESIGNATION_COLUMNS);

        let updated = qb
            .build_query_as::<Designation>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(updated)
    }

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE designations SET is_active = false, updated_by = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(updated_by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
