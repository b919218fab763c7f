/// User records
///
/// The session core only reads users and rewrites their password; the rest of
/// this trait serves the user management endpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::auth::{Identity, Role};
use crate::error::AppError;
use crate::store::{Page, PageRequest, Pagination};

/// Stored user, including the password hash. Never serialized directly.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub unit_id: Option<Uuid>,
    pub designation_id: Option<Uuid>,
    pub unit_name: Option<String>,
    pub designation_title: Option<String>,
    pub is_active: bool,
    pub force_password_change: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            email: self.email.clone(),
            role: self.role,
        }
    }

    /// The user as returned to callers, without the password hash.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            unit_id: self.unit_id,
            designation_id: self.designation_id,
            unit_name: self.unit_name.clone(),
            designation_title: self.designation_title.clone(),
            is_active: self.is_active,
            force_password_change: self.force_password_change,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub unit_id: Option<Uuid>,
    pub designation_id: Option<Uuid>,
    pub unit_name: Option<String>,
    pub designation_title: Option<String>,
    pub is_active: bool,
    pub force_password_change: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub unit_id: Option<Uuid>,
    pub designation_id: Option<Uuid>,
    pub force_password_change: bool,
    pub metadata: serde_json::Value,
    pub created_by: Option<Uuid>,
}

/// Partial update. `Some(None)` clears a nullable reference.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub unit_id: Option<Option<Uuid>>,
    pub designation_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.role.is_none()
            && self.unit_id.is_none()
            && self.designation_id.is_none()
            && self.is_active.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<Role>,
    pub unit_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub page: PageRequest,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_active_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn list(&self, filter: &UserFilter) -> Result<Page<UserProfile>, AppError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AppError>;

    async fn create(&self, user: NewUser) -> Result<User, AppError>;

    /// Returns `None` when no user has this id.
    async fn update(
        &self,
        id: Uuid,
        changes: &UserChanges,
        updated_by: Uuid,
    ) -> Result<Option<User>, AppError>;

    /// Replace the password hash and set the force-change flag. Returns false
    /// when no user has this id.
    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        force_password_change: bool,
        updated_by: Uuid,
    ) -> Result<bool, AppError>;

    /// Soft delete. Returns false when no user has this id.
    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError>;

    async fn count_in_unit(&self, unit_id: Uuid) -> Result<i64, AppError>;

    async fn count_in_designation(&self, designation_id: Uuid) -> Result<i64, AppError>;

    /// Per-user UI preferences, `{}` until first set. `None` when no user has this id.
    async fn get_preferences(&self, id: Uuid) -> Result<Option<serde_json::Value>, AppError>;

    /// Replace the whole preferences object and return the stored value.
    async fn set_preferences(
        &self,
        id: Uuid,
        preferences: &serde_json::Value,
        updated_by: Uuid,
    ) -> Result<Option<serde_json::Value>, AppError>;
}

// ============================================================================
// Postgres
// ============================================================================

const USER_SELECT: &str = r#"
    SELECT u.id, u.email, u.password_hash, u.first_name, u.last_name, u.role,
           u.unit_id, u.designation_id, un.name AS unit_name, d.title AS designation_title,
           u.is_active, u.force_password_change, u.metadata,
           u.created_at, u.updated_at, u.created_by, u.updated_by
    FROM users u
    LEFT JOIN units un ON u.unit_id = un.id
    LEFT JOIN designations d ON u.designation_id = d.id
"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    role: String,
    unit_id: Option<Uuid>,
    designation_id: Option<Uuid>,
    unit_name: Option<String>,
    designation_title: Option<String>,
    is_active: bool,
    force_password_change: bool,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| AppError::Internal(format!("Unknown role in users table: {}", row.role)))?;

        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            role,
            unit_id: row.unit_id,
            designation_id: row.designation_id,
            unit_name: row.unit_name,
            designation_title: row.designation_title,
            is_active: row.is_active,
            force_password_change: row.force_password_change,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            created_by: row.created_by,
            updated_by: row.updated_by,
        })
    }
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, condition: &str, bind: UserKey<'_>) -> Result<Option<User>, AppError> {
        let sql = format!("{} WHERE {}", USER_SELECT, condition);
        let query = sqlx::query_as::<_, UserRow>(&sql);
        let query = match bind {
            UserKey::Id(id) => query.bind(id),
            UserKey::Email(email) => query.bind(email),
        };

        query
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

enum UserKey<'a> {
    Id(Uuid),
    Email(&'a str),
}

fn push_user_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        qb.push(" AND (u.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(role) = filter.role {
        qb.push(" AND u.role = ").push_bind(role.as_str());
    }
    if let Some(unit_id) = filter.unit_id {
        qb.push(" AND u.unit_id = ").push_bind(unit_id);
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND u.is_active = ").push_bind(is_active);
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_active_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = self.fetch_one("u.email = $1", UserKey::Email(email)).await?;
        Ok(user.filter(|u| u.is_active))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.fetch_one("u.id = $1", UserKey::Id(id)).await
    }

    async fn list(&self, filter: &UserFilter) -> Result<Page<UserProfile>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users u");
        push_user_filters(&mut count, filter);
        let (total,) = count.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(USER_SELECT);
        push_user_filters(&mut qb, filter);
        qb.push(" ORDER BY u.created_at DESC LIMIT ")
            .push_bind(filter.page.limit)
            .push(" OFFSET ")
            .push_bind(filter.page.offset());

        let items = qb
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| User::try_from(row).map(|u| u.profile()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            pagination: Pagination::new(filter.page, total),
        })
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create(&self, user: NewUser) -> Result<User, AppError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                               unit_id, designation_id, force_password_change, metadata, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.unit_id)
        .bind(user.designation_id)
        .bind(user.force_password_change)
        .bind(&user.metadata)
        .bind(user.created_by)
        .fetch_one(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or_else(|| AppError::not_found("User"))
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &UserChanges,
        updated_by: Uuid,
    ) -> Result<Option<User>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(first_name) = &changes.first_name {
                set.push("first_name = ").push_bind_unseparated(first_name.clone());
            }
            if let Some(last_name) = &changes.last_name {
                set.push("last_name = ").push_bind_unseparated(last_name.clone());
            }
            if let Some(role) = changes.role {
                set.push("role = ").push_bind_unseparated(role.as_str());
            }
            if let Some(unit_id) = changes.unit_id {
                set.push("unit_id = ").push_bind_unseparated(unit_id);
            }
            if let Some(designation_id) = changes.designation_id {
                set.push("designation_id = ").push_bind_unseparated(designation_id);
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

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        force_password_change: bool,
        updated_by: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1, force_password_change = $2, updated_by = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(password_hash)
        .bind(force_password_change)
        .bind(updated_by)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE users SET is_active = false, updated_by = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(updated_by)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_in_unit(&self, unit_id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE unit_id = $1")
            .bind(unit_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_in_designation(&self, designation_id: Uuid) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE designation_id = $1")
                .bind(designation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn get_preferences(&self, id: Uuid) -> Result<Option<serde_json::Value>, AppError> {
        let preferences =
            sqlx::query_scalar::<_, serde_json::Value>("SELECT preferences FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(preferences)
    }

    async fn set_preferences(
        &self,
        id: Uuid,
        preferences: &serde_json::Value,
        updated_by: Uuid,
    ) -> Result<Option<serde_json::Value>, AppError> {
        let stored = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            UPDATE users
            SET preferences = $1, updated_by = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING preferences
            "#,
        )
        .bind(preferences)
        .bind(updated_by)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stored)
    }
}
