/// In-memory backend
///
/// Same contracts as the Postgres stores, kept in process. Used by the unit
/// tests and by the integration tests that spawn the server without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::RefreshTokenStore;
use crate::error::{AppError, ConflictError};
use crate::store::{
    contains_ci, Designation, DesignationChanges, DesignationFilter, DesignationStore,
    NewDesignation, NewUnit, NewUser, Page, Pagination, Stores, Unit, UnitChanges, UnitFilter,
    UnitStore, User, UserChanges, UserFilter, UserProfile, UserStore,
};

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn paginate<T>(mut items: Vec<T>, page: crate::store::PageRequest) -> Page<T> {
    let total = items.len() as i64;
    let start = (page.offset() as usize).min(items.len());
    let end = (start + page.limit as usize).min(items.len());
    let items = items.drain(start..end).collect();
    Page {
        items,
        pagination: Pagination::new(page, total),
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Shared<HashMap<Uuid, User>>,
    preferences: Shared<HashMap<Uuid, Value>>,
    units: Shared<HashMap<Uuid, Unit>>,
    designations: Shared<HashMap<Uuid, Designation>>,
}

impl MemoryUserStore {
    /// Attach the stored unit name and designation title, as the SQL join does.
    fn resolve(&self, mut user: User) -> User {
        user.unit_name = user
            .unit_id
            .and_then(|id| lock(&self.units).get(&id).map(|u| u.name.clone()));
        user.designation_title = user
            .designation_id
            .and_then(|id| lock(&self.designations).get(&id).map(|d| d.title.clone()));
        user
    }

    fn matches(user: &User, filter: &UserFilter) -> bool {
        let search_ok = filter.search.as_deref().map_or(true, |needle| {
            contains_ci(&user.email, needle)
                || contains_ci(&user.first_name, needle)
                || contains_ci(&user.last_name, needle)
        });
        search_ok
            && filter.role.map_or(true, |role| user.role == role)
            && filter.unit_id.map_or(true, |unit| user.unit_id == Some(unit))
            && filter.is_active.map_or(true, |active| user.is_active == active)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_active_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let found = lock(&self.users)
            .values()
            .find(|u| u.email == email && u.is_active)
            .cloned();
        Ok(found.map(|u| self.resolve(u)))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let found = lock(&self.users).get(&id).cloned();
        Ok(found.map(|u| self.resolve(u)))
    }

    async fn list(&self, filter: &UserFilter) -> Result<Page<UserProfile>, AppError> {
        let mut users: Vec<User> = lock(&self.users)
            .values()
            .filter(|u| Self::matches(u, filter))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let profiles = users
            .into_iter()
            .map(|u| self.resolve(u).profile())
            .collect();
        Ok(paginate(profiles, filter.page))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        Ok(lock(&self.users).values().any(|u| u.email == email))
    }

    async fn create(&self, new: NewUser) -> Result<User, AppError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            role: new.role,
            unit_id: new.unit_id,
            designation_id: new.designation_id,
            unit_name: None,
            designation_title: None,
            is_active: true,
            force_password_change: new.force_password_change,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            created_by: new.created_by,
            updated_by: None,
        };

        {
            let mut users = lock(&self.users);
            if users.values().any(|u| u.email == user.email) {
                return Err(ConflictError::Duplicate("Record already exists".to_string()).into());
            }
            users.insert(user.id, user.clone());
        }
        Ok(self.resolve(user))
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &UserChanges,
        updated_by: Uuid,
    ) -> Result<Option<User>, AppError> {
        let updated = {
            let mut users = lock(&self.users);
            let Some(user) = users.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(first_name) = &changes.first_name {
                user.first_name = first_name.clone();
            }
            if let Some(last_name) = &changes.last_name {
                user.last_name = last_name.clone();
            }
            if let Some(role) = changes.role {
                user.role = role;
            }
            if let Some(unit_id) = changes.unit_id {
                user.unit_id = unit_id;
            }
            if let Some(designation_id) = changes.designation_id {
                user.designation_id = designation_id;
            }
            if let Some(is_active) = changes.is_active {
                user.is_active = is_active;
            }
            if let Some(metadata) = &changes.metadata {
                user.metadata = metadata.clone();
            }
            user.updated_by = Some(updated_by);
            user.updated_at = Utc::now();
            user.clone()
        };
        Ok(Some(self.resolve(updated)))
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        force_password_change: bool,
        updated_by: Uuid,
    ) -> Result<bool, AppError> {
        let mut users = lock(&self.users);
        match users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.force_password_change = force_password_change;
                user.updated_by = Some(updated_by);
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError> {
        let mut users = lock(&self.users);
        match users.get_mut(&id) {
            Some(user) => {
                user.is_active = false;
                user.updated_by = Some(updated_by);
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_in_unit(&self, unit_id: Uuid) -> Result<i64, AppError> {
        Ok(lock(&self.users)
            .values()
            .filter(|u| u.unit_id == Some(unit_id))
            .count() as i64)
    }

    async fn count_in_designation(&self, designation_id: Uuid) -> Result<i64, AppError> {
        Ok(lock(&self.users)
            .values()
            .filter(|u| u.designation_id == Some(designation_id))
            .count() as i64)
    }

    async fn get_preferences(&self, id: Uuid) -> Result<Option<Value>, AppError> {
        if !lock(&self.users).contains_key(&id) {
            return Ok(None);
        }
        let stored = lock(&self.preferences).get(&id).cloned();
        Ok(Some(stored.unwrap_or_else(|| Value::Object(Default::default()))))
    }

    async fn set_preferences(
        &self,
        id: Uuid,
        preferences: &Value,
        updated_by: Uuid,
    ) -> Result<Option<Value>, AppError> {
        {
            let mut users = lock(&self.users);
            let Some(user) = users.get_mut(&id) else {
                return Ok(None);
            };
            user.updated_by = Some(updated_by);
            user.updated_at = Utc::now();
        }
        lock(&self.preferences).insert(id, preferences.clone());
        Ok(Some(preferences.clone()))
    }
}

// ============================================================================
// Refresh tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRow {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct MemoryRefreshTokenStore {
    rows: Shared<Vec<RefreshTokenRow>>,
}

impl MemoryRefreshTokenStore {
    /// Snapshot of every stored row.
    pub fn rows(&self) -> Vec<RefreshTokenRow> {
        lock(&self.rows).clone()
    }

    pub fn count_for_user(&self, user_id: Uuid) -> usize {
        lock(&self.rows).iter().filter(|r| r.user_id == user_id).count()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn store(
        &self,
        user_id: Uuid,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        lock(&self.rows).push(RefreshTokenRow {
            user_id,
            token_hash: token_digest.to_string(),
            expires_at,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn is_valid(&self, token_digest: &str, user_id: Uuid) -> Result<bool, AppError> {
        let now = Utc::now();
        Ok(lock(&self.rows)
            .iter()
            .any(|r| r.token_hash == token_digest && r.user_id == user_id && r.expires_at > now))
    }

    async fn revoke(&self, token_digest: &str) -> Result<u64, AppError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|r| r.token_hash != token_digest);
        Ok((before - rows.len()) as u64)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|r| r.user_id != user_id);
        Ok((before - rows.len()) as u64)
    }
}

// ============================================================================
// Units
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryUnitStore {
    units: Shared<HashMap<Uuid, Unit>>,
}

impl MemoryUnitStore {
    fn resolve(&self, mut unit: Unit, units: &HashMap<Uuid, Unit>) -> Unit {
        unit.parent_unit_name = unit
            .parent_unit_id
            .and_then(|id| units.get(&id).map(|p| p.name.clone()));
        unit
    }
}

#[async_trait]
impl UnitStore for MemoryUnitStore {
    async fn list(&self, filter: &UnitFilter) -> Result<Page<Unit>, AppError> {
        let units = lock(&self.units);
        let mut items: Vec<Unit> = units
            .values()
            .filter(|u| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |s| contains_ci(&u.name, s) || contains_ci(&u.code, s))
            })
            .filter(|u| filter.is_active.map_or(true, |a| u.is_active == a))
            .filter(|u| filter.parent_unit_id.map_or(true, |p| u.parent_unit_id == p))
            .map(|u| self.resolve(u.clone(), &units))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(items, filter.page))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Unit>, AppError> {
        let units = lock(&self.units);
        Ok(units.get(&id).map(|u| self.resolve(u.clone(), &units)))
    }

    async fn code_exists(&self, code: &str, exclude: Option<Uuid>) -> Result<bool, AppError> {
        Ok(lock(&self.units)
            .values()
            .any(|u| u.code == code && Some(u.id) != exclude))
    }

    async fn create(&self, new: NewUnit) -> Result<Unit, AppError> {
        let now = Utc::now();
        let unit = Unit {
            id: Uuid::new_v4(),
            name: new.name,
            code: new.code,
            description: new.description,
            parent_unit_id: new.parent_unit_id,
            parent_unit_name: None,
            is_active: true,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            created_by: Some(new.created_by),
            updated_by: None,
        };

        let mut units = lock(&self.units);
        if units.values().any(|u| u.code == unit.code) {
            return Err(ConflictError::Duplicate("Record already exists".to_string()).into());
        }
        units.insert(unit.id, unit.clone());
        Ok(self.resolve(unit, &units))
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &UnitChanges,
        updated_by: Uuid,
    ) -> Result<Option<Unit>, AppError> {
        let mut units = lock(&self.units);
        let updated = {
            let Some(unit) = units.get_mut(&id) else {
                return Ok(None);
            };
            if let Some(name) = &changes.name {
                unit.name = name.clone();
            }
            if let Some(code) = &changes.code {
                unit.code = code.clone();
            }
            if let Some(description) = &changes.description {
                unit.description = description.clone();
            }
            if let Some(parent) = changes.parent_unit_id {
                unit.parent_unit_id = parent;
            }
            if let Some(is_active) = changes.is_active {
                unit.is_active = is_active;
            }
            if let Some(metadata) = &changes.metadata {
                unit.metadata = metadata.clone();
            }
            unit.updated_by = Some(updated_by);
            unit.updated_at = Utc::now();
            unit.clone()
        };
        Ok(Some(self.resolve(updated, &units)))
    }

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError> {
        let mut units = lock(&self.units);
        match units.get_mut(&id) {
            Some(unit) => {
                unit.is_active = false;
                unit.updated_by = Some(updated_by);
                unit.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_children(&self, id: Uuid) -> Result<i64, AppError> {
        Ok(lock(&self.units)
            .values()
            .filter(|u| u.parent_unit_id == Some(id))
            .count() as i64)
    }
}

// ============================================================================
// Designations
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryDesignationStore {
    designations: Shared<HashMap<Uuid, Designation>>,
}

#[async_trait]
impl DesignationStore for MemoryDesignationStore {
    async fn list(&self, filter: &DesignationFilter) -> Result<Page<Designation>, AppError> {
        let mut items: Vec<Designation> = lock(&self.designations)
            .values()
            .filter(|d| {
                filter.search.as_deref().map_or(true, |s| {
                    contains_ci(&d.title, s)
                        || contains_ci(&d.code, s)
                        || d.description.as_deref().map_or(false, |desc| contains_ci(desc, s))
                })
            })
            .filter(|d| filter.level.map_or(true, |l| d.level == Some(l)))
            .filter(|d| filter.is_active.map_or(true, |a| d.is_active == a))
            .cloned()
            .collect();
        // Level ascending with unleveled last, then newest first.
        items.sort_by(|a, b| {
            let level = |d: &Designation| d.level.unwrap_or(i32::MAX);
            level(a)
                .cmp(&level(b))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(paginate(items, filter.page))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Designation>, AppError> {
        Ok(lock(&self.designations).get(&id).cloned())
    }

    async fn code_exists(&self, code: &str, exclude: Option<Uuid>) -> Result<bool, AppError> {
        Ok(lock(&self.designations)
            .values()
            .any(|d| d.code == code && Some(d.id) != exclude))
    }

    async fn create(&self, new: NewDesignation) -> Result<Designation, AppError> {
        let now = Utc::now();
        let designation = Designation {
            id: Uuid::new_v4(),
            title: new.title,
            code: new.code,
            description: new.description,
            level: new.level,
            is_active: true,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            created_by: Some(new.created_by),
            updated_by: None,
        };

        let mut designations = lock(&self.designations);
        if designations.values().any(|d| d.code == designation.code) {
            return Err(ConflictError::Duplicate("Record already exists".to_string()).into());
        }
        designations.insert(designation.id, designation.clone());
        Ok(designation)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: &DesignationChanges,
        updated_by: Uuid,
    ) -> Result<Option<Designation>, AppError> {
        let mut designations = lock(&self.designations);
        let Some(designation) = designations.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = &changes.title {
            designation.title = title.clone();
        }
        if let Some(code) = &changes.code {
            designation.code = code.clone();
        }
        if let Some(description) = &changes.description {
            designation.description = description.clone();
        }
        if let Some(level) = changes.level {
            designation.level = level;
        }
        if let Some(is_active) = changes.is_active {
            designation.is_active = is_active;
        }
        if let Some(metadata) = &changes.metadata {
            designation.metadata = metadata.clone();
        }
        designation.updated_by = Some(updated_by);
        designation.updated_at = Utc::now();
        Ok(Some(designation.clone()))
    }

    async fn deactivate(&self, id: Uuid, updated_by: Uuid) -> Result<bool, AppError> {
        let mut designations = lock(&self.designations);
        match designations.get_mut(&id) {
            Some(designation) => {
                designation.is_active = false;
                designation.updated_by = Some(updated_by);
                designation.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    entries: Shared<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AppError> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Every in-memory store, sharing state so users see unit and designation names.
#[derive(Clone)]
pub struct MemoryBackend {
    pub users: MemoryUserStore,
    pub refresh_tokens: MemoryRefreshTokenStore,
    pub units: MemoryUnitStore,
    pub designations: MemoryDesignationStore,
    pub audit: MemoryAuditSink,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let units = MemoryUnitStore::default();
        let designations = MemoryDesignationStore::default();
        let users = MemoryUserStore {
            users: Shared::default(),
            preferences: Shared::default(),
            units: units.units.clone(),
            designations: designations.designations.clone(),
        };

        Self {
            users,
            refresh_tokens: MemoryRefreshTokenStore::default(),
            units,
            designations,
            audit: MemoryAuditSink::default(),
        }
    }

    /// Trait-object view sharing this backend's state.
    pub fn stores(&self) -> Stores {
        Stores {
            users: Arc::new(self.users.clone()),
            refresh_tokens: Arc::new(self.refresh_tokens.clone()),
            units: Arc::new(self.units.clone()),
            designations: Arc::new(self.designations.clone()),
            audit: Arc::new(self.audit.clone()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::store::PageRequest;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            role,
            unit_id: None,
            designation_id: None,
            force_password_change: false,
            metadata: serde_json::json!({}),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_refresh_rows_validate_and_revoke() {
        let store = MemoryRefreshTokenStore::default();
        let user = Uuid::new_v4();
        let later = Utc::now() + chrono::Duration::days(7);

        store.store(user, "a", later).await.unwrap();
        store.store(user, "b", later).await.unwrap();
        store
            .store(user, "old", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert!(store.is_valid("a", user).await.unwrap());
        assert!(!store.is_valid("a", Uuid::new_v4()).await.unwrap());
        assert!(!store.is_valid("old", user).await.unwrap());

        assert_eq!(store.revoke("a").await.unwrap(), 1);
        assert_eq!(store.revoke("a").await.unwrap(), 0);
        assert!(!store.is_valid("a", user).await.unwrap());
        assert!(store.is_valid("b", user).await.unwrap());

        assert_eq!(store.revoke_all_for_user(user).await.unwrap(), 2);
        assert_eq!(store.count_for_user(user), 0);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_conflict() {
        let backend = MemoryBackend::new();
        backend.users.create(new_user("a@test.dev", Role::User)).await.unwrap();
        let err = backend
            .users
            .create(new_user("a@test.dev", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ConflictError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_preferences_default_to_empty_object() {
        let backend = MemoryBackend::new();
        let user = backend.users.create(new_user("a@test.dev", Role::User)).await.unwrap();

        let empty = backend.users.get_preferences(user.id).await.unwrap();
        assert_eq!(empty, Some(serde_json::json!({})));

        let theme = serde_json::json!({ "theme": "dark" });
        backend.users.set_preferences(user.id, &theme, user.id).await.unwrap();
        assert_eq!(backend.users.get_preferences(user.id).await.unwrap(), Some(theme));

        let unknown = Uuid::new_v4();
        assert!(backend.users.get_preferences(unknown).await.unwrap().is_none());
        assert!(backend
            .users
            .set_preferences(unknown, &serde_json::json!({}), unknown)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_inactive_user_is_not_found_by_email() {
        let backend = MemoryBackend::new();
        let user = backend.users.create(new_user("a@test.dev", Role::User)).await.unwrap();
        backend.users.deactivate(user.id, user.id).await.unwrap();

        assert!(backend.users.find_active_by_email("a@test.dev").await.unwrap().is_none());
        assert!(backend.users.find_by_id(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_user_sees_unit_name() {
        let backend = MemoryBackend::new();
        let unit = backend
            .units
            .create(NewUnit {
                name: "Finance".to_string(),
                code: "FIN".to_string(),
                description: None,
                parent_unit_id: None,
                metadata: serde_json::json!({}),
                created_by: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let mut new = new_user("a@test.dev", Role::User);
        new.unit_id = Some(unit.id);
        let user = backend.users.create(new).await.unwrap();

        assert_eq!(user.unit_name.as_deref(), Some("Finance"));
        assert_eq!(backend.users.count_in_unit(unit.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let backend = MemoryBackend::new();
        for i in 0..12 {
            let role = if i % 2 == 0 { Role::User } else { Role::Manager };
            backend
                .users
                .create(new_user(&format!("user{}@test.dev", i), role))
                .await
                .unwrap();
        }

        let filter = UserFilter {
            role: Some(Role::User),
            page: PageRequest::new(Some(2), Some(4)),
            ..Default::default()
        };
        let page = backend.users.list(&filter).await.unwrap();
        assert_eq!(page.pagination.total, 6);
        assert_eq!(page.pagination.total_pages, 2);
        assert_eq!(page.items.len(), 2);
    }
}
