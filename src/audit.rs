/// Audit Trail
///
/// Append-only record of every state-changing operation. Writes go through
/// `AuditLog::record`, which never fails the caller: a sink error is logged
/// and swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::request_info::RequestInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    Logout,
    ChangePassword,
    ResetPassword,
    Create,
    Update,
    Delete,
    UpdatePreferences,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::ChangePassword => "CHANGE_PASSWORD",
            AuditAction::ResetPassword => "RESET_PASSWORD",
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::UpdatePreferences => "UPDATE_PREFERENCES",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Unit,
    Designation,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Unit => "unit",
            EntityType::Designation => "designation",
        }
    }
}

/// One audit row. `user_id` is the actor, `entity_id` the subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Option<Uuid>,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_type: EntityType) -> Self {
        Self {
            user_id: None,
            action,
            entity_type,
            entity_id: None,
            changes: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Snapshot of the entity before the change.
    pub fn before<T: Serialize>(self, old: &T) -> Self {
        self.with_change("old", serde_json::to_value(old).unwrap_or(Value::Null))
    }

    /// Snapshot of the entity after the change.
    pub fn after<T: Serialize>(self, new: &T) -> Self {
        self.with_change("new", serde_json::to_value(new).unwrap_or(Value::Null))
    }

    fn with_change(mut self, key: &str, value: Value) -> Self {
        match self.changes.as_mut() {
            Some(Value::Object(map)) => {
                map.insert(key.to_string(), value);
            }
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value);
                self.changes = Some(Value::Object(map));
            }
        }
        self
    }

    pub fn request(mut self, info: &RequestInfo) -> Self {
        self.ip_address = Some(info.ip_address.clone());
        self.user_agent = Some(info.user_agent.clone());
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AppError>;
}

pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, user_id, action, entity_type, entity_id, changes,
                                    ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(&entry.changes)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Log-and-continue front for an `AuditSink`
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            tracing::error!(
                action = %entry.action,
                entity_type = entry.entity_type.as_str(),
                entity_id = ?entry.entity_id,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _entry: &AuditEntry) -> Result<(), AppError> {
            Err(AppError::Internal("audit table unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_record_swallows_sink_errors() {
        let log = AuditLog::new(Arc::new(FailingSink));
        log.record(AuditEntry::new(AuditAction::Login, EntityType::User))
            .await;
    }

    #[test]
    fn test_snapshot_keeps_old_and_new() {
        let entry = AuditEntry::new(AuditAction::Update, EntityType::Unit)
            .before(&json!({"name": "A"}))
            .after(&json!({"name": "B"}));
        let changes = entry.changes.unwrap();
        assert_eq!(changes["old"]["name"], "A");
        assert_eq!(changes["new"]["name"], "B");
    }

    #[test]
    fn test_action_names() {
        assert_eq!(AuditAction::ChangePassword.as_str(), "CHANGE_PASSWORD");
        assert_eq!(
            serde_json::to_value(AuditAction::ResetPassword).unwrap(),
            "RESET_PASSWORD"
        );
        assert_eq!(EntityType::Designation.as_str(), "designation");
    }
}
