//! Best-effort audit trail of admin actions.
//!
//! A failed audit write is reported in the returned [`AuditOutcome`] and logged, but never
//! surfaces as an error to the admin action it accompanies.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::source::{decode_rows, TableSource};

pub const AUDIT_TABLE: &str = "admin_audit_logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    StatusChange,
    SettingsChange,
    Login,
    Logout,
    Export,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::StatusChange => "status_change",
            AuditAction::SettingsChange => "settings_change",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Export => "export",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The row written for one audit event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAuditLogEntry {
    pub admin_id: Uuid,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub metadata: Value,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What happened, to what, with optional before/after snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub metadata: Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, target_type: impl Into<String>) -> Self {
        Self {
            action,
            target_type: target_type.into(),
            target_id: None,
            old_data: None,
            new_data: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn target_id(mut self, id: impl ToString) -> Self {
        self.target_id = Some(id.to_string());
        self
    }

    pub fn old_data(mut self, data: Value) -> Self {
        self.old_data = Some(data);
        self
    }

    pub fn new_data(mut self, data: Value) -> Self {
        self.new_data = Some(data);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of a best-effort audit write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// The authenticated admin on whose behalf actions are logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub admin_id: Uuid,
    pub user_agent: Option<String>,
}

/// Resolves the current admin session
#[async_trait]
pub trait ActorProvider: Send + Sync {
    /// Returns `None` when nobody is signed in
    async fn current_actor(&self) -> StoreResult<Option<ActorContext>>;
}

/// An [`ActorProvider`] that always reports the same session
#[derive(Debug, Clone, Default)]
pub struct StaticActor(pub Option<ActorContext>);

impl StaticActor {
    pub fn new(admin_id: Uuid, user_agent: Option<String>) -> Self {
        Self(Some(ActorContext {
            admin_id,
            user_agent,
        }))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl ActorProvider for StaticActor {
    async fn current_actor(&self) -> StoreResult<Option<ActorContext>> {
        Ok(self.0.clone())
    }
}

/// Writes audit rows tagged with the current admin and user agent
#[derive(Clone)]
pub struct AuditLogger {
    source: Arc<dyn TableSource>,
    actor: Arc<dyn ActorProvider>,
}

impl AuditLogger {
    pub fn new(source: Arc<dyn TableSource>, actor: Arc<dyn ActorProvider>) -> Self {
        Self { source, actor }
    }

    /// Records one event. Never fails; problems are reported in the outcome.
    pub async fn log(&self, event: AuditEvent) -> AuditOutcome {
        match self.write(event).await {
            Ok(()) => AuditOutcome::ok(),
            Err(err) => {
                warn!("Audit log write failed: {}", err);
                AuditOutcome::failed(err.to_string())
            }
        }
    }

    pub async fn log_create(
        &self,
        target_type: &str,
        target_id: impl ToString,
        new_data: Value,
    ) -> AuditOutcome {
        self.log(
            AuditEvent::new(AuditAction::Create, target_type)
                .target_id(target_id)
                .new_data(new_data),
        )
        .await
    }

    pub async fn log_update(
        &self,
        target_type: &str,
        target_id: impl ToString,
        old_data: Value,
        new_data: Value,
    ) -> AuditOutcome {
        self.log(
            AuditEvent::new(AuditAction::Update, target_type)
                .target_id(target_id)
                .old_data(old_data)
                .new_data(new_data),
        )
        .await
    }

    pub async fn log_delete(
        &self,
        target_type: &str,
        target_id: impl ToString,
        old_data: Value,
    ) -> AuditOutcome {
        self.log(
            AuditEvent::new(AuditAction::Delete, target_type)
                .target_id(target_id)
                .old_data(old_data),
        )
        .await
    }

    /// Newest entries first
    pub async fn recent(&self, limit: u32) -> StoreResult<Vec<AuditLogEntry>> {
        let query = Query::table(AUDIT_TABLE)
            .order_by("created_at", false)
            .limit(limit);
        let rows = self.source.select(&query).await?;
        decode_rows(AUDIT_TABLE, rows)
    }

    async fn write(&self, event: AuditEvent) -> StoreResult<()> {
        let actor = self
            .actor
            .current_actor()
            .await?
            .ok_or(StoreError::Unauthenticated)?;

        let entry = NewAuditLogEntry {
            admin_id: actor.admin_id,
            action: event.action,
            target_type: event.target_type,
            target_id: event.target_id,
            old_data: event.old_data,
            new_data: event.new_data,
            metadata: event.metadata,
            user_agent: actor.user_agent,
            created_at: Utc::now(),
        };
        let row = serde_json::to_value(&entry).map_err(|e| StoreError::Decode {
            table: AUDIT_TABLE.to_string(),
            message: e.to_string(),
        })?;

        self.source.insert(AUDIT_TABLE, row).await?;
        debug!(
            "Audited {} on {} {:?} by {}",
            entry.action, entry.target_type, entry.target_id, entry.admin_id
        );
        Ok(())
    }
}
