//! Audit interface consumed by the archive manager

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

pub const ENTITY_TYPE: &str = "session_archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    #[serde(rename = "archive.create")]
    ArchiveCreate,
    #[serde(rename = "archive.download")]
    ArchiveDownload,
    #[serde(rename = "retention.tier_update")]
    TierUpdate,
    #[serde(rename = "retention.extend")]
    Extend,
    #[serde(rename = "archive.delete")]
    Delete,
    /// Recorded before an early delete is allowed to proceed
    #[serde(rename = "archive.delete_override")]
    DeleteOverride,
    #[serde(rename = "sweep.orphan_removed")]
    OrphanRemoved,
    #[serde(rename = "sweep.expired_purged")]
    ExpiredPurged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ArchiveCreate => "archive.create",
            AuditAction::ArchiveDownload => "archive.download",
            AuditAction::TierUpdate => "retention.tier_update",
            AuditAction::Extend => "retention.extend",
            AuditAction::Delete => "archive.delete",
            AuditAction::DeleteOverride => "archive.delete_override",
            AuditAction::OrphanRemoved => "sweep.orphan_removed",
            AuditAction::ExpiredPurged => "sweep.expired_purged",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_values: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_values: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        entity_id: impl Into<String>,
        actor_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            entity_type: ENTITY_TYPE,
            entity_id: entity_id.into(),
            actor_id: actor_id.into(),
            old_values: None,
            new_values: None,
            at,
        }
    }

    pub fn with_old(mut self, values: serde_json::Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_new(mut self, values: serde_json::Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Sink for audit events. The audit log itself lives outside sarc.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Emits audit events as structured log lines on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        let old = event.old_values.as_ref().map(|v| v.to_string());
        let new = event.new_values.as_ref().map(|v| v.to_string());
        tracing::info!(
            target: "audit",
            action = %event.action,
            entity_type = event.entity_type,
            entity_id = %event.entity_id,
            actor_id = %event.actor_id,
            old_values = old.as_deref(),
            new_values = new.as_deref(),
            at = %event.at.to_rfc3339(),
            "audit"
        );
        Ok(())
    }
}

/// Collects events in memory. Can be switched to fail every call.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failing: Mutex<bool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        if *self.failing.lock() {
            anyhow::bail!("audit sink unavailable");
        }
        self.events.lock().push(event);
        Ok(())
    }
}
