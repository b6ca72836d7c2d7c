//! Session store interface and the two implementations sarc ships with
//!
//! The relational session/notes store lives outside this service; sarc only
//! reads closed sessions through [`SessionStore`].

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionNote {
    pub id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A session with its notes, as handed over for archiving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Structured session fields, opaque to sarc
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub notes: Vec<SessionNote>,
}

impl SessionRecord {
    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` when the session does not exist.
    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>>;

    async fn is_closed(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self
            .get_session(id)
            .await?
            .is_some_and(|s| s.is_closed()))
    }
}

/// In-memory session store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SessionRecord) {
        self.sessions.write().insert(record.id.clone(), record);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.sessions.read().get(id).cloned())
    }
}

/// Reads `{dir}/{session_id}.json` exports produced by the session service.
#[derive(Debug, Clone)]
pub struct DirSessionStore {
    dir: PathBuf,
}

impl DirSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> anyhow::Result<PathBuf> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("invalid session id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl SessionStore for DirSessionStore {
    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let path = self.path_for(id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading session: {}", path.display()))
            }
        };
        let record: SessionRecord = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing session: {}", path.display()))?;
        if record.id != id {
            anyhow::bail!(
                "session file {} holds session {:?}",
                path.display(),
                record.id
            );
        }
        Ok(Some(record))
    }
}
