use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{shortens_retention, MetadataError, MetadataResult, MetadataStore};
use crate::model::Archive;

/// In-process metadata store. Same invariants as the SQLite store; rows are
/// lost on restart.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    rows: Mutex<HashMap<String, Archive>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, archive: &Archive) -> MetadataResult<()> {
        let mut rows = self.rows.lock();
        if rows.values().any(|a| a.session_id == archive.session_id) {
            return Err(MetadataError::DuplicateSession(archive.session_id.clone()));
        }
        if rows.contains_key(&archive.id) {
            return Err(MetadataError::Backend(format!(
                "duplicate archive id: {}",
                archive.id
            )));
        }
        rows.insert(archive.id.clone(), archive.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> MetadataResult<Option<Archive>> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn get_by_session(&self, session_id: &str) -> MetadataResult<Option<Archive>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|a| a.session_id == session_id)
            .cloned())
    }

    async fn update(&self, archive: &Archive, expected_version: u64) -> MetadataResult<Archive> {
        let mut rows = self.rows.lock();
        let stored = rows
            .get_mut(&archive.id)
            .ok_or_else(|| MetadataError::NotFound(archive.id.clone()))?;

        if stored.version != expected_version {
            return Err(MetadataError::VersionConflict {
                id: archive.id.clone(),
                expected: expected_version,
            });
        }
        if shortens_retention(
            stored.retention_tier,
            stored.expires_at,
            archive.retention_tier,
            archive.expires_at,
        ) {
            return Err(MetadataError::RetentionShortened(archive.id.clone()));
        }

        stored.retention_tier = archive.retention_tier;
        stored.status = archive.status;
        stored.expires_at = archive.expires_at;
        stored.updated_at = archive.updated_at;
        stored.version = expected_version + 1;
        Ok(stored.clone())
    }

    async fn delete(&self, id: &str) -> MetadataResult<bool> {
        Ok(self.rows.lock().remove(id).is_some())
    }

    async fn list(&self) -> MetadataResult<Vec<Archive>> {
        let mut rows: Vec<Archive> = self.rows.lock().values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}
