//! Archive metadata store: the one piece of relational state sarc owns
//!
//! Every implementation must enforce, independently of the caller:
//! - `session_id` is unique (the arbiter for concurrent archive calls)
//! - updates carry the version they were based on (optimistic concurrency)
//! - `expires_at` never moves earlier and tiers never move down

mod memory;
mod sqlite;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sarc_core::RetentionTier;
use thiserror::Error;

use crate::model::Archive;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("session {0} already has an archive")]
    DuplicateSession(String),

    #[error("version conflict on archive {id}: expected version {expected}")]
    VersionConflict { id: String, expected: u64 },

    #[error("archive row not found: {0}")]
    NotFound(String),

    #[error("update would shorten retention of archive {0}")]
    RetentionShortened(String),

    #[error("metadata backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new row. Fails with `DuplicateSession` if the session
    /// already has one.
    async fn insert(&self, archive: &Archive) -> MetadataResult<()>;

    async fn get(&self, id: &str) -> MetadataResult<Option<Archive>>;

    async fn get_by_session(&self, session_id: &str) -> MetadataResult<Option<Archive>>;

    /// Write the mutable fields of `archive` (tier, status, expiry,
    /// updated_at) if the stored row is still at `expected_version`.
    /// Returns the row as stored, with its version bumped.
    async fn update(&self, archive: &Archive, expected_version: u64) -> MetadataResult<Archive>;

    /// Remove a row. Returns false if it was already gone.
    async fn delete(&self, id: &str) -> MetadataResult<bool>;

    async fn list(&self) -> MetadataResult<Vec<Archive>>;

    /// Rows with an expiry at or before `before`, soonest first.
    async fn list_expiring(&self, before: DateTime<Utc>) -> MetadataResult<Vec<Archive>> {
        let mut rows: Vec<Archive> = self
            .list()
            .await?
            .into_iter()
            .filter(|a| a.expires_at.is_some_and(|t| t <= before))
            .collect();
        rows.sort_by_key(|a| a.expires_at);
        Ok(rows)
    }
}

/// True if moving from `old` to `new` would shorten retention. `None` is
/// "never expires" and outranks every date.
pub(crate) fn shortens_retention(
    old_tier: RetentionTier,
    old_expiry: Option<DateTime<Utc>>,
    new_tier: RetentionTier,
    new_expiry: Option<DateTime<Utc>>,
) -> bool {
    if new_tier < old_tier {
        return true;
    }
    match (old_expiry, new_expiry) {
        (None, Some(_)) => true,
        (Some(old), Some(new)) => new < old,
        (_, None) => false,
    }
}
