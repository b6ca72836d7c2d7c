//! Archive record and the views derived from it

use chrono::{DateTime, Utc};
use sarc_core::{RetentionTier, StorageLocation};
use sarc_crypto::{ArchiveSalt, KdfParams};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an archive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Row reserved, ciphertext write in flight
    Creating,
    /// Ciphertext written and addressable
    Stored,
    /// Deletion permitted and started; object may still exist
    Deleting,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStatus::Creating => "creating",
            ArchiveStatus::Stored => "stored",
            ArchiveStatus::Deleting => "deleting",
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ArchiveStatus::Creating),
            "stored" => Ok(ArchiveStatus::Stored),
            "deleting" => Ok(ArchiveStatus::Deleting),
            other => Err(format!("unknown archive status: {other}")),
        }
    }
}

/// One archived session.
///
/// `session_id`, `salt`, `kdf` and `storage_location` never change after
/// insert. `expires_at` is `None` exactly when the tier is `Permanent` and
/// never moves earlier.
#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub id: String,
    pub session_id: String,
    pub salt: ArchiveSalt,
    pub kdf: KdfParams,
    pub retention_tier: RetentionTier,
    pub status: ArchiveStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub storage_location: StorageLocation,
    pub plaintext_checksum: String,
    /// Size of the stored envelope in bytes
    pub size_bytes: u64,
    pub archived_by: String,
    /// Optimistic concurrency counter, bumped on every update
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Archive {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }

    pub fn view(&self) -> ArchiveView {
        ArchiveView {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            retention_tier: self.retention_tier,
            status: self.status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            storage_location: self.storage_location.to_string(),
            plaintext_checksum: self.plaintext_checksum.clone(),
            size_bytes: self.size_bytes,
            archived_by: self.archived_by.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Archive metadata as exposed to API callers (no salt or KDF params).
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveView {
    pub id: String,
    pub session_id: String,
    pub retention_tier: RetentionTier,
    pub status: ArchiveStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub storage_location: String,
    pub plaintext_checksum: String,
    pub size_bytes: u64,
    pub archived_by: String,
    pub updated_at: DateTime<Utc>,
}

/// Answer to "is this session archived?"
#[derive(Debug, Clone, Serialize)]
pub struct StatusCheck {
    pub session_id: String,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveView>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub total: u64,
    pub standard: u64,
    pub extended: u64,
    pub permanent: u64,
    pub total_size_bytes: u64,
    /// Standard/extended archives expiring within the next 30 days
    pub expiring_soon: u64,
    /// Standard/extended archives already past expiry
    pub expired: u64,
    /// Rows not in `stored` (in-flight creates, pending deletes)
    pub pending: u64,
}
