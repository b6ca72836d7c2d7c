use chrono::{DateTime, Utc};
use sarc_storage::StorageError;
use thiserror::Error;

use crate::metadata::MetadataError;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Session not closed, unknown, or already archived
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Illegal retention transition
    #[error("retention policy violation: {0}")]
    PolicyViolation(String),

    #[error("archive {archive_id} is retention-locked (expires: {})", fmt_expiry(.expires_at))]
    RetentionLocked {
        archive_id: String,
        expires_at: Option<DateTime<Utc>>,
    },

    /// AEAD tag or checksum mismatch, unparseable envelope, or ciphertext
    /// missing. Never retried.
    #[error("integrity failure on archive {archive_id}: {reason}")]
    Integrity { archive_id: String, reason: String },

    #[error("master key not loaded")]
    KeyUnavailable,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    /// Optimistic concurrency retries exhausted
    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("session store error: {0}")]
    Session(String),

    #[error("audit error: {0}")]
    Audit(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn fmt_expiry(expires_at: &Option<DateTime<Utc>>) -> String {
    match expires_at {
        Some(t) => t.to_rfc3339(),
        None => "never".into(),
    }
}

impl ArchiveError {
    /// Errors the caller can fix by changing the request.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            ArchiveError::PreconditionFailed(_)
                | ArchiveError::PolicyViolation(_)
                | ArchiveError::RetentionLocked { .. }
                | ArchiveError::ArchiveNotFound(_)
        )
    }

    /// Short machine-readable kind, used in API responses and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ArchiveError::PreconditionFailed(_) => "precondition_failed",
            ArchiveError::PolicyViolation(_) => "policy_violation",
            ArchiveError::RetentionLocked { .. } => "retention_locked",
            ArchiveError::Integrity { .. } => "integrity_error",
            ArchiveError::KeyUnavailable => "key_unavailable",
            ArchiveError::KeyDerivation(_) => "key_derivation_error",
            ArchiveError::ArchiveNotFound(_) => "archive_not_found",
            ArchiveError::Conflict(_) => "conflict",
            ArchiveError::Storage(StorageError::NotFound { .. }) => "storage_not_found",
            ArchiveError::Storage(StorageError::AccessDenied { .. }) => "storage_access_denied",
            ArchiveError::Storage(_) => "storage_error",
            ArchiveError::Metadata(_) => "metadata_error",
            ArchiveError::Session(_) => "session_error",
            ArchiveError::Audit(_) => "audit_error",
            ArchiveError::Serialization(_) => "serialization_error",
            ArchiveError::Internal(_) => "internal_error",
        }
    }
}
