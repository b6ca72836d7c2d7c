use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("access denied: {bucket}/{key}: {reason}")]
    AccessDenied {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Timeouts, connection resets, throttling. Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Any other permanent failure (quota, invalid request, ...).
    #[error("storage error: {0}")]
    Backend(String),

    #[error("bucket not configured: {0}")]
    UnknownBucket(String),
}

impl StorageError {
    /// Default retryable-error predicate used by [`crate::RetryPolicy`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Classify an OpenDAL error for `bucket/key`.
    pub fn from_opendal(err: opendal::Error, bucket: &str, key: &str) -> Self {
        use opendal::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            ErrorKind::PermissionDenied => StorageError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: err.to_string(),
            },
            ErrorKind::RateLimited => StorageError::Transient(err.to_string()),
            _ if err.is_temporary() => StorageError::Transient(err.to_string()),
            _ => StorageError::Backend(format!("{bucket}/{key}: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_opendal_errors() {
        let nf = opendal::Error::new(opendal::ErrorKind::NotFound, "gone");
        assert!(StorageError::from_opendal(nf, "b", "k").is_not_found());

        let denied = opendal::Error::new(opendal::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            StorageError::from_opendal(denied, "b", "k"),
            StorageError::AccessDenied { .. }
        ));

        let temp = opendal::Error::new(opendal::ErrorKind::Unexpected, "reset").set_temporary();
        assert!(StorageError::from_opendal(temp, "b", "k").is_retryable());

        let perm = opendal::Error::new(opendal::ErrorKind::Unexpected, "quota exceeded");
        assert!(!StorageError::from_opendal(perm, "b", "k").is_retryable());
    }
}
