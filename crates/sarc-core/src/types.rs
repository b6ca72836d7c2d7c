use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SarcError;

/// Retention tier of an archive.
///
/// Tiers form a lattice ordered by retention length: `Standard < Extended <
/// Permanent`. The derived `Ord` follows declaration order and is relied on
/// by the retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    Standard,
    Extended,
    Permanent,
}

impl RetentionTier {
    pub const ALL: [RetentionTier; 3] = [
        RetentionTier::Standard,
        RetentionTier::Extended,
        RetentionTier::Permanent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionTier::Standard => "standard",
            RetentionTier::Extended => "extended",
            RetentionTier::Permanent => "permanent",
        }
    }
}

impl fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionTier {
    type Err = SarcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(RetentionTier::Standard),
            "extended" => Ok(RetentionTier::Extended),
            "permanent" => Ok(RetentionTier::Permanent),
            other => Err(SarcError::InvalidTier(other.to_string())),
        }
    }
}

/// Where an archive's ciphertext lives: a bucket plus an object key.
///
/// Persisted as `bucket/key`, never as a URL, so the storage backend can be
/// swapped without rewriting metadata. Bucket names cannot contain `/`, so
/// the first separator splits the two halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

impl FromStr for StorageLocation {
    type Err = SarcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains("://") {
            return Err(SarcError::InvalidLocation(format!(
                "{s}: expected bucket/key, not a URL"
            )));
        }
        match s.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(StorageLocation::new(bucket, key))
            }
            _ => Err(SarcError::InvalidLocation(s.to_string())),
        }
    }
}

impl TryFrom<String> for StorageLocation {
    type Error = SarcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StorageLocation> for String {
    fn from(loc: StorageLocation) -> Self {
        loc.to_string()
    }
}
