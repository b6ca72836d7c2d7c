//! Canonical plaintext form of an archived session

use serde::{Deserialize, Serialize};

use crate::session::SessionRecord;

pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// What gets encrypted: the session record plus a schema version so future
/// readers can tell old archives apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivePayload {
    pub schema_version: u32,
    pub session: SessionRecord,
}

impl ArchivePayload {
    pub fn new(session: SessionRecord) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            session,
        }
    }

    /// Serialize to compact JSON. Struct fields serialize in declaration
    /// order and `serde_json::Value` maps are sorted, so equal payloads
    /// always produce equal bytes.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
