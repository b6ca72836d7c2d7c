//! sarc-archive: encrypted session archives with retention lifecycle
//!
//! Lifecycle of one archive:
//! ```text
//! creating ──(object written)──▶ stored ──(tier upgrade / extension)──▶ stored
//!                                  │
//!                                  └──(delete permitted)──▶ deleting ──▶ (row removed)
//! ```
//!
//! The metadata row is written before the ciphertext object so the
//! `session_id` uniqueness constraint arbitrates concurrent archive calls,
//! and a row in `deleting` is the durable record of an object that must go.

pub mod audit;
pub mod clock;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod model;
pub mod payload;
pub mod policy;
pub mod session;
pub mod sweep;

pub use audit::{AuditAction, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ArchiveError, ArchiveResult};
pub use manager::{ArchiveManager, DeleteOptions, ManagerSettings};
pub use metadata::{MemoryMetadataStore, MetadataError, MetadataStore, SqliteMetadataStore};
pub use model::{Archive, ArchiveStats, ArchiveStatus, ArchiveView, StatusCheck};
pub use payload::ArchivePayload;
pub use policy::RetentionPolicy;
pub use session::{
    DirSessionStore, MemorySessionStore, SessionNote, SessionRecord, SessionStatus, SessionStore,
};
pub use sweep::SweepReport;
