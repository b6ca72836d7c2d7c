//! sarc-storage: stateless object store client for archive ciphertext
//!
//! All archive bytes go through [`ObjectStore`]. The production
//! implementation wraps OpenDAL operators (S3-compatible endpoints, or the
//! in-memory service in tests); every call runs under one shared
//! [`RetryPolicy`]. Nothing is cached locally.

pub mod client;
pub mod error;
pub mod health;
pub mod operator;
pub mod retry;

pub use client::{ObjectStore, OpendalStore};
pub use error::{StorageError, StorageResult};
pub use health::check_health;
pub use operator::{build_operator, OperatorConfig};
pub use retry::RetryPolicy;
