pub mod config;
pub mod error;
pub mod types;

pub use error::{SarcError, SarcResult};
pub use types::{RetentionTier, StorageLocation};
