use thiserror::Error;

pub type SarcResult<T> = Result<T, SarcError>;

#[derive(Debug, Error)]
pub enum SarcError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid retention tier: {0}")]
    InvalidTier(String),

    #[error("invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
