use thiserror::Error;
use tinylink_core::StorageError;

pub type Result<T, E = ShortenerError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShortenerError {
    #[error("short url not found: {0}")]
    NotFound(String),
    #[error("short url has been deleted: {0}")]
    Gone(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("owner id is required")]
    MissingOwner,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(code) => Self::NotFound(code),
            StorageError::Gone(code) => Self::Gone(code),
            other => Self::Storage(other),
        }
    }
}
