//! Metadata store errors

use thiserror::Error;

/// Error type for metadata store operations
#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

impl From<MetaStoreError> for crystal_common::Error {
    fn from(e: MetaStoreError) -> Self {
        match e {
            MetaStoreError::Unavailable(msg) => Self::MetadataStore(msg),
            MetaStoreError::Redis(e) => Self::MetadataStore(e.to_string()),
        }
    }
}
