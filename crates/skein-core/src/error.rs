use skein_store::StoreError;
use thiserror::Error;

use skein_api::wire::WireError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("deserialization")]
    Deserialization,
    #[error("db read: {0}")]
    DbRead(StoreError),
    #[error("db write: {0}")]
    DbWrite(StoreError),
    #[error("already exists")]
    AlreadyExists,
    #[error("group info: {0}")]
    GroupInfo(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("stream event")]
    StreamEvent,
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => CoreError::AlreadyExists,
            StoreError::NotFound | StoreError::Codec => CoreError::DbRead(err),
            StoreError::Io => CoreError::DbWrite(err),
        }
    }
}

impl From<WireError> for CoreError {
    fn from(_: WireError) -> Self {
        CoreError::Deserialization
    }
}
