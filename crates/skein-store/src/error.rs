use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("codec")]
    Codec,
    #[error("io")]
    Io,
}

pub type Result<T> = std::result::Result<T, StoreError>;
