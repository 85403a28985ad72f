use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed snapshot payload: {0}")]
    MalformedSnapshot(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
