use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
