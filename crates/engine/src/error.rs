use nodegraph_core::{CoreError, Value};
use nodegraph_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("uncommitted object: {0}")]
    UncommittedObject(String),

    #[error("uncommitted target: {0}")]
    UncommittedTarget(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    /// A unique-index collision on commit, or an exact duplicate of an
    /// existing relationship. `properties` lists the colliding fields, empty
    /// for relationships.
    #[error("{message}")]
    DuplicateObject {
        object_type: String,
        properties: Vec<(String, Value)>,
        message: String,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation error: {0}")]
    Operation(String),
}

impl EngineError {
    pub(crate) fn duplicate_properties(object_type: &str, properties: Vec<(String, Value)>) -> Self {
        let listed = properties
            .iter()
            .map(|(key, value)| format!("{key} = '{value}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!(
            "an object of type '{object_type}' with propert{} {listed} already exists",
            if properties.len() > 1 { "ies" } else { "y" }
        );
        EngineError::DuplicateObject {
            object_type: object_type.to_string(),
            properties,
            message,
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedKey(msg) => EngineError::MalformedKey(msg),
            CoreError::NotFound(msg) => EngineError::NotFound(msg),
            CoreError::InvalidOperation(msg) | CoreError::InvalidArgument(msg) => {
                EngineError::InvalidOperation(msg)
            }
            CoreError::InvalidData(msg) => EngineError::InvalidObject(msg),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        if err.is_connection_failure() {
            return EngineError::Connection(err.to_string());
        }
        match err {
            StorageError::DuplicateKey { collection, fields } => {
                EngineError::duplicate_properties(&collection, fields)
            }
            StorageError::Core(core) => core.into(),
            other => EngineError::Operation(other.to_string()),
        }
    }
}
