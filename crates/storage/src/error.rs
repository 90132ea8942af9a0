use nodegraph_core::Value;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid collection name: '{0}'")]
    InvalidCollectionName(String),

    #[error("duplicate key in collection '{collection}': {}", describe_fields(.fields))]
    DuplicateKey {
        collection: String,
        fields: Vec<(String, Value)>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("core error: {0}")]
    Core(#[from] nodegraph_core::CoreError),
}

fn describe_fields(fields: &[(String, Value)]) -> String {
    if fields.is_empty() {
        return "unknown field".into();
    }
    fields
        .iter()
        .map(|(field, value)| format!("{field} = '{value}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageError {
    /// True when the store could not be reached or opened at all, as opposed
    /// to an individual operation failing.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::PermissionDenied
                    | ErrorCode::AuthorizationForStatementDenied
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}
