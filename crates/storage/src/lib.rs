pub mod config;
pub mod error;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use config::{ConnectionConfig, StoreConfig};
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::*;
