use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::StorageError;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Store connection settings, usually read from a TOML file:
///
/// ```toml
/// [connection]
/// path = "graph.db"
/// busy_timeout_ms = 5000
/// create_if_missing = true
/// ```
///
/// Without a `path` the store lives in memory.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub create_if_missing: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            connection: ConnectionConfig {
                path: Some(path.into()),
                ..ConnectionConfig::default()
            },
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, StorageError> {
        toml::from_str(text).map_err(|e| StorageError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
