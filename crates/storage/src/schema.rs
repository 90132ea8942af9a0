use rusqlite::Connection;

use crate::error::StorageError;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);

CREATE TABLE IF NOT EXISTS collection_indexes (
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    field TEXT NOT NULL,
    is_unique INTEGER NOT NULL,
    PRIMARY KEY (collection, field)
);
";

/// Collection names double as SQL identifiers, so they are restricted to
/// ASCII letters, digits and underscores, not starting with a digit.
pub fn validate_collection_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidCollectionName(name.to_string()))
    }
}

pub fn table_name(collection: &str) -> Result<String, StorageError> {
    validate_collection_name(collection)?;
    Ok(format!("docs_{collection}"))
}

pub fn index_name(collection: &str, field: &str) -> String {
    let slug: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("idx_{collection}_{slug}")
}

pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            rowid INTEGER PRIMARY KEY,
            object_id TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL
        )"
    )
}

/// JSON path for a dotted field, each segment quoted. Index fields are
/// inlined into DDL, so only a conservative character set is accepted.
pub fn json_path(field: &str) -> Result<String, StorageError> {
    let mut path = String::from("$");
    for segment in field.split('.') {
        let ok = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !ok {
            return Err(StorageError::InvalidQuery(format!(
                "field '{field}' cannot be indexed"
            )));
        }
        path.push_str(&format!(".\"{segment}\""));
    }
    Ok(path)
}

pub fn create_index_sql(
    collection: &str,
    table: &str,
    field: &str,
    unique: bool,
) -> Result<String, StorageError> {
    Ok(format!(
        "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{table}\" (json_extract(body, '{}'))",
        if unique { "UNIQUE " } else { "" },
        index_name(collection, field),
        json_path(field)?,
    ))
}
