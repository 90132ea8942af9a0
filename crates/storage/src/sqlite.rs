use std::time::Duration;

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use nodegraph_core::{ObjectId, Path, Value, tree};

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::query;
use crate::schema;
use crate::traits::{Document, DocumentStore, Filter, ID_FIELD, IndexSpec};

/// Document store on a single SQLite database. Each collection is a table
/// of JSON bodies keyed by object id; indexes are expression indexes over
/// `json_extract`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with_config(&StoreConfig::at_path(path))
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open_with_config(&StoreConfig::in_memory())
    }

    pub fn open_with_config(config: &StoreConfig) -> Result<Self, StorageError> {
        let settings = &config.connection;
        let conn = match &settings.path {
            None => Connection::open_in_memory()?,
            Some(path) if settings.create_if_missing => Connection::open(path)?,
            Some(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };
        conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
        schema::init_schema(&conn)?;
        debug!(path = ?settings.path, "opened document store");
        Ok(Self { conn })
    }

    /// Indexes registered for `collection`, ordered by field.
    pub fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT field, is_unique FROM collection_indexes WHERE collection = ?1 ORDER BY field",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok(IndexSpec {
                field: row.get(0)?,
                unique: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Unique fields of `body` whose value another document already holds.
    fn colliding_fields(
        &self,
        collection: &str,
        table: &str,
        id: ObjectId,
        body: &Document,
        json: &str,
    ) -> Result<Vec<(String, Value)>, StorageError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM \"{table}\"
             WHERE object_id != ?1 AND json_extract(body, ?2) = json_extract(?3, ?2))"
        );
        let mut fields = Vec::new();
        for index in self.indexes(collection)?.into_iter().filter(|i| i.unique) {
            let path = schema::json_path(&index.field)?;
            let taken: bool = self
                .conn
                .query_row(&sql, params![id.to_string(), path, json], |row| row.get(0))?;
            if taken {
                let value = tree::get(body, &Path::parse(&index.field)?)
                    .cloned()
                    .unwrap_or(Value::Null);
                fields.push((index.field, value));
            }
        }
        Ok(fields)
    }
}

fn decode(body: &str) -> Result<Document, StorageError> {
    match Value::from_json(body).map_err(|e| StorageError::Serialization(e.to_string()))? {
        Value::Map(document) => Ok(document),
        other => Err(StorageError::Serialization(format!(
            "stored document is a {}, not a map",
            other.type_name()
        ))),
    }
}

impl DocumentStore for SqliteStore {
    fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM collections ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn has_collection(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM collections WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?)
    }

    fn create_collection(&mut self, name: &str, indexes: &[IndexSpec]) -> Result<(), StorageError> {
        let table = schema::table_name(name)?;
        let tx = self.conn.transaction()?;
        tx.execute_batch(&schema::create_table_sql(&table))?;
        tx.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
            params![name],
        )?;
        for index in indexes {
            tx.execute_batch(&schema::create_index_sql(
                name,
                &table,
                &index.field,
                index.unique,
            )?)?;
            tx.execute(
                "INSERT OR REPLACE INTO collection_indexes (collection, field, is_unique) VALUES (?1, ?2, ?3)",
                params![name, index.field, index.unique],
            )?;
        }
        tx.commit()?;
        debug!(collection = name, indexes = indexes.len(), "collection ready");
        Ok(())
    }

    fn drop_collection(&mut self, name: &str) -> Result<bool, StorageError> {
        let table = schema::table_name(name)?;
        if !self.has_collection(name)? {
            return Ok(false);
        }
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
        tx.execute(
            "DELETE FROM collection_indexes WHERE collection = ?1",
            params![name],
        )?;
        tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
        tx.commit()?;
        debug!(collection = name, "collection dropped");
        Ok(true)
    }

    fn save(&mut self, collection: &str, id: ObjectId, document: &Document) -> Result<(), StorageError> {
        if !self.has_collection(collection)? {
            self.create_collection(collection, &[])?;
        }
        let table = schema::table_name(collection)?;
        let mut body = document.clone();
        body.insert(ID_FIELD.into(), Value::from(id));
        let json =
            serde_json::to_string(&body).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let result = self.conn.execute(
            &format!(
                "INSERT INTO \"{table}\" (object_id, body) VALUES (?1, ?2)
                 ON CONFLICT(object_id) DO UPDATE SET body = excluded.body"
            ),
            params![id.to_string(), json],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let fields = self.colliding_fields(collection, &table, id, &body, &json)?;
                Err(StorageError::DuplicateKey {
                    collection: collection.to_string(),
                    fields,
                })
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StorageError> {
        if !self.has_collection(collection)? {
            return Ok(Vec::new());
        }
        let table = schema::table_name(collection)?;
        let bodies: Vec<String> = match filter.get(ID_FIELD).and_then(Value::as_text) {
            Some(id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT body FROM \"{table}\" WHERE object_id = ?1 ORDER BY rowid"
                ))?;
                let rows = stmt.query_map(params![id], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT body FROM \"{table}\" ORDER BY rowid"))?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
        };

        let mut documents = Vec::new();
        for body in bodies {
            let document = decode(&body)?;
            if query::matches(&document, filter)? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn remove(&mut self, collection: &str, id: ObjectId) -> Result<bool, StorageError> {
        if !self.has_collection(collection)? {
            return Ok(false);
        }
        let table = schema::table_name(collection)?;
        let removed = self.conn.execute(
            &format!("DELETE FROM \"{table}\" WHERE object_id = ?1"),
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }
}
