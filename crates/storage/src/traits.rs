use nodegraph_core::{ObjectId, Path, PropertyTree, Value, tree};

use crate::error::StorageError;

/// A stored document: a nested property tree with `_id` at the top level.
pub type Document = PropertyTree;

/// A store-native filter: field paths (dotted keys) mapped to literal values
/// or operator maps, plus top-level `$and`/`$or`/`$nor` clauses.
pub type Filter = PropertyTree;

/// Field under which every document carries its identity as text.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub field: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: true,
        }
    }

    pub fn non_unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
        }
    }
}

/// A document-oriented store made of named collections.
///
/// Reads against a collection that does not exist behave as reads against an
/// empty one.
pub trait DocumentStore {
    fn collection_names(&self) -> Result<Vec<String>, StorageError>;

    fn has_collection(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.collection_names()?.iter().any(|n| n == name))
    }

    /// Create the collection if missing and ensure every index exists.
    fn create_collection(&mut self, name: &str, indexes: &[IndexSpec]) -> Result<(), StorageError>;

    /// Drop the collection and its indexes. Returns false if it did not exist.
    fn drop_collection(&mut self, name: &str) -> Result<bool, StorageError>;

    /// Insert or replace the document stored under `id`.
    ///
    /// A unique index violation yields [`StorageError::DuplicateKey`] naming
    /// the offending fields and the values they collide on.
    fn save(&mut self, collection: &str, id: ObjectId, document: &Document) -> Result<(), StorageError>;

    /// Documents matching `filter`, in insertion order.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StorageError>;

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StorageError> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError> {
        Ok(self.find(collection, filter)?.len() as u64)
    }

    /// Returns false if no document was stored under `id`.
    fn remove(&mut self, collection: &str, id: ObjectId) -> Result<bool, StorageError>;

    /// Distinct values of `field` across the collection with their number of
    /// occurrences, in order of first appearance. Documents lacking the field
    /// are counted under `Null`.
    fn distinct(&self, collection: &str, field: &Path) -> Result<Vec<(Value, u64)>, StorageError> {
        let mut counts: Vec<(Value, u64)> = Vec::new();
        for document in self.find(collection, &Filter::new())? {
            let value = tree::get(&document, field).cloned().unwrap_or(Value::Null);
            match counts.iter_mut().find(|(seen, _)| *seen == value) {
                Some((_, n)) => *n += 1,
                None => counts.push((value, 1)),
            }
        }
        Ok(counts)
    }
}
