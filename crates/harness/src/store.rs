use std::cell::Cell;
use std::rc::Rc;

use nodegraph_core::{ObjectId, Path, Value};
use nodegraph_storage::{Document, DocumentStore, Filter, IndexSpec, StorageError};

/// Write counters shared between a [`CountingStore`] and the test holding
/// them.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    saves: Rc<Cell<u64>>,
    removes: Rc<Cell<u64>>,
}

impl StoreStats {
    pub fn saves(&self) -> u64 {
        self.saves.get()
    }

    pub fn removes(&self) -> u64 {
        self.removes.get()
    }
}

/// Pass-through store that counts the writes reaching the inner store.
pub struct CountingStore<S> {
    inner: S,
    stats: StoreStats,
}

impl<S: DocumentStore> CountingStore<S> {
    pub fn new(inner: S) -> (Self, StoreStats) {
        let stats = StoreStats::default();
        (
            Self {
                inner,
                stats: stats.clone(),
            },
            stats,
        )
    }
}

impl<S: DocumentStore> DocumentStore for CountingStore<S> {
    fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        self.inner.collection_names()
    }

    fn create_collection(&mut self, name: &str, indexes: &[IndexSpec]) -> Result<(), StorageError> {
        self.inner.create_collection(name, indexes)
    }

    fn drop_collection(&mut self, name: &str) -> Result<bool, StorageError> {
        self.inner.drop_collection(name)
    }

    fn save(&mut self, collection: &str, id: ObjectId, document: &Document) -> Result<(), StorageError> {
        self.stats.saves.set(self.stats.saves.get() + 1);
        self.inner.save(collection, id, document)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StorageError> {
        self.inner.find(collection, filter)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.inner.count(collection, filter)
    }

    fn remove(&mut self, collection: &str, id: ObjectId) -> Result<bool, StorageError> {
        self.stats.removes.set(self.stats.removes.get() + 1);
        self.inner.remove(collection, id)
    }

    fn distinct(&self, collection: &str, field: &Path) -> Result<Vec<(Value, u64)>, StorageError> {
        self.inner.distinct(collection, field)
    }
}
