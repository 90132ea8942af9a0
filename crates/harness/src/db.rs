use nodegraph_core::{PropertyTree, Value, tree};
use nodegraph_engine::{EngineError, Gateway, NodeType, PersistentObject, TypeRegistry, register_domain_types};
use nodegraph_storage::{SqliteStore, StorageError};

use crate::store::{CountingStore, StoreStats};

/// Generic test type with a unique `name`.
pub const NODE: &str = "Node";
/// Generic test type without indexes.
pub const TAG: &str = "Tag";

/// Property tree from `(dotted key, value)` pairs.
pub fn props<'a, V, I>(pairs: I) -> PropertyTree
where
    V: Into<Value>,
    I: IntoIterator<Item = (&'a str, V)>,
{
    tree::from_pairs(pairs)
}

/// Registry with the domain types plus [`NODE`] and [`TAG`].
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    register_domain_types(&mut registry)
        .register(NodeType::new(NODE).with_index("name", true))
        .register(NodeType::new(TAG));
    registry
}

/// A gateway over a fresh in-memory store with `Sequence`, `Collection`,
/// [`NODE`] and [`TAG`] registered.
pub struct TestDb {
    pub gateway: Gateway,
    pub stats: StoreStats,
}

impl TestDb {
    pub fn new() -> Result<Self, StorageError> {
        let (store, stats) = CountingStore::new(SqliteStore::open_in_memory()?);
        Ok(Self {
            gateway: Gateway::new(store, registry()),
            stats,
        })
    }

    /// Create a [`NODE`] with the given name.
    pub fn node(&self, name: &str) -> Result<PersistentObject, EngineError> {
        self.gateway.create(NODE, props([("name", name)]))
    }

    /// Create and commit a [`NODE`].
    pub fn committed_node(&self, name: &str) -> Result<PersistentObject, EngineError> {
        let node = self.node(name)?;
        node.commit()?;
        Ok(node)
    }

    pub fn find_node(&self, name: &str) -> Result<Option<PersistentObject>, EngineError> {
        self.gateway.find_one(NODE, &props([("name", name)]))
    }
}
