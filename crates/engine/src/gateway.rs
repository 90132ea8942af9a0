use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use nodegraph_core::path::is_operator;
use nodegraph_core::time::physical_now;
use nodegraph_core::{IntoPath, ObjectId, PropertyTree, Value, tree};
use nodegraph_storage::query::canonical_operator;
use nodegraph_storage::{Document, DocumentStore, Filter, IndexSpec, SqliteStore, StoreConfig};

use crate::cursor::Cursor;
use crate::error::EngineError;
use crate::identity_map::{IdentityMap, Lookup};
use crate::object::{
    CREATION_TIME_FIELD, ID_FIELD, MODIFICATION_TIME_FIELD, ObjectCore, ObjectState, PersistentObject,
    RESERVED_PREFIX,
};
use crate::relationships::{EdgeSet, RELATIONSHIP_WITH_FIELD};
use crate::schema::{NodeSchema, TypeRegistry};

/// What a [`Gateway::query`] should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindMode {
    #[default]
    All,
    One,
    Count,
}

pub enum QueryResult {
    Objects(Cursor),
    One(Option<PersistentObject>),
    Count(u64),
}

/// Outcome of [`Gateway::remove_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: u64,
    pub skipped: u64,
    /// Whether the backing collection was dropped.
    pub dropped: bool,
}

struct GatewayInner {
    store: RefCell<Box<dyn DocumentStore>>,
    objects: RefCell<IdentityMap<RefCell<ObjectCore>>>,
    /// Objects without an identity, which the identity map cannot hold.
    unsaved: RefCell<Vec<Weak<RefCell<ObjectCore>>>>,
    registry: TypeRegistry,
}

/// Handle to a document store together with its identity map.
///
/// Cloning is cheap and every clone shares the same store and identity map.
/// Objects keep a clone so they can commit and query on their own.
#[derive(Clone)]
pub struct Gateway {
    inner: Rc<GatewayInner>,
}

/// Operators whose operand is a list of filters.
const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Translate a caller filter into store syntax: operator names are made
/// canonical (`$ELEMMATCH` becomes `$elemMatch`) and nested maps become
/// dotted keys, so `{"info": {"size": 3}}` matches on `info.size` rather
/// than on the whole `info` subdocument. Clauses of `$and`, `$or` and
/// `$nor` are translated the same way.
pub fn translate_filter(filter: &PropertyTree) -> Result<Filter, EngineError> {
    let expanded = tree::expand(filter)?;
    let canonical = tree::traverse(
        &expanded,
        &|key: &str| is_operator(key),
        &|key: &str| canonical_operator(key).map_or_else(|| key.to_string(), str::to_string),
        &mut |value: &Value| value.clone(),
    );
    let mut flat = tree::flatten(&canonical)?;
    for operator in LOGICAL_OPERATORS {
        if let Some(Value::List(clauses)) = flat.get_mut(operator) {
            for clause in clauses.iter_mut() {
                if let Value::Map(inner) = clause {
                    *inner = translate_filter(inner)?;
                }
            }
        }
    }
    Ok(flat)
}

impl Gateway {
    pub fn new<S: DocumentStore + 'static>(store: S, registry: TypeRegistry) -> Self {
        Self {
            inner: Rc::new(GatewayInner {
                store: RefCell::new(Box::new(store)),
                objects: RefCell::new(IdentityMap::new()),
                unsaved: RefCell::new(Vec::new()),
                registry,
            }),
        }
    }

    /// Open a SQLite-backed gateway as described by `config`.
    pub fn open(config: &StoreConfig, registry: TypeRegistry) -> Result<Self, EngineError> {
        Ok(Self::new(SqliteStore::open_with_config(config)?, registry))
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub fn schema(&self, type_name: &str) -> Result<Rc<dyn NodeSchema>, EngineError> {
        self.inner.registry.get(type_name)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Build a new, uncommitted object. Keys may be dotted or nested.
    pub fn create(&self, type_name: &str, properties: PropertyTree) -> Result<PersistentObject, EngineError> {
        let schema = self.schema(type_name)?;
        let mut properties = tree::expand(&properties)?;
        if let Some(key) = properties.keys().find(|k| k.starts_with(RESERVED_PREFIX)) {
            return Err(EngineError::InvalidOperation(format!(
                "property '{key}' is reserved and cannot be set"
            )));
        }
        schema.prepare(&mut properties)?;
        let object = PersistentObject::from_core(ObjectCore {
            gateway: self.clone(),
            schema,
            id: None,
            properties,
            edges: EdgeSet::new(),
            state: ObjectState::New,
        });
        self.track_unsaved(&object);
        Ok(object)
    }

    pub(crate) fn track_unsaved(&self, object: &PersistentObject) {
        self.inner.unsaved.borrow_mut().push(Rc::downgrade(&object.inner));
    }

    /// Every object of this gateway alive in memory, with or without an
    /// identity.
    pub(crate) fn resident_objects(&self) -> Vec<PersistentObject> {
        let mut resident: Vec<PersistentObject> = self
            .inner
            .objects
            .borrow_mut()
            .live_instances()
            .into_iter()
            .map(|inner| PersistentObject { inner })
            .collect();

        let mut unsaved = self.inner.unsaved.borrow_mut();
        unsaved.retain(|weak| {
            weak.upgrade()
                .is_some_and(|inner| inner.try_borrow().map_or(true, |core| core.id.is_none()))
        });
        for weak in unsaved.iter() {
            if let Some(inner) = weak.upgrade() {
                resident.push(PersistentObject { inner });
            }
        }
        resident
    }

    /// The unique instance for a stored document.
    pub(crate) fn instantiate(
        &self,
        schema: &Rc<dyn NodeSchema>,
        mut document: Document,
    ) -> Result<PersistentObject, EngineError> {
        let id = match document.remove(ID_FIELD) {
            Some(Value::Text(text)) => ObjectId::parse(&text)?,
            _ => {
                return Err(EngineError::Operation(format!(
                    "document in '{}' has no identifier",
                    schema.type_name()
                )));
            }
        };

        let found = self.inner.objects.borrow_mut().lookup(id);
        match found {
            Lookup::Live(core) => return Ok(PersistentObject { inner: core }),
            Lookup::Pending(type_name) => {
                return Err(EngineError::InvalidOperation(format!(
                    "object {id} of type '{type_name}' is still being constructed"
                )));
            }
            Lookup::Vacant => {}
        }

        self.inner.objects.borrow_mut().reserve(id, schema.type_name());
        match self.build(schema, id, document) {
            Ok(object) => {
                self.inner.objects.borrow_mut().insert(id, &object.inner);
                Ok(object)
            }
            Err(err) => {
                self.inner.objects.borrow_mut().evict(id);
                Err(err)
            }
        }
    }

    fn build(
        &self,
        schema: &Rc<dyn NodeSchema>,
        id: ObjectId,
        mut document: Document,
    ) -> Result<PersistentObject, EngineError> {
        let edges = EdgeSet::take_from(&mut document)?;
        let mut properties = document;
        properties.insert(ID_FIELD.to_string(), Value::from(id));
        schema.prepare(&mut properties)?;
        Ok(PersistentObject::from_core(ObjectCore {
            gateway: self.clone(),
            schema: Rc::clone(schema),
            id: Some(id),
            properties,
            edges,
            state: ObjectState::Committed,
        }))
    }

    /// Whether the identity map holds an entry for `id`.
    pub fn exists(&self, id: ObjectId) -> bool {
        self.inner.objects.borrow().contains(id)
    }

    /// Number of objects currently alive in the identity map.
    pub fn live_objects(&self) -> usize {
        self.inner.objects.borrow().live_count()
    }

    /// Reconstruct an object from the textual form of its identity.
    pub fn resolve(&self, type_name: &str, identifier: &str) -> Result<PersistentObject, EngineError> {
        let id = ObjectId::parse(identifier)?;
        let schema = self.schema(type_name)?;

        let found = self.inner.objects.borrow_mut().lookup(id);
        if let Lookup::Live(core) = found {
            let object = PersistentObject { inner: core };
            if object.type_name() == schema.type_name() {
                return Ok(object);
            }
            return Err(EngineError::NotFound(format!(
                "{id} is a {}, not a {type_name}",
                object.type_name()
            )));
        }

        self.find_one(type_name, &tree::from_pairs([(ID_FIELD, id.to_string())]))?
            .ok_or_else(|| EngineError::NotFound(format!("no {type_name} with identifier {id}")))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn find(&self, type_name: &str, filter: &PropertyTree) -> Result<Cursor, EngineError> {
        let schema = self.schema(type_name)?;
        let query = translate_filter(filter)?;
        let shown = Value::Map(query.clone());
        debug!(collection = type_name, query = %shown, "querying");
        let documents = self.inner.store.borrow().find(type_name, &query)?;
        Ok(Cursor::new(self.clone(), schema, documents))
    }

    pub fn find_one(&self, type_name: &str, filter: &PropertyTree) -> Result<Option<PersistentObject>, EngineError> {
        let schema = self.schema(type_name)?;
        let query = translate_filter(filter)?;
        let shown = Value::Map(query.clone());
        debug!(collection = type_name, query = %shown, "querying one");
        let document = self.inner.store.borrow().find_one(type_name, &query)?;
        document.map(|d| self.instantiate(&schema, d)).transpose()
    }

    /// Number of objects matching `filter`; all of them when it is empty.
    pub fn count(&self, type_name: &str, filter: &PropertyTree) -> Result<u64, EngineError> {
        self.schema(type_name)?;
        let query = translate_filter(filter)?;
        Ok(self.inner.store.borrow().count(type_name, &query)?)
    }

    pub fn query(&self, type_name: &str, filter: &PropertyTree, mode: FindMode) -> Result<QueryResult, EngineError> {
        Ok(match mode {
            FindMode::All => QueryResult::Objects(self.find(type_name, filter)?),
            FindMode::One => QueryResult::One(self.find_one(type_name, filter)?),
            FindMode::Count => QueryResult::Count(self.count(type_name, filter)?),
        })
    }

    pub(crate) fn empty_cursor(&self, type_name: &str) -> Result<Cursor, EngineError> {
        Ok(Cursor::empty(self.clone(), self.schema(type_name)?))
    }

    /// For each value stored at `field`, how many objects hold it.
    pub fn distinct<P: IntoPath>(&self, type_name: &str, field: P) -> Result<Vec<(Value, u64)>, EngineError> {
        self.schema(type_name)?;
        let field = field.into_path()?;
        Ok(self.inner.store.borrow().distinct(type_name, &field)?)
    }

    /// Registered types that have a backing collection.
    pub fn list_types(&self) -> Result<Vec<String>, EngineError> {
        let names = self.inner.store.borrow().collection_names()?;
        Ok(names
            .into_iter()
            .filter(|name| self.inner.registry.contains(name))
            .collect())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn ensure_collection(&self, schema: &dyn NodeSchema) -> Result<(), EngineError> {
        let name = schema.type_name();
        let mut store = self.inner.store.borrow_mut();
        if store.has_collection(name)? {
            return Ok(());
        }
        let mut indices = schema.indices();
        indices.push(IndexSpec::non_unique(RELATIONSHIP_WITH_FIELD));
        store.create_collection(name, &indices)?;
        let fields: Vec<&str> = indices.iter().map(|i| i.field.as_str()).collect();
        debug!(collection = name, indices = ?fields, "collection created");
        Ok(())
    }

    /// Upsert `object` unless it is already committed. The first commit
    /// assigns its identity and registers it in the identity map.
    ///
    /// Commits overwrite the stored document as a whole; changes made to it
    /// by another writer since this object was loaded are lost.
    pub fn commit(&self, object: &PersistentObject) -> Result<(), EngineError> {
        let mut core = object.core_mut();
        if core.state == ObjectState::Committed {
            return Ok(());
        }
        let schema = Rc::clone(&core.schema);
        let type_name = schema.type_name();
        self.ensure_collection(schema.as_ref())?;

        let now = Value::Integer(physical_now()?);
        let (id, stamp, verb) = match core.id {
            Some(id) => (id, MODIFICATION_TIME_FIELD, "updated"),
            None => (ObjectId::new(), CREATION_TIME_FIELD, "created"),
        };
        let mut document = core.to_document(id);
        document.insert(stamp.to_string(), now.clone());
        self.inner.store.borrow_mut().save(type_name, id, &document)?;

        core.properties.insert(stamp.to_string(), now);
        core.properties.insert(ID_FIELD.to_string(), Value::from(id));
        core.id = Some(id);
        core.state = ObjectState::Committed;
        let label = core.describe();
        drop(core);

        self.inner.objects.borrow_mut().insert(id, &object.inner);
        debug!(object = %label, collection = type_name, "object {verb}");
        Ok(())
    }

    /// Delete the stored document of `object` and forget its identity.
    /// Relationships are not touched; see [`PersistentObject::remove`].
    pub fn remove_object(&self, object: &PersistentObject) -> Result<(), EngineError> {
        let (id, type_name, label) = {
            let core = object.core();
            let Some(id) = core.id else {
                return Err(EngineError::UncommittedObject(format!(
                    "cannot remove {}: it has never been committed",
                    core.describe()
                )));
            };
            (id, core.schema.type_name().to_string(), core.describe())
        };
        self.inner.store.borrow_mut().remove(&type_name, id)?;
        self.inner.objects.borrow_mut().evict(id);
        debug!(object = %label, collection = %type_name, "object deleted");
        Ok(())
    }

    pub fn drop_collection(&self, type_name: &str) -> Result<bool, EngineError> {
        let dropped = self.inner.store.borrow_mut().drop_collection(type_name)?;
        if dropped {
            debug!(collection = type_name, "collection dropped");
        }
        Ok(dropped)
    }

    /// Remove every object of a type, then drop its collection. If any
    /// object fails to be removed the collection is left in place.
    pub fn remove_all(&self, type_name: &str) -> Result<RemovalReport, EngineError> {
        let total = self.count(type_name, &PropertyTree::new())?;
        let objects = self.find(type_name, &PropertyTree::new())?;

        let mut removed = 0;
        for object in objects {
            match object.and_then(|o| o.remove()) {
                Ok(()) => removed += 1,
                Err(err) => debug!(collection = type_name, error = %err, "object not removed"),
            }
        }

        if removed < total {
            let skipped = total - removed;
            warn!(collection = type_name, skipped, total, "{skipped} out of {total} objects were not removed");
            return Ok(RemovalReport {
                removed,
                skipped,
                dropped: false,
            });
        }
        let dropped = self.drop_collection(type_name)?;
        Ok(RemovalReport {
            removed,
            skipped: 0,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(text: &str) -> PropertyTree {
        match Value::from_json(text).unwrap() {
            Value::Map(map) => map,
            other => panic!("not a map: {other:?}"),
        }
    }

    #[test]
    fn translate_flattens_nested_fields() {
        let filter = json(r#"{"info": {"size": 3}, "name": "a"}"#);
        assert_eq!(translate_filter(&filter).unwrap(), json(r#"{"info.size": 3, "name": "a"}"#));
    }

    #[test]
    fn translate_canonicalizes_operator_names() {
        let filter = json(r#"{"size": {"$GTE": 3, "$Lt": 9}, "tags": {"$ELEMMATCH": {"w": {"$IN": [1]}}}}"#);
        assert_eq!(
            translate_filter(&filter).unwrap(),
            json(r#"{"size": {"$gte": 3, "$lt": 9}, "tags": {"$elemMatch": {"w": {"$in": [1]}}}}"#)
        );
    }

    #[test]
    fn translate_reaches_into_logical_clauses() {
        let filter = json(r#"{"$OR": [{"info": {"size": 3}}, {"name": {"$IN": ["a"]}}]}"#);
        assert_eq!(
            translate_filter(&filter).unwrap(),
            json(r#"{"$or": [{"info.size": 3}, {"name": {"$in": ["a"]}}]}"#)
        );
    }

    #[test]
    fn translate_accepts_dotted_keys() {
        let filter = json(r#"{"a.b": {"$exists": true}}"#);
        assert_eq!(translate_filter(&filter).unwrap(), filter);
    }

    #[test]
    fn translate_rejects_misplaced_operators() {
        let filter = json(r#"{"$gt.a": 1}"#);
        assert!(matches!(translate_filter(&filter), Err(EngineError::MalformedKey(_))));
    }

    #[test]
    fn empty_filter_stays_empty() {
        assert!(translate_filter(&PropertyTree::new()).unwrap().is_empty());
    }
}
