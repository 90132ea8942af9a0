use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use nodegraph_core::{IntoPath, ObjectId, PropertyTree, Value, tree};
use nodegraph_storage::Document;

use crate::error::EngineError;
use crate::gateway::Gateway;
use crate::relationships::EdgeSet;
use crate::schema::NodeSchema;

pub use nodegraph_storage::ID_FIELD;

/// Top-level properties starting with this prefix are owned by the engine.
pub const RESERVED_PREFIX: char = '_';
pub const CREATION_TIME_FIELD: &str = "_creation_time";
pub const MODIFICATION_TIME_FIELD: &str = "_modification_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// No identity; never committed.
    New,
    Committed,
    /// Has an identity, modified since the last commit.
    Dirty,
    /// Identity released by `remove`.
    Removed,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Committed => "committed",
            Self::Dirty => "dirty",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct ObjectCore {
    pub(crate) gateway: Gateway,
    pub(crate) schema: Rc<dyn NodeSchema>,
    pub(crate) id: Option<ObjectId>,
    pub(crate) properties: PropertyTree,
    pub(crate) edges: EdgeSet,
    pub(crate) state: ObjectState,
}

impl ObjectCore {
    pub(crate) fn mark_modified(&mut self) {
        self.state = if self.id.is_some() {
            ObjectState::Dirty
        } else {
            ObjectState::New
        };
    }

    /// The stored form: properties plus identity and relationship fields.
    pub(crate) fn to_document(&self, id: ObjectId) -> Document {
        let mut document = self.properties.clone();
        document.insert(ID_FIELD.to_string(), Value::from(id));
        self.edges.write_fields(&mut document);
        document
    }

    pub(crate) fn describe(&self) -> String {
        match self.id {
            Some(id) => format!("{}({id})", self.schema.type_name()),
            None => format!("{}(new)", self.schema.type_name()),
        }
    }
}

impl Drop for ObjectCore {
    fn drop(&mut self) {
        if matches!(self.state, ObjectState::New | ObjectState::Dirty) {
            warn!(object = %self.describe(), state = %self.state, "object discarded with uncommitted changes");
        }
    }
}

/// Shared handle to an in-memory object. Clones refer to the same object;
/// equality is identity of the instance.
#[derive(Clone)]
pub struct PersistentObject {
    pub(crate) inner: Rc<RefCell<ObjectCore>>,
}

fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

impl PersistentObject {
    pub(crate) fn from_core(core: ObjectCore) -> Self {
        Self {
            inner: Rc::new(RefCell::new(core)),
        }
    }

    pub(crate) fn core(&self) -> Ref<'_, ObjectCore> {
        self.inner.borrow()
    }

    pub(crate) fn core_mut(&self) -> RefMut<'_, ObjectCore> {
        self.inner.borrow_mut()
    }

    pub fn gateway(&self) -> Gateway {
        self.core().gateway.clone()
    }

    pub fn type_name(&self) -> String {
        self.core().schema.type_name().to_string()
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.core().id
    }

    pub fn state(&self) -> ObjectState {
        self.core().state
    }

    /// True when the stored document reflects every in-memory change.
    pub fn is_committed(&self) -> bool {
        self.state() == ObjectState::Committed
    }

    /// Deep copy of all properties, system fields included.
    pub fn properties(&self) -> PropertyTree {
        self.core().properties.clone()
    }

    pub fn get<P: IntoPath>(&self, key: P) -> Result<Option<Value>, EngineError> {
        let path = key.into_path()?;
        Ok(tree::get(&self.core().properties, &path).ok().cloned())
    }

    pub fn get_or<P: IntoPath, V: Into<Value>>(&self, key: P, default: V) -> Result<Value, EngineError> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// Like [`get`](Self::get), but a missing property is `NotFound`.
    pub fn require<P: IntoPath>(&self, key: P) -> Result<Value, EngineError> {
        let path = key.into_path()?;
        Ok(tree::get(&self.core().properties, &path)?.clone())
    }

    pub fn contains<P: IntoPath>(&self, key: P) -> Result<bool, EngineError> {
        let path = key.into_path()?;
        Ok(tree::contains(&self.core().properties, &path))
    }

    /// Set a property. Writing the value already present is a no-op and
    /// leaves the state untouched.
    pub fn set<P: IntoPath, V: Into<Value>>(&self, key: P, value: V) -> Result<(), EngineError> {
        let path = key.into_path()?;
        let value = value.into();
        if is_reserved(path.first()) {
            return Err(EngineError::InvalidOperation(format!(
                "property '{path}' is reserved and cannot be modified"
            )));
        }
        let schema = Rc::clone(&self.core().schema);
        let derived = schema.prepare_set(&path, &value)?;

        let mut core = self.core_mut();
        if tree::get(&core.properties, &path).is_ok_and(|current| *current == value) {
            return Ok(());
        }
        tree::set(&mut core.properties, &path, value)?;
        for (derived_path, derived_value) in derived {
            tree::set(&mut core.properties, &derived_path, derived_value)?;
        }
        core.mark_modified();
        Ok(())
    }

    /// Remove a property, returning its value. Always marks the object
    /// modified.
    pub fn delete<P: IntoPath>(&self, key: P) -> Result<Value, EngineError> {
        let path = key.into_path()?;
        if is_reserved(path.first()) {
            return Err(EngineError::InvalidOperation(format!(
                "property '{path}' is reserved and cannot be deleted"
            )));
        }
        let schema = Rc::clone(&self.core().schema);
        schema.check_delete(&path)?;

        let mut core = self.core_mut();
        let removed = tree::delete(&mut core.properties, &path)?;
        core.mark_modified();
        Ok(removed)
    }

    pub fn commit(&self) -> Result<(), EngineError> {
        self.gateway().commit(self)
    }

    /// Delete this object from the store after severing every relationship
    /// to and from it. The object stays usable in memory without an
    /// identity; committing it again stores it under a new one.
    ///
    /// In-neighbors that were committed before the call are committed again
    /// so the stored graph holds no edge to the removed identity. Objects in
    /// memory holding uncommitted relationships to it are detached too.
    pub fn remove(&self) -> Result<(), EngineError> {
        let gateway = self.gateway();
        if let Some(id) = self.id() {
            let key = id.to_string();
            for source in gateway.resident_objects() {
                if source.ptr_eq(self) || !source.core().edges.contains(&key) {
                    continue;
                }
                let was_committed = source.is_committed();
                source.disconnect_from(self, None)?;
                if was_committed {
                    source.commit()?;
                }
            }
        }

        for type_name in gateway.list_types()? {
            if self.id().is_some() {
                let sources = self
                    .in_neighbors(&type_name, None, None)?
                    .collect::<Result<Vec<_>, _>>()?;
                for source in sources {
                    if !source.has_relationships_with(self) {
                        continue;
                    }
                    let was_committed = source.is_committed();
                    source.disconnect_from(self, None)?;
                    if was_committed {
                        source.commit()?;
                    }
                }
            }

            let targets = self
                .out_neighbors(&type_name, None, None)?
                .collect::<Result<Vec<_>, _>>()?;
            for target in targets {
                if self.has_relationships_with(&target) {
                    self.disconnect_from(&target, None)?;
                }
            }
        }

        {
            let mut core = self.core_mut();
            if core.edges.clear() {
                core.mark_modified();
            }
        }

        if self.id().is_some() {
            gateway.remove_object(self)?;
            let mut core = self.core_mut();
            core.id = None;
            core.properties.remove(ID_FIELD);
            core.properties.remove(CREATION_TIME_FIELD);
            core.properties.remove(MODIFICATION_TIME_FIELD);
            core.state = ObjectState::Removed;
            drop(core);
            gateway.track_unsaved(self);
        }
        debug!(object = %self, "object removed");
        Ok(())
    }

    pub fn ptr_eq(&self, other: &PersistentObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for PersistentObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for PersistentObject {}

impl fmt::Display for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(core) => write!(f, "<{} {}>", core.describe(), core.state),
            Err(_) => f.write_str("<object in use>"),
        }
    }
}

impl fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PersistentObject{self}")
    }
}
