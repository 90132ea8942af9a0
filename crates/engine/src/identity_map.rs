//! One in-memory instance per persistent identity.
//!
//! The map holds only weak references; object lifetime is decided by the
//! callers holding handles. While an instance is being built its slot holds
//! a `Pending` marker naming the type under construction.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use nodegraph_core::ObjectId;

#[derive(Debug)]
enum Slot<T> {
    Pending(String),
    Live(Weak<T>),
}

#[derive(Debug)]
pub struct IdentityMap<T> {
    slots: HashMap<ObjectId, Slot<T>>,
}

impl<T> Default for IdentityMap<T> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

/// Result of looking an identity up.
#[derive(Debug)]
pub enum Lookup<T> {
    Live(Rc<T>),
    /// An instance of this type is under construction.
    Pending(String),
    Vacant,
}

impl<T> IdentityMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `id`, forgetting it if its instance has been dropped.
    pub fn lookup(&mut self, id: ObjectId) -> Lookup<T> {
        match self.slots.get(&id) {
            Some(Slot::Live(weak)) => match weak.upgrade() {
                Some(instance) => Lookup::Live(instance),
                None => {
                    self.slots.remove(&id);
                    Lookup::Vacant
                }
            },
            Some(Slot::Pending(type_name)) => Lookup::Pending(type_name.clone()),
            None => Lookup::Vacant,
        }
    }

    /// True while `id` is reserved or resolves to a live instance.
    pub fn contains(&self, id: ObjectId) -> bool {
        match self.slots.get(&id) {
            Some(Slot::Live(weak)) => weak.strong_count() > 0,
            Some(Slot::Pending(_)) => true,
            None => false,
        }
    }

    pub fn reserve(&mut self, id: ObjectId, type_name: &str) {
        self.slots.insert(id, Slot::Pending(type_name.to_string()));
    }

    pub fn insert(&mut self, id: ObjectId, instance: &Rc<T>) {
        self.slots.insert(id, Slot::Live(Rc::downgrade(instance)));
    }

    pub fn evict(&mut self, id: ObjectId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Every instance still alive. Slots whose instances are gone are
    /// dropped along the way.
    pub fn live_instances(&mut self) -> Vec<Rc<T>> {
        let mut live = Vec::new();
        self.slots.retain(|_, slot| match slot {
            Slot::Live(weak) => match weak.upgrade() {
                Some(instance) => {
                    live.push(instance);
                    true
                }
                None => false,
            },
            Slot::Pending(_) => true,
        });
        live
    }

    /// Number of identities currently resolving to a live instance.
    pub fn live_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Live(weak) if weak.strong_count() > 0))
            .count()
    }
}
