use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::rc::Rc;

use nodegraph_storage::Document;

use crate::error::EngineError;
use crate::gateway::Gateway;
use crate::object::PersistentObject;
use crate::schema::NodeSchema;

/// Forward-only results of a query.
///
/// Documents are fetched up front; objects are instantiated (or taken from
/// the identity map) one at a time as the cursor advances. Once exhausted
/// the cursor stays exhausted; it never re-queries.
pub struct Cursor {
    gateway: Gateway,
    schema: Rc<dyn NodeSchema>,
    pending: VecDeque<Document>,
    exhausted: bool,
}

impl Cursor {
    pub(crate) fn new(gateway: Gateway, schema: Rc<dyn NodeSchema>, documents: Vec<Document>) -> Self {
        Self {
            gateway,
            schema,
            pending: documents.into(),
            exhausted: false,
        }
    }

    pub(crate) fn empty(gateway: Gateway, schema: Rc<dyn NodeSchema>) -> Self {
        Self::new(gateway, schema, Vec::new())
    }

    /// Append the remaining results of `other`.
    pub(crate) fn chain(mut self, mut other: Cursor) -> Cursor {
        if !self.exhausted {
            self.pending.append(&mut other.pending);
        }
        self
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl Iterator for Cursor {
    type Item = Result<PersistentObject, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.pending.pop_front() {
            Some(document) => Some(self.gateway.instantiate(&self.schema, document)),
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.pending.len(), Some(self.pending.len()))
    }
}

impl FusedIterator for Cursor {}
