//! Concrete object types built on [`PersistentObject`](crate::PersistentObject).

mod collection;
mod sequence;

pub use collection::{COLLECTION, Collection, CollectionSchema};
pub use sequence::{SEQUENCE, Sequence, SequenceSchema};

use nodegraph_core::{PropertyTree, Value};

use crate::error::EngineError;
use crate::schema::TypeRegistry;

/// Register `Sequence` and `Collection`.
pub fn register_domain_types(registry: &mut TypeRegistry) -> &mut TypeRegistry {
    registry.register(SequenceSchema).register(CollectionSchema)
}

pub(crate) fn require_property(properties: &PropertyTree, key: &str) -> Result<(), EngineError> {
    if properties.contains_key(key) {
        Ok(())
    } else {
        Err(EngineError::InvalidObject(format!("property '{key}' is missing")))
    }
}

pub(crate) fn text_property(value: Value, key: &str) -> Result<String, EngineError> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(EngineError::InvalidObject(format!(
            "property '{key}' is a {}, not text",
            other.type_name()
        ))),
    }
}
