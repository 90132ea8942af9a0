use std::collections::BTreeMap;
use std::rc::Rc;

use nodegraph_core::{Path, PropertyTree, Value};
use nodegraph_storage::IndexSpec;

use crate::error::EngineError;

/// Behavior of one concrete object type: the collection it is stored in,
/// its secondary indexes and its property validation hooks.
pub trait NodeSchema {
    /// Type name, also the name of the backing collection.
    fn type_name(&self) -> &str;

    /// Indexes provisioned when the collection is first written to.
    fn indices(&self) -> Vec<IndexSpec> {
        Vec::new()
    }

    /// Validate and normalize properties when an object is built, either by
    /// a caller or from a stored document.
    fn prepare(&self, _properties: &mut PropertyTree) -> Result<(), EngineError> {
        Ok(())
    }

    /// Vet a caller write before it is applied. Returns additional writes
    /// that must accompany it.
    fn prepare_set(&self, _path: &Path, _value: &Value) -> Result<Vec<(Path, Value)>, EngineError> {
        Ok(Vec::new())
    }

    fn check_delete(&self, _path: &Path) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A schema-less type with declared indexes and no validation.
#[derive(Debug, Clone)]
pub struct NodeType {
    name: String,
    indices: Vec<IndexSpec>,
}

impl NodeType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indices: Vec::new(),
        }
    }

    pub fn with_index(mut self, field: impl Into<String>, unique: bool) -> Self {
        self.indices.push(IndexSpec {
            field: field.into(),
            unique,
        });
        self
    }
}

impl NodeSchema for NodeType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn indices(&self) -> Vec<IndexSpec> {
        self.indices.clone()
    }
}

/// The set of types a gateway can instantiate. Collections whose name is
/// not registered are invisible to the engine.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    schemas: BTreeMap<String, Rc<dyn NodeSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any previous schema with the same name.
    pub fn register<S: NodeSchema + 'static>(&mut self, schema: S) -> &mut Self {
        self.schemas
            .insert(schema.type_name().to_string(), Rc::new(schema));
        self
    }

    pub fn get(&self, type_name: &str) -> Result<Rc<dyn NodeSchema>, EngineError> {
        self.schemas
            .get(type_name)
            .cloned()
            .ok_or_else(|| EngineError::InvalidOperation(format!("unknown object type '{type_name}'")))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
