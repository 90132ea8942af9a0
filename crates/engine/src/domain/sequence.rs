use std::collections::HashSet;
use std::ops::Deref;

use nodegraph_core::{Direction, ObjectId, Path, PropertyTree, Value, tree};
use nodegraph_storage::IndexSpec;

use super::collection::{COLLECTION, Collection};
use super::{require_property, text_property};
use crate::error::EngineError;
use crate::gateway::Gateway;
use crate::object::{ID_FIELD, PersistentObject};
use crate::schema::NodeSchema;

pub const SEQUENCE: &str = "Sequence";

const LENGTH: &str = "length";
const PROTECTED: [&str; 3] = ["name", "sequence", LENGTH];

/// A named sequence with a derived `length`. Names are only unique within a
/// collection.
pub struct SequenceSchema;

fn sequence_length(value: &Value) -> Result<Value, EngineError> {
    match value {
        Value::Text(text) => Ok(Value::from(text.chars().count())),
        Value::List(items) => Ok(Value::from(items.len())),
        other => Err(EngineError::InvalidObject(format!(
            "property 'sequence' must be text, not {}",
            other.type_name()
        ))),
    }
}

impl NodeSchema for SequenceSchema {
    fn type_name(&self) -> &str {
        SEQUENCE
    }

    fn indices(&self) -> Vec<IndexSpec> {
        vec![
            IndexSpec::non_unique("name"),
            IndexSpec::non_unique(LENGTH),
            IndexSpec::non_unique("class"),
        ]
    }

    fn prepare(&self, properties: &mut PropertyTree) -> Result<(), EngineError> {
        require_property(properties, "name")?;
        require_property(properties, "sequence")?;
        let length = match properties.get("sequence") {
            Some(value) => sequence_length(value)?,
            None => Value::Null,
        };
        properties.insert(LENGTH.to_string(), length);
        Ok(())
    }

    fn prepare_set(&self, path: &Path, value: &Value) -> Result<Vec<(Path, Value)>, EngineError> {
        match path.first() {
            LENGTH => Err(EngineError::InvalidOperation(
                "property 'length' is tied to 'sequence' and cannot be changed directly".into(),
            )),
            "sequence" if path.is_leaf() => Ok(vec![(Path::parse(LENGTH)?, sequence_length(value)?)]),
            "sequence" => Err(EngineError::InvalidOperation(format!(
                "property '{path}' cannot be set: 'sequence' holds text"
            ))),
            _ => Ok(Vec::new()),
        }
    }

    fn check_delete(&self, path: &Path) -> Result<(), EngineError> {
        if PROTECTED.contains(&path.first()) {
            return Err(EngineError::InvalidOperation(format!(
                "property '{}' cannot be deleted",
                path.first()
            )));
        }
        Ok(())
    }
}

/// A `Sequence` object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence(PersistentObject);

impl Sequence {
    pub fn create(gateway: &Gateway, properties: PropertyTree) -> Result<Self, EngineError> {
        Ok(Self(gateway.create(SEQUENCE, properties)?))
    }

    pub fn from_object(object: PersistentObject) -> Result<Self, EngineError> {
        if object.type_name() != SEQUENCE {
            return Err(EngineError::InvalidOperation(format!("{object} is not a Sequence")));
        }
        Ok(Self(object))
    }

    pub fn object(&self) -> &PersistentObject {
        &self.0
    }

    pub fn into_object(self) -> PersistentObject {
        self.0
    }

    pub fn name(&self) -> Result<String, EngineError> {
        text_property(self.require("name")?, "name")
    }

    pub fn length(&self) -> Result<i64, EngineError> {
        self.require(LENGTH)?
            .as_integer()
            .ok_or_else(|| EngineError::InvalidObject("property 'length' is not an integer".into()))
    }

    /// Fails with `DuplicateObject` when `collection` already holds a
    /// sequence of the same name.
    pub fn add_to_collection(&self, collection: &Collection, relationship: PropertyTree) -> Result<(), EngineError> {
        let name = self.name()?;
        let same_name = tree::from_pairs([("name", name.as_str())]);
        if collection.count_sequences(Some(&same_name), None)? > 0 {
            let message = format!(
                "a sequence with name '{name}' already exists in collection '{}'",
                collection.name()?
            );
            return Err(EngineError::DuplicateObject {
                object_type: SEQUENCE.to_string(),
                properties: vec![("name".to_string(), Value::from(name))],
                message,
            });
        }
        self.connect_to(collection, relationship)
    }

    pub fn remove_from_collection(
        &self,
        collection: &Collection,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<(), EngineError> {
        self.disconnect_from(collection, relationship_filter)
    }

    pub fn list_collections(
        &self,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<impl Iterator<Item = Result<Collection, EngineError>> + use<>, EngineError> {
        Ok(self
            .out_neighbors(COLLECTION, collection_filter, relationship_filter)?
            .map(|object| object.and_then(Collection::from_object)))
    }

    pub fn count_collections(
        &self,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        self.count_out_neighbors(COLLECTION, collection_filter, relationship_filter)
    }

    /// Collections at the top of the hierarchies this sequence belongs to:
    /// its own collections and their super-collections, followed upward
    /// until a collection belongs to none.
    pub fn list_top_collections(&self, collection_filter: Option<&PropertyTree>) -> Result<Vec<Collection>, EngineError> {
        let mut pending = self.list_collections(None, None)?.collect::<Result<Vec<_>, _>>()?;
        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut top = Vec::new();
        while let Some(collection) = pending.pop() {
            if let Some(id) = collection.id() {
                if !visited.insert(id) {
                    continue;
                }
            }
            let supers = collection.list_super_collections(None, None)?.collect::<Result<Vec<_>, _>>()?;
            if supers.is_empty() {
                top.push(collection);
            } else {
                pending.extend(supers);
            }
        }

        let Some(filter) = collection_filter else {
            return Ok(top);
        };
        let ids: Vec<Value> = top.iter().map(|collection| Value::from(collection.id())).collect();
        let roots = tree::from_pairs([(ID_FIELD, Value::Map(tree::from_pairs([("$in", Value::List(ids))])))]);
        let query = tree::from_pairs([(
            "$and",
            Value::List(vec![Value::Map(roots), Value::Map(tree::expand(filter)?)]),
        )]);
        self.gateway()
            .find(COLLECTION, &query)?
            .map(|object| object.and_then(Collection::from_object))
            .collect()
    }

    pub fn relate_to_sequence(&self, sequence: &Sequence, relationship: PropertyTree) -> Result<(), EngineError> {
        self.connect_to(sequence, relationship)
    }

    pub fn dissociate_from_sequence(
        &self,
        sequence: &Sequence,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<(), EngineError> {
        self.disconnect_from(sequence, relationship_filter)
    }

    pub fn list_related_sequences(
        &self,
        direction: Direction,
        sequence_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<impl Iterator<Item = Result<Sequence, EngineError>> + use<>, EngineError> {
        Ok(self
            .neighbors(direction, SEQUENCE, sequence_filter, relationship_filter)?
            .map(|object| object.and_then(Sequence::from_object)))
    }

    pub fn count_related_sequences(
        &self,
        direction: Direction,
        sequence_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        self.count_neighbors(direction, SEQUENCE, sequence_filter, relationship_filter)
    }
}

impl Deref for Sequence {
    type Target = PersistentObject;

    fn deref(&self) -> &PersistentObject {
        &self.0
    }
}
