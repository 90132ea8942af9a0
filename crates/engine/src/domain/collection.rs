use std::ops::Deref;

use nodegraph_core::{Direction, Path, PropertyTree};
use nodegraph_storage::IndexSpec;

use super::sequence::{SEQUENCE, Sequence};
use super::{require_property, text_property};
use crate::error::EngineError;
use crate::gateway::Gateway;
use crate::object::PersistentObject;
use crate::schema::NodeSchema;

pub const COLLECTION: &str = "Collection";

/// Named group of sequences. Names are unique across the store.
pub struct CollectionSchema;

impl NodeSchema for CollectionSchema {
    fn type_name(&self) -> &str {
        COLLECTION
    }

    fn indices(&self) -> Vec<IndexSpec> {
        vec![IndexSpec::unique("name"), IndexSpec::non_unique("class")]
    }

    fn prepare(&self, properties: &mut PropertyTree) -> Result<(), EngineError> {
        require_property(properties, "name")
    }

    fn check_delete(&self, path: &Path) -> Result<(), EngineError> {
        if path.first() == "name" {
            return Err(EngineError::InvalidOperation("property 'name' cannot be deleted".into()));
        }
        Ok(())
    }
}

/// A `Collection` object. Collections hold sequences and may themselves be
/// part of other (super) collections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collection(PersistentObject);

impl Collection {
    pub fn create(gateway: &Gateway, properties: PropertyTree) -> Result<Self, EngineError> {
        Ok(Self(gateway.create(COLLECTION, properties)?))
    }

    pub fn from_object(object: PersistentObject) -> Result<Self, EngineError> {
        if object.type_name() != COLLECTION {
            return Err(EngineError::InvalidOperation(format!("{object} is not a Collection")));
        }
        Ok(Self(object))
    }

    pub fn find_by_name(gateway: &Gateway, name: &str) -> Result<Option<Self>, EngineError> {
        let filter = nodegraph_core::tree::from_pairs([("name", name)]);
        gateway.find_one(COLLECTION, &filter)?.map(Self::from_object).transpose()
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

    pub fn list_sequences(
        &self,
        sequence_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<impl Iterator<Item = Result<Sequence, EngineError>> + use<>, EngineError> {
        Ok(self
            .in_neighbors(SEQUENCE, sequence_filter, relationship_filter)?
            .map(|object| object.and_then(Sequence::from_object)))
    }

    pub fn count_sequences(
        &self,
        sequence_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        self.count_in_neighbors(SEQUENCE, sequence_filter, relationship_filter)
    }

    /// Make this collection part of `collection`.
    pub fn add_to_collection(&self, collection: &Collection, relationship: PropertyTree) -> Result<(), EngineError> {
        self.connect_to(collection, relationship)
    }

    pub fn remove_from_collection(
        &self,
        collection: &Collection,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<(), EngineError> {
        self.disconnect_from(collection, relationship_filter)
    }

    pub fn list_super_collections(
        &self,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<impl Iterator<Item = Result<Collection, EngineError>> + use<>, EngineError> {
        self.list_related_collections(Direction::Outgoing, collection_filter, relationship_filter)
    }

    pub fn count_super_collections(
        &self,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        self.count_related_collections(Direction::Outgoing, collection_filter, relationship_filter)
    }

    pub fn list_sub_collections(
        &self,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<impl Iterator<Item = Result<Collection, EngineError>> + use<>, EngineError> {
        self.list_related_collections(Direction::Ingoing, collection_filter, relationship_filter)
    }

    pub fn count_sub_collections(
        &self,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        self.count_related_collections(Direction::Ingoing, collection_filter, relationship_filter)
    }

    /// Sub-collections (ingoing), super-collections (outgoing) or both.
    pub fn list_related_collections(
        &self,
        direction: Direction,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<impl Iterator<Item = Result<Collection, EngineError>> + use<>, EngineError> {
        Ok(self
            .neighbors(direction, COLLECTION, collection_filter, relationship_filter)?
            .map(|object| object.and_then(Collection::from_object)))
    }

    pub fn count_related_collections(
        &self,
        direction: Direction,
        collection_filter: Option<&PropertyTree>,
        relationship_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        self.count_neighbors(direction, COLLECTION, collection_filter, relationship_filter)
    }
}

impl Deref for Collection {
    type Target = PersistentObject;

    fn deref(&self) -> &PersistentObject {
        &self.0
    }
}
