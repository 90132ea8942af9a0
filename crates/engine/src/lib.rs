//! Object-graph persistence over a document store.
//!
//! A [`Gateway`] owns the store handle, the registry of object types and the
//! identity map guaranteeing one in-memory instance per stored identity.
//! [`PersistentObject`]s track their own dirty state and hold their outgoing
//! relationships; [`Sequence`] and [`Collection`] specialize them.

pub mod cursor;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod identity_map;
pub mod object;
pub mod relationships;
pub mod schema;

pub use cursor::Cursor;
pub use domain::{COLLECTION, Collection, CollectionSchema, SEQUENCE, Sequence, SequenceSchema, register_domain_types};
pub use error::EngineError;
pub use gateway::{FindMode, Gateway, QueryResult, RemovalReport, translate_filter};
pub use identity_map::{IdentityMap, Lookup};
pub use object::{CREATION_TIME_FIELD, ID_FIELD, MODIFICATION_TIME_FIELD, ObjectState, PersistentObject, RESERVED_PREFIX};
pub use relationships::{EdgeSet, RELATIONSHIPS_FIELD, RELATIONSHIP_WITH_FIELD};
pub use schema::{NodeSchema, NodeType, TypeRegistry};
