//! Directed, annotated relationships embedded in the source document.
//!
//! A source stores the identities of its targets in `_relationship_with`
//! and, under `_relationships.<target>`, one annotation map per parallel
//! relationship to that target. Incoming relationships are found by
//! querying other documents for this object's identity.

use std::collections::BTreeMap;

use tracing::debug;

use nodegraph_core::{Direction, PropertyTree, Value, tree};
use nodegraph_storage::Document;

use crate::cursor::Cursor;
use crate::error::EngineError;
use crate::object::{ID_FIELD, PersistentObject};

pub const RELATIONSHIP_WITH_FIELD: &str = "_relationship_with";
pub const RELATIONSHIPS_FIELD: &str = "_relationships";

/// Outgoing relationships of one object. Every target listed has at least
/// one annotation entry and vice versa.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSet {
    targets: Vec<String>,
    annotations: BTreeMap<String, Vec<PropertyTree>>,
}

impl EdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.annotations.contains_key(target)
    }

    pub fn annotations(&self, target: &str) -> &[PropertyTree] {
        self.annotations.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add a relationship. Returns false, leaving the set unchanged, when an
    /// identical annotation already exists for `target`.
    pub fn add(&mut self, target: &str, annotation: PropertyTree) -> bool {
        match self.annotations.get_mut(target) {
            Some(entries) if entries.contains(&annotation) => false,
            Some(entries) => {
                entries.push(annotation);
                true
            }
            None => {
                self.targets.push(target.to_string());
                self.annotations.insert(target.to_string(), vec![annotation]);
                true
            }
        }
    }

    pub fn remove_target(&mut self, target: &str) -> bool {
        self.targets.retain(|t| t != target);
        self.annotations.remove(target).is_some()
    }

    /// Remove the entries at `positions` for `target`, highest first. The
    /// target itself goes once its last entry does.
    pub fn remove_entries(&mut self, target: &str, positions: &[usize]) -> usize {
        let mut positions = positions.to_vec();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        let Some(entries) = self.annotations.get_mut(target) else {
            return 0;
        };
        let mut removed = 0;
        for position in positions {
            if position < entries.len() {
                entries.remove(position);
                removed += 1;
            }
        }
        if entries.is_empty() {
            self.remove_target(target);
        }
        removed
    }

    /// Drop everything; returns whether anything was held.
    pub fn clear(&mut self) -> bool {
        let had_any = !self.targets.is_empty();
        self.targets.clear();
        self.annotations.clear();
        had_any
    }

    pub(crate) fn write_fields(&self, document: &mut Document) {
        document.insert(
            RELATIONSHIP_WITH_FIELD.to_string(),
            Value::List(self.targets.iter().map(Value::from).collect()),
        );
        document.insert(
            RELATIONSHIPS_FIELD.to_string(),
            Value::Map(
                self.annotations
                    .iter()
                    .map(|(target, entries)| {
                        let entries = entries.iter().cloned().map(Value::Map).collect();
                        (target.clone(), Value::List(entries))
                    })
                    .collect(),
            ),
        );
    }

    /// Move the relationship fields out of a stored document.
    pub(crate) fn take_from(document: &mut Document) -> Result<Self, EngineError> {
        let malformed = |what: &str| EngineError::InvalidObject(format!("malformed relationship data: {what}"));

        let targets = match document.remove(RELATIONSHIP_WITH_FIELD) {
            None => Vec::new(),
            Some(Value::List(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Text(target) => Ok(target),
                    other => Err(malformed(&format!("target is a {}", other.type_name()))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(malformed(&format!("target list is a {}", other.type_name()))),
        };

        let annotations = match document.remove(RELATIONSHIPS_FIELD) {
            None => BTreeMap::new(),
            Some(Value::Map(map)) => map
                .into_iter()
                .map(|(target, entries)| {
                    let Value::List(entries) = entries else {
                        return Err(malformed(&format!("entries for '{target}' are not a list")));
                    };
                    let entries = entries
                        .into_iter()
                        .map(|entry| match entry {
                            Value::Map(annotation) => Ok(annotation),
                            other => Err(malformed(&format!("annotation is a {}", other.type_name()))),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok((target, entries))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?,
            Some(other) => return Err(malformed(&format!("annotations are a {}", other.type_name()))),
        };

        let consistent = targets.len() == annotations.len()
            && targets.iter().all(|t| annotations.get(t).is_some_and(|e| !e.is_empty()));
        if !consistent {
            return Err(malformed("targets and annotations disagree"));
        }
        Ok(Self {
            targets,
            annotations,
        })
    }
}

/// `{"$elemMatch": <flattened filter>}`
fn elem_match(edge_filter: &PropertyTree) -> Result<Value, EngineError> {
    let flat = tree::flatten(&tree::expand(edge_filter)?)?;
    Ok(Value::Map(tree::from_pairs([("$elemMatch", Value::Map(flat))])))
}

/// Narrow a neighbor query by a caller filter. Both must hold, so the
/// caller cannot override the conditions selecting the neighbors.
fn merge_filter(query: PropertyTree, neighbor_filter: Option<&PropertyTree>) -> Result<PropertyTree, EngineError> {
    match neighbor_filter {
        Some(filter) if !filter.is_empty() => {
            let clauses = vec![Value::Map(query), Value::Map(tree::expand(filter)?)];
            Ok(tree::from_pairs([("$and", Value::List(clauses))]))
        }
        _ => Ok(query),
    }
}

impl PersistentObject {
    /// Create a relationship from this object to `target`, annotated with
    /// `annotation`. Parallel relationships to the same target are kept as
    /// long as their annotations differ.
    pub fn connect_to(&self, target: &PersistentObject, annotation: PropertyTree) -> Result<(), EngineError> {
        if self.ptr_eq(target) {
            return Err(EngineError::InvalidOperation(format!(
                "cannot connect {self} to itself"
            )));
        }
        let Some(target_id) = target.id() else {
            return Err(EngineError::UncommittedTarget(format!(
                "cannot connect {self} to {target}: target has never been committed"
            )));
        };
        if self.id() == Some(target_id) {
            return Err(EngineError::InvalidOperation(format!(
                "cannot connect {self} to itself"
            )));
        }
        let annotation = tree::expand(&annotation)?;
        let key = target_id.to_string();

        let mut core = self.core_mut();
        if !core.edges.add(&key, annotation.clone()) {
            let object_type = core.schema.type_name().to_string();
            let message = format!(
                "a relationship {} already exists between {} and {target}",
                Value::Map(annotation),
                core.describe()
            );
            return Err(EngineError::DuplicateObject {
                object_type,
                properties: Vec::new(),
                message,
            });
        }
        core.mark_modified();
        let shown = Value::Map(annotation);
        debug!(source = %core.describe(), target = %key, annotation = %shown, "relationship created");
        Ok(())
    }

    /// Remove relationships to `target`: all of them without a filter,
    /// otherwise those whose stored annotation matches `annotation_filter`.
    /// Filtering consults the store and needs this object committed.
    pub fn disconnect_from(
        &self,
        target: &PersistentObject,
        annotation_filter: Option<&PropertyTree>,
    ) -> Result<(), EngineError> {
        let Some(target_id) = target.id() else {
            return Err(EngineError::UncommittedTarget(format!(
                "cannot disconnect {self} from {target}: target has never been committed"
            )));
        };
        let key = target_id.to_string();
        if !self.core().edges.contains(&key) {
            return Err(EngineError::NotConnected(format!(
                "{self} is not connected to {target}"
            )));
        }

        let Some(filter) = annotation_filter else {
            let mut core = self.core_mut();
            core.edges.remove_target(&key);
            core.mark_modified();
            debug!(source = %core.describe(), target = %key, "all relationships removed");
            return Ok(());
        };

        if !self.is_committed() {
            return Err(EngineError::UncommittedObject(format!(
                "cannot disconnect {self} from {target} by filter: the source is not committed"
            )));
        }
        let (id, type_name, entries) = {
            let core = self.core();
            (core.id, core.schema.type_name().to_string(), core.edges.annotations(&key).len())
        };
        let flat = tree::flatten(&tree::expand(filter)?)?;
        let gateway = self.gateway();

        let mut matching = Vec::new();
        for position in 0..entries {
            let mut at_position = tree::from_pairs([(ID_FIELD, Value::from(id))]);
            for (field, value) in &flat {
                at_position.insert(format!("{RELATIONSHIPS_FIELD}.{key}.{position}.{field}"), value.clone());
            }
            if gateway.count(&type_name, &at_position)? > 0 {
                matching.push(position);
            }
        }
        if matching.is_empty() {
            return Err(EngineError::NotConnected(format!(
                "{self} is not connected to {target} by any relationship matching {}",
                Value::Map(flat)
            )));
        }

        let mut core = self.core_mut();
        let removed = core.edges.remove_entries(&key, &matching);
        core.mark_modified();
        debug!(source = %core.describe(), target = %key, removed, "relationships removed");
        Ok(())
    }

    /// In-memory check; false when `target` has no identity.
    pub fn has_relationships_with(&self, target: &PersistentObject) -> bool {
        match target.id() {
            Some(id) => self.core().edges.contains(&id.to_string()),
            None => false,
        }
    }

    /// Copies of the annotations of every relationship to `target`.
    pub fn list_relationships_with(&self, target: &PersistentObject) -> Vec<PropertyTree> {
        match target.id() {
            Some(id) => self.core().edges.annotations(&id.to_string()).to_vec(),
            None => Vec::new(),
        }
    }

    /// Identities of the objects this one has relationships to, in the order
    /// they were first connected.
    pub fn relationship_targets(&self) -> Vec<String> {
        self.core().edges.targets().to_vec()
    }

    /// Query selecting objects with a relationship to this one, or `None`
    /// when nothing can match.
    fn in_query(
        &self,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<Option<PropertyTree>, EngineError> {
        let Some(id) = self.id() else {
            debug!(object = %self, "in-neighbors of an uncommitted object");
            return Ok(None);
        };
        let key = id.to_string();
        let mut query = tree::from_pairs([(RELATIONSHIP_WITH_FIELD, key.clone())]);
        if let Some(edge_filter) = edge_filter {
            query.insert(format!("{RELATIONSHIPS_FIELD}.{key}"), elem_match(edge_filter)?);
        }
        Ok(Some(merge_filter(query, neighbor_filter)?))
    }

    /// Query selecting the targets of this object's relationships, or `None`
    /// when nothing can match.
    fn out_query(
        &self,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<Option<PropertyTree>, EngineError> {
        let targets = self.relationship_targets();
        if targets.is_empty() {
            return Ok(None);
        }

        let candidates = match edge_filter {
            None => targets,
            Some(edge_filter) => {
                if !self.is_committed() {
                    return Err(EngineError::UncommittedObject(format!(
                        "cannot filter relationships from {self}: the source is not committed"
                    )));
                }
                let id = self.id();
                let type_name = self.type_name();
                let condition = elem_match(edge_filter)?;
                let gateway = self.gateway();
                let mut kept = Vec::new();
                for target in targets {
                    let mut by_target = tree::from_pairs([(ID_FIELD, Value::from(id))]);
                    by_target.insert(format!("{RELATIONSHIPS_FIELD}.{target}"), condition.clone());
                    if gateway.count(&type_name, &by_target)? > 0 {
                        kept.push(target);
                    }
                }
                kept
            }
        };
        if candidates.is_empty() {
            return Ok(None);
        }

        let query = tree::from_pairs([(
            ID_FIELD,
            Value::Map(tree::from_pairs([(
                "$in",
                Value::List(candidates.into_iter().map(Value::from).collect()),
            )])),
        )]);
        Ok(Some(merge_filter(query, neighbor_filter)?))
    }

    /// Objects of `neighbor_type` with a relationship to this one.
    pub fn in_neighbors(
        &self,
        neighbor_type: &str,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<Cursor, EngineError> {
        let gateway = self.gateway();
        match self.in_query(neighbor_filter, edge_filter)? {
            Some(query) => gateway.find(neighbor_type, &query),
            None => gateway.empty_cursor(neighbor_type),
        }
    }

    pub fn count_in_neighbors(
        &self,
        neighbor_type: &str,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        match self.in_query(neighbor_filter, edge_filter)? {
            Some(query) => self.gateway().count(neighbor_type, &query),
            None => Ok(0),
        }
    }

    /// Objects of `neighbor_type` this one has a relationship to.
    pub fn out_neighbors(
        &self,
        neighbor_type: &str,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<Cursor, EngineError> {
        let gateway = self.gateway();
        match self.out_query(neighbor_filter, edge_filter)? {
            Some(query) => gateway.find(neighbor_type, &query),
            None => gateway.empty_cursor(neighbor_type),
        }
    }

    pub fn count_out_neighbors(
        &self,
        neighbor_type: &str,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        match self.out_query(neighbor_filter, edge_filter)? {
            Some(query) => self.gateway().count(neighbor_type, &query),
            None => Ok(0),
        }
    }

    /// In-neighbors followed by out-neighbors, as selected by `direction`.
    pub fn neighbors(
        &self,
        direction: Direction,
        neighbor_type: &str,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<Cursor, EngineError> {
        let mut cursor = self.gateway().empty_cursor(neighbor_type)?;
        if direction.has_ingoing() {
            cursor = cursor.chain(self.in_neighbors(neighbor_type, neighbor_filter, edge_filter)?);
        }
        if direction.has_outgoing() {
            cursor = cursor.chain(self.out_neighbors(neighbor_type, neighbor_filter, edge_filter)?);
        }
        Ok(cursor)
    }

    pub fn count_neighbors(
        &self,
        direction: Direction,
        neighbor_type: &str,
        neighbor_filter: Option<&PropertyTree>,
        edge_filter: Option<&PropertyTree>,
    ) -> Result<u64, EngineError> {
        let mut total = 0;
        if direction.has_ingoing() {
            total += self.count_in_neighbors(neighbor_type, neighbor_filter, edge_filter)?;
        }
        if direction.has_outgoing() {
            total += self.count_out_neighbors(neighbor_type, neighbor_filter, edge_filter)?;
        }
        Ok(total)
    }
}
