use nodegraph_core::{ObjectId, PropertyTree, Value};
use nodegraph_engine::{
    CREATION_TIME_FIELD, EngineError, FindMode, Gateway, ID_FIELD, MODIFICATION_TIME_FIELD, ObjectState, QueryResult,
};
use nodegraph_harness::{NODE, TAG, TestDb, props, registry};
use nodegraph_storage::StoreConfig;
use proptest::prelude::*;

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn commit_assigns_identity_and_creation_time() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.node("foo")?;
    assert_eq!(node.state(), ObjectState::New);
    assert!(node.id().is_none());
    assert!(!node.is_committed());

    node.commit()?;
    let id = node.id().ok_or("no identity after commit")?;
    assert_eq!(node.state(), ObjectState::Committed);
    assert_eq!(node.get(ID_FIELD)?, Some(Value::from(id)));
    assert!(node.contains(CREATION_TIME_FIELD)?);
    assert!(!node.contains(MODIFICATION_TIME_FIELD)?);
    Ok(())
}

#[test]
fn modifying_a_committed_object_makes_it_dirty() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.committed_node("foo")?;
    let id = node.id();

    node.set("size", 3)?;
    assert_eq!(node.state(), ObjectState::Dirty);
    assert!(!node.is_committed());

    node.commit()?;
    assert_eq!(node.state(), ObjectState::Committed);
    assert_eq!(node.id(), id);
    assert!(node.contains(MODIFICATION_TIME_FIELD)?);

    let stored = db.gateway.count(NODE, &props([("size", 3)]))?;
    assert_eq!(stored, 1);
    Ok(())
}

#[test]
fn delete_always_marks_dirty() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.gateway.create(NODE, props([("name", Value::from("foo")), ("info.size", Value::from(3))]))?;
    node.commit()?;

    assert_eq!(node.delete("info.size")?, Value::from(3));
    assert_eq!(node.state(), ObjectState::Dirty);
    assert!(!node.contains("info")?);
    assert!(matches!(node.delete("info.size"), Err(EngineError::NotFound(_))));
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn setting_the_current_value_is_not_a_modification() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.committed_node("foo")?;

    let name = node.require("name")?;
    node.set("name", name)?;
    assert_eq!(node.state(), ObjectState::Committed);

    let fresh = db.node("bar")?;
    fresh.set("name", "bar")?;
    assert_eq!(fresh.state(), ObjectState::New);
    Ok(())
}

#[test]
fn nested_keys_address_the_same_tree() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.node("foo")?;

    node.set("info.size", 3)?;
    node.set(["info", "kind"], "leaf")?;
    assert_eq!(node.get(["info", "size"])?, Some(Value::from(3)));
    assert_eq!(node.get("info.kind")?, Some(Value::from("leaf")));
    assert_eq!(
        node.get("info")?,
        Some(Value::Map(props([("kind", Value::from("leaf")), ("size", Value::from(3))])))
    );
    assert_eq!(node.get("missing")?, None);
    assert_eq!(node.get_or("missing", 7)?, Value::from(7));
    assert!(matches!(node.require("missing"), Err(EngineError::NotFound(_))));
    Ok(())
}

#[test]
fn returned_values_are_copies() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.node("foo")?;
    node.set("info.size", 3)?;

    let mut info = node.get("info")?.ok_or("missing info")?;
    if let Value::Map(map) = &mut info {
        map.insert("size".into(), Value::from(99));
    }
    let mut all = node.properties();
    all.remove("name");

    assert_eq!(node.get("info.size")?, Some(Value::from(3)));
    assert!(node.contains("name")?);
    Ok(())
}

#[test]
fn reserved_properties_are_guarded() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.committed_node("foo")?;

    assert!(matches!(node.set(ID_FIELD, "forged"), Err(EngineError::InvalidOperation(_))));
    assert!(matches!(node.set("_private.x", 1), Err(EngineError::InvalidOperation(_))));
    assert!(matches!(node.delete(CREATION_TIME_FIELD), Err(EngineError::InvalidOperation(_))));
    assert_eq!(node.state(), ObjectState::Committed);

    let created = db.gateway.create(NODE, props([("name", Value::from("x")), ("_secret", Value::from(1))]));
    assert!(matches!(created, Err(EngineError::InvalidOperation(_))));
    Ok(())
}

#[test]
fn malformed_keys_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.node("foo")?;

    assert!(matches!(node.set("a..b", 1), Err(EngineError::MalformedKey(_))));
    assert!(matches!(node.set("", 1), Err(EngineError::MalformedKey(_))));
    assert!(matches!(node.get("$gt.a"), Err(EngineError::MalformedKey(_))));
    assert_eq!(node.state(), ObjectState::New);
    Ok(())
}

// ============================================================================
// Commit
// ============================================================================

#[test]
fn repeated_commit_writes_once() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.node("foo")?;
    assert_eq!(db.stats.saves(), 0);

    node.commit()?;
    node.commit()?;
    assert_eq!(db.stats.saves(), 1);

    node.set("name", "foo")?;
    node.commit()?;
    assert_eq!(db.stats.saves(), 1);

    node.set("name", "bar")?;
    node.commit()?;
    node.commit()?;
    assert_eq!(db.stats.saves(), 2);
    Ok(())
}

#[test]
fn unique_field_collision_is_duplicate_object() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.committed_node("dup")?;
    let second = db.node("dup")?;

    match second.commit() {
        Err(EngineError::DuplicateObject {
            object_type,
            properties,
            ..
        }) => {
            assert_eq!(object_type, NODE);
            assert_eq!(properties, vec![("name".to_string(), Value::from("dup"))]);
        }
        other => return Err(format!("expected a duplicate, got {other:?}").into()),
    }
    assert_eq!(second.state(), ObjectState::New);
    assert!(second.id().is_none());

    second.set("name", "unique")?;
    second.commit()?;
    assert!(second.is_committed());
    Ok(())
}

#[test]
fn non_unique_types_accept_equal_values() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    for _ in 0..2 {
        db.gateway.create(TAG, props([("name", "same")]))?.commit()?;
    }
    assert_eq!(db.gateway.count(TAG, &props([("name", "same")]))?, 2);
    Ok(())
}

// ============================================================================
// Queries
// ============================================================================

fn sized_nodes(db: &TestDb) -> Result<Vec<nodegraph_engine::PersistentObject>, EngineError> {
    (1..=5)
        .map(|size| {
            let node = db.gateway.create(
                NODE,
                props([
                    ("name", Value::from(format!("n{size}"))),
                    ("size", Value::from(size)),
                    ("info.parity", Value::from(if size % 2 == 0 { "even" } else { "odd" })),
                ]),
            )?;
            node.commit()?;
            Ok(node)
        })
        .collect()
}

#[test]
fn empty_filter_selects_everything() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let _nodes = sized_nodes(&db)?;

    let names: Vec<Value> = db
        .gateway
        .find(NODE, &PropertyTree::new())?
        .map(|node| node.and_then(|n| n.require("name")))
        .collect::<Result<_, _>>()?;
    assert_eq!(names.len(), 5);
    assert_eq!(names[0], Value::from("n1"));
    assert_eq!(db.gateway.count(NODE, &PropertyTree::new())?, 5);
    Ok(())
}

#[test]
fn operators_pass_through_in_any_case() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let _nodes = sized_nodes(&db)?;

    let at_least_three = props([("size", Value::Map(props([("$gte", 3)])))]);
    assert_eq!(db.gateway.count(NODE, &at_least_three)?, 3);

    let shouting = props([("size", Value::Map(props([("$GTE", 3), ("$LT", 5)])))]);
    assert_eq!(db.gateway.count(NODE, &shouting)?, 2);

    let listed = props([("size.$in", Value::List(vec![Value::from(1), Value::from(4)]))]);
    assert_eq!(db.gateway.count(NODE, &listed)?, 2);
    Ok(())
}

#[test]
fn nested_filters_match_on_fields() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let _nodes = sized_nodes(&db)?;

    let nested = props([("info", Value::Map(props([("parity", "even")])))]);
    assert_eq!(db.gateway.count(NODE, &nested)?, 2);
    assert_eq!(db.gateway.count(NODE, &props([("info.parity", "odd")]))?, 3);
    Ok(())
}

#[test]
fn logical_clauses_match_like_top_level_filters() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.gateway
        .create(TAG, props([("info.size", Value::from(3)), ("info.kind", Value::from("x"))]))?
        .commit()?;

    let nested = props([("info", Value::Map(props([("size", 3)])))]);
    assert_eq!(db.gateway.count(TAG, &nested)?, 1);
    for operator in ["$or", "$AND"] {
        let wrapped = props([(operator, Value::List(vec![Value::Map(nested.clone())]))]);
        assert_eq!(db.gateway.count(TAG, &wrapped)?, 1);
    }
    let excluded = props([("$nor", Value::List(vec![Value::Map(nested)]))]);
    assert_eq!(db.gateway.count(TAG, &excluded)?, 0);
    Ok(())
}

#[test]
fn unknown_operator_is_an_operation_error() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let _nodes = sized_nodes(&db)?;

    let filter = props([("size", Value::Map(props([("$near", 3)])))]);
    assert!(matches!(db.gateway.count(NODE, &filter), Err(EngineError::Operation(_))));
    Ok(())
}

#[test]
fn cursors_do_not_restart() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let _nodes = sized_nodes(&db)?;

    let mut cursor = db.gateway.find(NODE, &props([("info.parity", "odd")]))?;
    assert_eq!(cursor.remaining(), 3);
    let first_pass = cursor.by_ref().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(first_pass.len(), 3);
    assert!(cursor.is_exhausted());
    assert!(cursor.next().is_none());
    Ok(())
}

#[test]
fn query_modes() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let nodes = sized_nodes(&db)?;
    let filter = props([("size", 2)]);

    match db.gateway.query(NODE, &filter, FindMode::One)? {
        QueryResult::One(Some(found)) => assert!(found.ptr_eq(&nodes[1])),
        _ => return Err("expected one object".into()),
    }
    match db.gateway.query(NODE, &props([("size", 42)]), FindMode::One)? {
        QueryResult::One(None) => {}
        _ => return Err("expected no object".into()),
    }
    match db.gateway.query(NODE, &filter, FindMode::Count)? {
        QueryResult::Count(n) => assert_eq!(n, 1),
        _ => return Err("expected a count".into()),
    }
    match db.gateway.query(NODE, &filter, FindMode::All)? {
        QueryResult::Objects(cursor) => assert_eq!(cursor.count(), 1),
        _ => return Err("expected a cursor".into()),
    }
    Ok(())
}

#[test]
fn distinct_counts_each_value() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    for (name, color) in [("a", Some("red")), ("b", Some("blue")), ("c", Some("red")), ("d", None)] {
        let node = db.node(name)?;
        if let Some(color) = color {
            node.set("color", color)?;
        }
        node.commit()?;
    }

    let colors = db.gateway.distinct(NODE, "color")?;
    assert_eq!(
        colors,
        vec![(Value::from("red"), 2), (Value::from("blue"), 1), (Value::Null, 1)]
    );
    Ok(())
}

#[test]
fn unregistered_types_are_refused() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    assert!(matches!(
        db.gateway.find("Nope", &PropertyTree::new()),
        Err(EngineError::InvalidOperation(_))
    ));
    assert!(matches!(
        db.gateway.create("Nope", PropertyTree::new()),
        Err(EngineError::InvalidOperation(_))
    ));
    Ok(())
}

#[test]
fn reads_from_a_type_never_written_are_empty() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    assert_eq!(db.gateway.count(TAG, &PropertyTree::new())?, 0);
    assert!(db.gateway.find_one(TAG, &props([("name", "x")]))?.is_none());
    assert!(db.gateway.list_types()?.is_empty());
    Ok(())
}

#[test]
fn list_types_follows_first_commits() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.committed_node("foo")?;
    assert_eq!(db.gateway.list_types()?, vec![NODE.to_string()]);

    db.gateway.create(TAG, props([("name", "t")]))?.commit()?;
    assert_eq!(db.gateway.list_types()?, vec![NODE.to_string(), TAG.to_string()]);
    Ok(())
}

#[test]
fn resolve_by_identifier_text() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let node = db.committed_node("foo")?;
    let id = node.id().ok_or("no identity")?;

    assert!(db.gateway.resolve(NODE, &id.to_string())?.ptr_eq(&node));
    assert!(matches!(
        db.gateway.resolve(NODE, "not an identifier"),
        Err(EngineError::InvalidOperation(_))
    ));
    assert!(matches!(
        db.gateway.resolve(NODE, &ObjectId::new().to_string()),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        db.gateway.resolve(TAG, &id.to_string()),
        Err(EngineError::NotFound(_))
    ));
    Ok(())
}

// ============================================================================
// On-disk store
// ============================================================================

#[test]
fn objects_survive_reopening_the_store() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::at_path(dir.path().join("graph.db"));

    let id = {
        let gateway = Gateway::open(&config, registry())?;
        let node = gateway.create(NODE, props([("name", Value::from("kept")), ("size", Value::from(9))]))?;
        node.commit()?;
        node.id().ok_or("no identity")?
    };

    let gateway = Gateway::open(&config, registry())?;
    let node = gateway.find_one(NODE, &props([("name", "kept")]))?.ok_or("not stored")?;
    assert_eq!(node.id(), Some(id));
    assert_eq!(node.get("size")?, Some(Value::from(9)));
    assert!(node.is_committed());
    Ok(())
}

#[test]
fn missing_database_without_create_is_a_connection_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::from_toml_str(&format!(
        "[connection]\npath = {:?}\ncreate_if_missing = false\n",
        dir.path().join("absent.db")
    ))?;

    assert!(matches!(Gateway::open(&config, registry()), Err(EngineError::Connection(_))));
    Ok(())
}

// ============================================================================
// Properties (generated)
// ============================================================================

proptest! {
    #[test]
    fn rewriting_any_value_keeps_the_object_clean(value in "[a-z]{0,12}", size in any::<i64>()) {
        let db = TestDb::new().unwrap();
        let node = db.gateway
            .create(NODE, props([("name", Value::from(value.clone())), ("size", Value::from(size))]))
            .unwrap();
        node.commit().unwrap();

        node.set("name", node.require("name").unwrap()).unwrap();
        node.set("size", size).unwrap();
        prop_assert_eq!(node.state(), ObjectState::Committed);
        prop_assert_eq!(db.stats.saves(), 1);
    }
}
