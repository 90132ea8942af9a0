use nodegraph_core::{Direction, PropertyTree, Value};
use nodegraph_engine::{Collection, EngineError, ObjectState, Sequence};
use nodegraph_harness::{TestDb, props};

fn sequence(db: &TestDb, name: &str, residues: &str) -> Result<Sequence, EngineError> {
    let sequence = Sequence::create(&db.gateway, props([("name", name), ("sequence", residues)]))?;
    sequence.commit()?;
    Ok(sequence)
}

fn collection(db: &TestDb, name: &str) -> Result<Collection, EngineError> {
    let collection = Collection::create(&db.gateway, props([("name", name)]))?;
    collection.commit()?;
    Ok(collection)
}

fn names<T: std::ops::Deref<Target = nodegraph_engine::PersistentObject>>(
    items: impl IntoIterator<Item = Result<T, EngineError>>,
) -> Result<Vec<String>, EngineError> {
    let mut names = items
        .into_iter()
        .map(|item| item.and_then(|item| item.require("name")).map(|name| name.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

// ============================================================================
// Sequence properties
// ============================================================================

#[test]
fn sequences_require_name_and_residues() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    assert!(matches!(
        Sequence::create(&db.gateway, props([("name", "s")])),
        Err(EngineError::InvalidObject(_))
    ));
    assert!(matches!(
        Sequence::create(&db.gateway, props([("sequence", "ACGT")])),
        Err(EngineError::InvalidObject(_))
    ));
    Ok(())
}

#[test]
fn length_tracks_the_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let read = sequence(&db, "read", "ACGTACGT")?;
    assert_eq!(read.length()?, 8);

    read.set("sequence", "ACG")?;
    assert_eq!(read.length()?, 3);
    assert_eq!(read.state(), ObjectState::Dirty);
    read.commit()?;

    let stored = db.gateway.count(nodegraph_engine::SEQUENCE, &props([("length", 3)]))?;
    assert_eq!(stored, 1);
    Ok(())
}

#[test]
fn derived_and_required_properties_are_protected() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let read = sequence(&db, "read", "ACGT")?;

    assert!(matches!(read.set("length", 10), Err(EngineError::InvalidOperation(_))));
    for key in ["name", "sequence", "length"] {
        assert!(matches!(read.delete(key), Err(EngineError::InvalidOperation(_))));
    }
    assert!(read.is_committed());

    read.set("class", "contig")?;
    read.delete("class")?;
    Ok(())
}

#[test]
fn sequence_names_repeat_across_the_store() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    sequence(&db, "read", "AC")?;
    sequence(&db, "read", "GT")?;
    assert_eq!(db.gateway.count(nodegraph_engine::SEQUENCE, &props([("name", "read")]))?, 2);
    Ok(())
}

// ============================================================================
// Collections
// ============================================================================

#[test]
fn collection_names_are_unique() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    collection(&db, "reads")?;
    let twin = Collection::create(&db.gateway, props([("name", "reads")]))?;
    assert!(matches!(twin.commit(), Err(EngineError::DuplicateObject { .. })));

    let found = Collection::find_by_name(&db.gateway, "reads")?.ok_or("not found")?;
    assert_eq!(found.name()?, "reads");
    assert!(matches!(found.delete("name"), Err(EngineError::InvalidOperation(_))));
    Ok(())
}

#[test]
fn collections_hold_sequences() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let reads = collection(&db, "reads")?;
    for name in ["r1", "r2"] {
        let read = sequence(&db, name, "ACGT")?;
        read.add_to_collection(&reads, props([("role", "member")]))?;
        read.commit()?;
    }

    assert_eq!(names(reads.list_sequences(None, None)?)?, vec!["r1", "r2"]);
    assert_eq!(reads.count_sequences(Some(&props([("name", "r2")])), None)?, 1);
    assert_eq!(reads.count_sequences(None, Some(&props([("role", "member")])))?, 2);

    let r1 = db
        .gateway
        .find_one(nodegraph_engine::SEQUENCE, &props([("name", "r1")]))?
        .map(Sequence::from_object)
        .transpose()?
        .ok_or("not found")?;
    assert_eq!(names(r1.list_collections(None, None)?)?, vec!["reads"]);
    assert_eq!(r1.count_collections(None, None)?, 1);

    r1.remove_from_collection(&reads, None)?;
    r1.commit()?;
    assert_eq!(reads.count_sequences(None, None)?, 1);
    Ok(())
}

#[test]
fn a_collection_takes_one_sequence_per_name() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let reads = collection(&db, "reads")?;
    let others = collection(&db, "others")?;

    let first = sequence(&db, "read", "AC")?;
    first.add_to_collection(&reads, PropertyTree::new())?;
    first.commit()?;

    let second = sequence(&db, "read", "GT")?;
    match second.add_to_collection(&reads, PropertyTree::new()) {
        Err(EngineError::DuplicateObject { properties, .. }) => {
            assert_eq!(properties, vec![("name".to_string(), Value::from("read"))]);
        }
        other => return Err(format!("expected a duplicate, got {other:?}").into()),
    }
    second.add_to_collection(&others, PropertyTree::new())?;
    second.commit()?;
    assert_eq!(others.count_sequences(None, None)?, 1);
    Ok(())
}

#[test]
fn collections_nest() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let parent = collection(&db, "parent")?;
    let child = collection(&db, "child")?;
    child.add_to_collection(&parent, PropertyTree::new())?;
    child.commit()?;

    assert_eq!(names(child.list_super_collections(None, None)?)?, vec!["parent"]);
    assert_eq!(names(parent.list_sub_collections(None, None)?)?, vec!["child"]);
    assert_eq!(child.count_super_collections(None, None)?, 1);
    assert_eq!(child.count_sub_collections(None, None)?, 0);
    assert_eq!(parent.count_related_collections(Direction::Both, None, None)?, 1);
    assert_eq!(names(parent.list_related_collections(Direction::Outgoing, None, None)?)?, Vec::<String>::new());

    child.remove_from_collection(&parent, None)?;
    child.commit()?;
    assert_eq!(parent.count_sub_collections(None, None)?, 0);
    Ok(())
}

#[test]
fn top_collections_are_the_roots_above_a_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let root = Collection::create(&db.gateway, props([("name", Value::from("root")), ("class", Value::from("study"))]))?;
    root.commit()?;
    let middle = collection(&db, "middle")?;
    let leaf = collection(&db, "leaf")?;
    let lone = collection(&db, "lone")?;
    let side = collection(&db, "side")?;

    middle.add_to_collection(&root, PropertyTree::new())?;
    middle.commit()?;
    leaf.add_to_collection(&middle, PropertyTree::new())?;
    leaf.add_to_collection(&side, PropertyTree::new())?;
    leaf.commit()?;
    side.add_to_collection(&root, PropertyTree::new())?;
    side.commit()?;

    let read = sequence(&db, "read", "ACGT")?;
    read.add_to_collection(&leaf, PropertyTree::new())?;
    read.add_to_collection(&lone, PropertyTree::new())?;
    read.commit()?;

    let top = read.list_top_collections(None)?;
    assert_eq!(names(top.into_iter().map(Ok))?, vec!["lone", "root"]);

    let studies = read.list_top_collections(Some(&props([("class", "study")])))?;
    assert_eq!(names(studies.into_iter().map(Ok))?, vec!["root"]);
    Ok(())
}

#[test]
fn related_sequences_follow_the_direction() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let contig = sequence(&db, "contig", "ACGTACGT")?;
    let read = sequence(&db, "read", "ACGT")?;
    let primer = sequence(&db, "primer", "AC")?;

    read.relate_to_sequence(&contig, props([("type", "part-of")]))?;
    read.commit()?;
    contig.relate_to_sequence(&primer, props([("type", "uses")]))?;
    contig.commit()?;

    assert_eq!(names(contig.list_related_sequences(Direction::Ingoing, None, None)?)?, vec!["read"]);
    assert_eq!(names(contig.list_related_sequences(Direction::Outgoing, None, None)?)?, vec!["primer"]);
    assert_eq!(contig.count_related_sequences(Direction::Both, None, None)?, 2);
    assert_eq!(
        contig.count_related_sequences(Direction::Both, None, Some(&props([("type", "uses")])))?,
        1
    );

    read.dissociate_from_sequence(&contig, None)?;
    read.commit()?;
    assert_eq!(contig.count_related_sequences(Direction::Ingoing, None, None)?, 0);
    Ok(())
}

#[test]
fn typed_wrappers_check_the_object_type() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let reads = collection(&db, "reads")?;
    assert!(matches!(
        Sequence::from_object(reads.object().clone()),
        Err(EngineError::InvalidOperation(_))
    ));
    let back = Collection::from_object(reads.clone().into_object())?;
    assert_eq!(back, reads);
    Ok(())
}
