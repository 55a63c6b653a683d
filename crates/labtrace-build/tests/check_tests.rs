//! Consistency-checker soundness tests.

use labtrace_build::check_trace;
use labtrace_model::{
    ActivityRef, Attributes, CollectionEntity, Entity, FileEntity, FileId, ItemEntity,
    OperationActivity, OperationType, PartEntity, Provenance, Sample, Trace,
};

fn operation(operation_id: &str, name: &str) -> OperationActivity {
    OperationActivity::new(
        operation_id,
        OperationType {
            id: "1".to_string(),
            category: "test".to_string(),
            name: name.to_string(),
        },
    )
}

fn sample() -> Option<Sample> {
    Some(Sample {
        id: 3,
        name: "strain".to_string(),
    })
}

/// Item 1 (a declared input) feeds an operation producing item 2; a file
/// with one source and a generator completes the picture.
fn sound_trace(with_derivation_edge: bool) -> Trace {
    let mut trace = Trace::new("x");
    trace.add_operation(operation("op1", "Dilute"));
    trace.add_item(Entity::Item(ItemEntity::new("1", sample(), None)));
    let mut derived = ItemEntity::new("2", sample(), None);
    derived
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    if with_derivation_edge {
        derived.provenance.add_source("1");
    }
    trace.add_item(Entity::Item(derived));

    let mut file = FileEntity::from_upload(FileId(0), "od.csv", "11", None, "j1");
    file.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    file.provenance.add_source("2");
    trace.add_file(file);
    trace
}

#[test]
fn sound_graph_passes() {
    let mut trace = sound_trace(true);
    assert!(check_trace(&mut trace, vec!["1"]));
}

#[test]
fn removing_an_irreplaceable_source_edge_fails() {
    let mut trace = sound_trace(false);
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn stop_list_exempts_declared_inputs_only() {
    let mut trace = sound_trace(true);
    // without the stop list, item 1 has no generator and no sources
    assert!(!check_trace(&mut trace, Vec::<String>::new()));
}

#[test]
fn dangling_source_reference_fails() {
    let mut trace = sound_trace(true);
    trace.get_item_mut("2").unwrap().add_source("ghost");
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn generator_must_be_present_in_trace() {
    let mut trace = sound_trace(true);
    trace
        .get_item_mut("2")
        .unwrap()
        .add_generator(ActivityRef::Operation("op-elsewhere".to_string()));
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn operation_inputs_must_resolve() {
    let mut trace = sound_trace(true);
    let mut op = operation("op2", "Measure");
    op.add_input(labtrace_model::OperationArgument::Input {
        name: "Plate".to_string(),
        field_value_id: "9".to_string(),
        item_id: "absent".to_string(),
        routing_id: None,
    });
    trace.add_operation(op);
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn file_with_no_source_fails() {
    let mut trace = sound_trace(true);
    let mut stray = FileEntity::from_upload(FileId(1), "stray.csv", "12", None, "j1");
    stray
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_file(stray);
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn file_with_multiple_sources_is_reported() {
    let mut trace = sound_trace(true);
    let file_id = FileId(0);
    trace.get_file_mut(file_id).unwrap().provenance.add_source("1");
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn external_files_are_exempt() {
    let mut trace = sound_trace(true);
    trace.add_file(FileEntity::external(FileId(1), "basespace_run"));
    assert!(check_trace(&mut trace, vec!["1"]));
}

#[test]
fn part_without_sources_flags_sourced_collection() {
    let mut trace = sound_trace(true);
    let mut coll = CollectionEntity::new("20", None);
    coll.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    coll.provenance.add_source("1");
    trace.add_item(Entity::Collection(coll));
    let mut well = PartEntity {
        item_id: "20/A1".to_string(),
        part_ref: "20/A1".to_string(),
        collection_id: "20".to_string(),
        sample: sample(),
        object_type: None,
        attributes: Attributes::new(),
        provenance: Provenance::default(),
    };
    well.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_item(Entity::Part(well));
    // heuristic check: the collection knows its derivation, the part does not
    assert!(!check_trace(&mut trace, vec!["1"]));
}

#[test]
fn sourced_part_in_sourced_collection_passes() {
    let mut trace = sound_trace(true);
    let mut coll = CollectionEntity::new("20", None);
    coll.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    coll.provenance.add_source("1");
    trace.add_item(Entity::Collection(coll));
    let mut well = PartEntity {
        item_id: "20/A1".to_string(),
        part_ref: "20/A1".to_string(),
        collection_id: "20".to_string(),
        sample: sample(),
        object_type: None,
        attributes: Attributes::new(),
        provenance: Provenance::default(),
    };
    well.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    well.provenance.add_source("1");
    trace.add_item(Entity::Part(well));
    assert!(check_trace(&mut trace, vec!["1"]));
}
