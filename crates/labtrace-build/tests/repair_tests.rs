//! Tests for the heuristic repair rules and the structural patch pass,
//! on hand-assembled traces.

use labtrace_build::patch::create_patch_visitor;
use labtrace_build::rules::MeasurementTag;
use labtrace_build::{apply_visitor, NullResolver, ProtocolRule, RuleStep};
use labtrace_model::{
    ActivityRef, Attributes, CollectionEntity, Entity, FileEntity, FileId, ItemEntity,
    JobActivity, OperationActivity, OperationArgument, OperationType, PartEntity, Provenance,
    Sample, Trace,
};
use serde_json::json;

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

fn collection(collection_id: &str) -> Entity {
    Entity::Collection(CollectionEntity::new(collection_id, None))
}

fn part(collection_id: &str, well: &str) -> Entity {
    Entity::Part(PartEntity {
        item_id: format!("{}/{}", collection_id, well),
        part_ref: format!("{}/{}", collection_id, well),
        collection_id: collection_id.to_string(),
        sample: None,
        object_type: None,
        attributes: Attributes::new(),
        provenance: Provenance::default(),
    })
}

fn input(item_id: &str, name: &str) -> OperationArgument {
    OperationArgument::Input {
        name: name.to_string(),
        field_value_id: item_id.to_string(),
        item_id: item_id.to_string(),
        routing_id: None,
    }
}

fn sources_of(trace: &Trace, entity_id: &str) -> Vec<String> {
    trace
        .get_item(entity_id)
        .unwrap()
        .provenance()
        .sources
        .iter()
        .cloned()
        .collect()
}

/// Collection X (generated by a Dilute operation) has collection Y as its
/// source; the part X/B2 with no source picks up Y/B2.
fn passthrough_trace(upstream_has_well: bool) -> Trace {
    let mut trace = Trace::new("x");
    trace.add_operation(operation("op1", "Dilute"));
    trace.add_item(collection("Y"));
    if upstream_has_well {
        trace.add_item(part("Y", "B2"));
    }
    let mut x = CollectionEntity::new("X", None);
    x.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    x.provenance.add_source("Y");
    trace.add_item(Entity::Collection(x));
    trace.add_item(part("X", "B2"));
    trace
}

#[test]
fn passthrough_routes_same_well_from_upstream() {
    let mut trace = passthrough_trace(true);
    let mut rule = ProtocolRule::new(["Dilute"]).with_step(RuleStep::PassthroughWells);
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert_eq!(sources_of(&trace, "X/B2"), vec!["Y/B2".to_string()]);
}

#[test]
fn passthrough_declines_when_upstream_well_is_missing() {
    let mut trace = passthrough_trace(false);
    let mut rule = ProtocolRule::new(["Dilute"]).with_step(RuleStep::PassthroughWells);
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert!(sources_of(&trace, "X/B2").is_empty());
}

#[test]
fn passthrough_ignores_non_matching_operations() {
    let mut trace = passthrough_trace(true);
    let mut rule = ProtocolRule::new(["Some Other Protocol"]).with_step(RuleStep::PassthroughWells);
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert!(sources_of(&trace, "X/B2").is_empty());
}

#[test]
fn transfer_coordinate_map_routes_remapped_well() {
    let mut trace = Trace::new("x");
    trace.add_operation(operation("op1", "Induce"));
    trace.add_item(collection("500"));
    trace.add_item(part("500", "C5"));
    let mut target = CollectionEntity::new("600", None);
    target
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    target.provenance.add_source("500");
    target
        .attributes
        .add("deep_well_transfer_coords", json!([["C5"]]));
    trace.add_item(Entity::Collection(target));
    trace.add_item(part("600", "A1"));

    let mut rule = ProtocolRule::new(["Induce"]).with_step(RuleStep::TransferCoordinateMap {
        attribute: "deep_well_transfer_coords".to_string(),
    });
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert_eq!(sources_of(&trace, "600/A1"), vec!["500/C5".to_string()]);
}

#[test]
fn collection_source_comes_from_named_input() {
    let mut trace = Trace::new("x");
    let mut op = operation("op1", "Recover");
    op.add_input(input("700", "96 Deep Well Plate in"));
    trace.add_operation(op);
    trace.add_item(collection("700"));
    let mut target = CollectionEntity::new("800", None);
    target
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_item(Entity::Collection(target));

    let mut rule = ProtocolRule::new(["Recover"]).with_step(RuleStep::CollectionSourceFromInput {
        argument: "96 Deep Well Plate in".to_string(),
    });
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert_eq!(sources_of(&trace, "800"), vec!["700".to_string()]);
}

#[test]
fn item_sources_come_from_generator_inputs() {
    let mut trace = Trace::new("x");
    let mut op = operation("op1", "Mate");
    op.add_input(input("10", "Parent A"));
    op.add_input(input("11", "Parent B"));
    trace.add_operation(op);
    trace.add_item(Entity::Item(ItemEntity::new("10", None, None)));
    trace.add_item(Entity::Item(ItemEntity::new("11", None, None)));
    let mut child = ItemEntity::new("12", None, None);
    child
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_item(Entity::Item(child));

    let mut rule = ProtocolRule::new(["Mate"]).with_step(RuleStep::ItemSourceFromInputs);
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert_eq!(
        sources_of(&trace, "12"),
        vec!["10".to_string(), "11".to_string()]
    );
}

#[test]
fn part_source_matches_by_sample_and_lifts_to_collection() {
    let sample = Sample {
        id: 5,
        name: "strain".to_string(),
    };
    let other = Sample {
        id: 6,
        name: "other".to_string(),
    };
    let mut trace = Trace::new("x");
    let mut op = operation("op1", "Resuspend");
    op.add_input(input("20", "Yeast Plate"));
    op.add_input(input("21", "Yeast Plate"));
    trace.add_operation(op);
    trace.add_item(Entity::Item(ItemEntity::new("20", Some(other), None)));
    trace.add_item(Entity::Item(ItemEntity::new("21", Some(sample.clone()), None)));
    let mut target = CollectionEntity::new("30", None);
    target
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_item(Entity::Collection(target));
    let mut well = PartEntity {
        item_id: "30/A1".to_string(),
        part_ref: "30/A1".to_string(),
        collection_id: "30".to_string(),
        sample: Some(sample),
        object_type: None,
        attributes: Attributes::new(),
        provenance: Provenance::default(),
    };
    well.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_item(Entity::Part(well));

    let mut rule = ProtocolRule::new(["Resuspend"]).with_step(RuleStep::PartSourceBySample {
        argument: "Yeast Plate".to_string(),
    });
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert_eq!(sources_of(&trace, "30/A1"), vec!["21".to_string()]);
    assert_eq!(sources_of(&trace, "30"), vec!["21".to_string()]);
}

#[test]
fn media_lookup_and_copy_propagate_downstream() {
    let mut trace = Trace::new("x");
    let mut op = operation("op1", "Suspend");
    op.add_input(OperationArgument::Parameter {
        name: "Type of Media".to_string(),
        field_value_id: "f1".to_string(),
        value: json!("YPAD"),
    });
    trace.add_operation(op);
    let mut item = ItemEntity::new("40", None, None);
    item.provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    trace.add_item(Entity::Item(item));

    let mut rule = ProtocolRule::new(["Suspend"]).with_step(RuleStep::MediaLookup(
        labtrace_build::rules::MediaLookup::new("Type of Media", vec![("YPAD", "11767")]),
    ));
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    assert_eq!(
        trace
            .get_item("40")
            .unwrap()
            .attributes()
            .unwrap()
            .get("media"),
        Some(&json!({"sample_id": "11767"}))
    );

    // a downstream item copies the attribute from its source
    trace.add_operation(operation("op2", "Grow"));
    let mut child = ItemEntity::new("41", None, None);
    child
        .provenance
        .add_generator(ActivityRef::Operation("op2".to_string()));
    child.provenance.add_source("40");
    trace.add_item(Entity::Item(child));
    let mut copy_rule = ProtocolRule::new(["Grow"]).with_step(RuleStep::CopyAttributeFromSource {
        key: "media".to_string(),
    });
    apply_visitor(&mut trace, &mut NullResolver, &mut copy_rule);
    assert_eq!(
        trace
            .get_item("41")
            .unwrap()
            .attributes()
            .unwrap()
            .get("media"),
        Some(&json!({"sample_id": "11767"}))
    );
}

#[test]
fn matrix_attributes_expand_to_parts() {
    let mut trace = Trace::new("x");
    trace.add_operation(operation("op1", "Inoculate"));
    let mut target = CollectionEntity::new("50", None);
    target
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    target
        .attributes
        .add("inducer_mat", json!([["arabinose", null]]));
    trace.add_item(Entity::Collection(target));
    trace.add_item(part("50", "A1"));
    trace.add_item(part("50", "A2"));

    let mut rule =
        ProtocolRule::new(["Inoculate"]).with_step(RuleStep::PartAttributesFromMatrices);
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    let well_a1 = trace.get_item("50/A1").unwrap().attributes().unwrap();
    assert_eq!(well_a1.get("inducer"), Some(&json!("arabinose")));
    let well_a2 = trace.get_item("50/A2").unwrap().attributes().unwrap();
    assert!(!well_a2.has("inducer"));
}

fn measurement_job_trace(matching_ops: usize) -> Trace {
    let mut trace = Trace::new("x");
    let mut operation_ids = Vec::new();
    for index in 0..matching_ops {
        let operation_id = format!("op{}", index + 1);
        trace.add_operation(operation(&operation_id, "Flow Cytometry 96 well"));
        operation_ids.push(operation_id);
    }
    trace.add_job(JobActivity {
        job_id: "j1".to_string(),
        operation_ids,
        start_time: None,
        end_time: None,
        status: "complete".to_string(),
    });
    let file = FileEntity::from_upload(FileId(0), "A01.fcs", "90", Some(100), "j1");
    trace.add_file(file);
    trace
}

#[test]
fn single_matching_job_operation_becomes_file_generator() {
    let mut trace = measurement_job_trace(1);
    let mut rule = ProtocolRule::new(["Flow Cytometry 96 well"]).with_step(
        RuleStep::MeasurementTag(MeasurementTag::new(json!({"measurement_type": "FLOW"}))),
    );
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    let file = trace.get_file(FileId(0)).unwrap();
    assert_eq!(
        file.provenance.generator,
        Some(ActivityRef::Operation("op1".to_string()))
    );
    // the matching operation is tagged as a measurement
    assert!(trace.get_operation("op1").unwrap().is_measurement());
}

#[test]
fn ambiguous_job_operations_promote_generator_to_job() {
    let mut trace = measurement_job_trace(2);
    let mut rule = ProtocolRule::new(["Flow Cytometry 96 well"]).with_step(
        RuleStep::MeasurementTag(MeasurementTag::new(json!({"measurement_type": "FLOW"}))),
    );
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    let file = trace.get_file(FileId(0)).unwrap();
    assert_eq!(
        file.provenance.generator,
        Some(ActivityRef::Job("j1".to_string()))
    );
}

#[test]
fn file_source_pruning_keeps_item_named_in_filename() {
    let mut trace = Trace::new("x");
    trace.add_item(Entity::Item(ItemEntity::new("412", None, None)));
    trace.add_item(Entity::Item(ItemEntity::new("500", None, None)));
    let mut file = FileEntity::from_upload(FileId(0), "cal_item_412_od.csv", "91", None, "j1");
    file.provenance.add_source("412");
    file.provenance.add_source("500");
    trace.add_file(file);

    let mut patch = create_patch_visitor();
    apply_visitor(&mut trace, &mut NullResolver, &mut patch);
    let file = trace.get_file(FileId(0)).unwrap();
    let sources: Vec<&str> = file.provenance.sources.iter().map(String::as_str).collect();
    assert_eq!(sources, vec!["412"]);
}

#[test]
fn collection_sources_are_inferred_from_part_sources() {
    let mut trace = Trace::new("x");
    trace.add_item(collection("900"));
    trace.add_item(part("900", "A1"));
    let mut target = CollectionEntity::new("901", None);
    target.provenance.generator = None;
    trace.add_item(Entity::Collection(target));
    let mut routed = part("901", "A1");
    routed.add_source("900/A1");
    trace.add_item(routed);
    let mut direct = part("901", "A2");
    direct.add_source("900/A1");
    trace.add_item(direct);

    let mut patch = create_patch_visitor();
    apply_visitor(&mut trace, &mut NullResolver, &mut patch);
    // part-typed sources are lifted to their collection and deduplicated
    assert_eq!(sources_of(&trace, "901"), vec!["900".to_string()]);
}

#[test]
fn upload_files_get_collision_avoidance_prefix() {
    let mut trace = Trace::new("x");
    trace.add_file(FileEntity::from_upload(FileId(0), "A01.fcs", "7", None, "j1"));
    trace.add_file(FileEntity::external(FileId(1), "basespace_run"));

    let mut patch = create_patch_visitor();
    apply_visitor(&mut trace, &mut NullResolver, &mut patch);
    assert_eq!(trace.get_file(FileId(0)).unwrap().name, "7-A01.fcs");
    assert_eq!(trace.get_file(FileId(1)).unwrap().name, "basespace_run");
}

#[test]
fn timeseries_attribute_links_file_to_collection() {
    let mut trace = Trace::new("x");
    trace.add_operation(operation("op1", "Induce"));
    let mut target = CollectionEntity::new("60", None);
    target
        .provenance
        .add_generator(ActivityRef::Operation("op1".to_string()));
    target
        .attributes
        .add("timeseries_filename", json!("induction_series"));
    trace.add_item(Entity::Collection(target));
    trace.add_file(FileEntity::from_upload(
        FileId(0),
        "induction_series_01.csv",
        "93",
        None,
        "j1",
    ));

    let mut rule = ProtocolRule::new(["Induce"]).with_step(RuleStep::TimeseriesFileSource {
        attribute: "timeseries_filename".to_string(),
    });
    apply_visitor(&mut trace, &mut NullResolver, &mut rule);
    let file = trace.get_file(FileId(0)).unwrap();
    let sources: Vec<&str> = file.provenance.sources.iter().map(String::as_str).collect();
    assert_eq!(sources, vec!["60"]);
    assert_eq!(
        file.provenance.generator,
        Some(ActivityRef::Operation("op1".to_string()))
    );
}
