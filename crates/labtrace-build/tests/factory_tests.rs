//! Tests for the graph factory and part materializer, driven through a
//! snapshot client.

use std::cell::RefCell;

use labtrace_build::{apply_visitor, BuildOptions, PartMaterializer, TraceFactory};
use labtrace_lims::records::{
    AssociationRecord, CollectionRecord, FieldRole, FieldValueRecord, ItemRecord,
    JobAssociationRecord, JobRecord, ObjectTypeRecord, OperationRecord, OperationTypeRecord,
    PlanRecord, SampleRecord, UploadRecord,
};
use labtrace_lims::{LimsClient, LimsError, SnapshotClient};
use labtrace_model::{ActivityRef, Entity};
use serde_json::json;

fn operation_type(name: &str) -> OperationTypeRecord {
    OperationTypeRecord {
        id: "1".to_string(),
        category: "test".to_string(),
        name: name.to_string(),
    }
}

fn tube() -> Option<ObjectTypeRecord> {
    Some(ObjectTypeRecord {
        id: "20".to_string(),
        name: "Tube".to_string(),
    })
}

fn item_input(field_value_id: &str, name: &str, item_id: &str, routing: Option<&str>) -> FieldValueRecord {
    FieldValueRecord {
        id: field_value_id.to_string(),
        name: name.to_string(),
        role: FieldRole::Input,
        value: None,
        child_item_id: Some(item_id.to_string()),
        row: None,
        column: None,
        routing: routing.map(str::to_string),
    }
}

fn item_output(field_value_id: &str, name: &str, item_id: &str, routing: Option<&str>) -> FieldValueRecord {
    FieldValueRecord {
        role: FieldRole::Output,
        ..item_input(field_value_id, name, item_id, routing)
    }
}

fn timestamp(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    Some(text.parse().unwrap())
}

fn completed_job(job_id: &str, updated_at: &str) -> JobAssociationRecord {
    JobAssociationRecord {
        job_id: job_id.to_string(),
        status: "complete".to_string(),
        updated_at: timestamp(updated_at),
    }
}

/// Plan `p1` with one "Dilute" operation consuming item `I1` and producing
/// collection `C1`, both tagged with the same routing key.
fn dilute_snapshot() -> SnapshotClient {
    let mut client = SnapshotClient::new();
    client.add_plan(PlanRecord {
        id: "p1".to_string(),
        name: "dilution run".to_string(),
        status: "done".to_string(),
        operations: vec![OperationRecord {
            id: "op1".to_string(),
            operation_type: operation_type("Dilute"),
            job_associations: vec![completed_job("j1", "2018-10-20T10:00:00Z")],
            associations: vec![],
        }],
        associations: vec![],
    });
    client.add_field_values(
        "op1",
        vec![
            item_input("f1", "Culture", "I1", Some("out")),
            item_output("f2", "Dilution Plate", "C1", Some("out")),
        ],
    );
    client.add_item(ItemRecord {
        id: "I1".to_string(),
        sample: Some(SampleRecord {
            id: 1,
            name: "S1".to_string(),
        }),
        object_type: tube(),
        associations: vec![],
    });
    client.add_collection(CollectionRecord {
        id: "C1".to_string(),
        object_type: tube(),
        sample_matrix: vec![vec![Some(1), Some(1), None, None]],
        part_associations: vec![],
        associations: vec![],
    });
    client.add_sample(SampleRecord {
        id: 1,
        name: "S1".to_string(),
    });
    client.add_job(JobRecord {
        id: "j1".to_string(),
        status: "complete".to_string(),
        start_time: timestamp("2018-10-20T09:00:00Z"),
        end_time: timestamp("2018-10-20T10:00:00Z"),
        updated_at: timestamp("2018-10-20T10:00:00Z"),
        operation_ids: vec!["op1".to_string()],
        upload_ids: vec![],
    });
    client
}

fn sources_of(entity: &Entity) -> Vec<&str> {
    entity
        .provenance()
        .sources
        .iter()
        .map(String::as_str)
        .collect()
}

#[test]
fn routing_correlates_output_to_input() {
    let client = dilute_snapshot();
    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();

    let collection = trace.get_item("C1").unwrap();
    assert_eq!(sources_of(collection), vec!["I1"]);
    assert_eq!(
        collection.provenance().generator,
        Some(ActivityRef::Operation("op1".to_string()))
    );
    // the reverse input index knows what consumed I1
    assert_eq!(trace.operations_consuming("I1"), ["op1"]);
}

#[test]
fn unmatched_routing_leaves_output_sources_empty() {
    let mut client = SnapshotClient::new();
    client.add_plan(PlanRecord {
        id: "p1".to_string(),
        name: "run".to_string(),
        status: "done".to_string(),
        operations: vec![OperationRecord {
            id: "op1".to_string(),
            operation_type: operation_type("Dilute"),
            job_associations: vec![completed_job("j1", "2018-10-20T10:00:00Z")],
            associations: vec![],
        }],
        associations: vec![],
    });
    client.add_field_values(
        "op1",
        vec![
            item_input("f1", "Culture", "I1", Some("a")),
            item_output("f2", "Plate", "C1", Some("b")),
        ],
    );
    client.add_item(ItemRecord {
        id: "I1".to_string(),
        sample: Some(SampleRecord {
            id: 1,
            name: "S1".to_string(),
        }),
        object_type: tube(),
        associations: vec![],
    });
    client.add_collection(CollectionRecord {
        id: "C1".to_string(),
        object_type: tube(),
        sample_matrix: vec![],
        part_associations: vec![],
        associations: vec![],
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    assert!(sources_of(trace.get_item("C1").unwrap()).is_empty());
}

#[test]
fn missing_item_skips_argument_without_failing_build() {
    let mut client = SnapshotClient::new();
    client.add_plan(PlanRecord {
        id: "p1".to_string(),
        name: "run".to_string(),
        status: "done".to_string(),
        operations: vec![OperationRecord {
            id: "op1".to_string(),
            operation_type: operation_type("Dilute"),
            job_associations: vec![],
            associations: vec![],
        }],
        associations: vec![],
    });
    client.add_field_values("op1", vec![item_input("f1", "Culture", "GONE", None)]);

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    let operation = trace.get_operation("op1").unwrap();
    assert_eq!(operation.get_inputs().count(), 0);
    assert!(!trace.has_item("GONE"));
}

#[test]
fn completed_job_with_latest_update_wins() {
    let mut client = dilute_snapshot();
    // a later completed job and a pending one compete with j1
    client.add_plan(PlanRecord {
        id: "p2".to_string(),
        name: "run".to_string(),
        status: "done".to_string(),
        operations: vec![OperationRecord {
            id: "op2".to_string(),
            operation_type: operation_type("Dilute"),
            job_associations: vec![
                completed_job("j1", "2018-10-20T10:00:00Z"),
                completed_job("j2", "2018-10-21T10:00:00Z"),
                JobAssociationRecord {
                    job_id: "j3".to_string(),
                    status: "pending".to_string(),
                    updated_at: timestamp("2018-10-22T10:00:00Z"),
                },
            ],
            associations: vec![],
        }],
        associations: vec![],
    });
    client.add_field_values("op2", vec![]);
    client.add_job(JobRecord {
        id: "j2".to_string(),
        status: "complete".to_string(),
        start_time: timestamp("2018-10-21T09:00:00Z"),
        end_time: timestamp("2018-10-21T10:00:00Z"),
        updated_at: timestamp("2018-10-21T10:00:00Z"),
        operation_ids: vec!["op2".to_string()],
        upload_ids: vec![],
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p2", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    assert!(trace.has_job("j2"));
    assert!(!trace.has_job("j3"));
    assert_eq!(
        trace.get_operation("op2").unwrap().job_id.as_deref(),
        Some("j2")
    );
}

#[test]
fn item_upload_association_becomes_file_with_item_source() {
    let mut client = dilute_snapshot();
    client.add_item(ItemRecord {
        id: "I2".to_string(),
        sample: Some(SampleRecord {
            id: 1,
            name: "S1".to_string(),
        }),
        object_type: tube(),
        associations: vec![AssociationRecord::upload("reading", "u1")],
    });
    client.add_field_values(
        "op1",
        vec![
            item_input("f1", "Culture", "I1", Some("out")),
            item_input("f3", "Reference", "I2", None),
            item_output("f2", "Dilution Plate", "C1", Some("out")),
        ],
    );
    client.add_upload(UploadRecord {
        id: "u1".to_string(),
        name: "od_item_I2_reading.csv".to_string(),
        size: Some(128),
        job_id: "j1".to_string(),
        check_sum: None,
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    let file = trace.file_by_upload("u1").expect("file for upload");
    let sources: Vec<&str> = file.provenance.sources.iter().map(String::as_str).collect();
    assert_eq!(sources, vec!["I2"]);
}

#[test]
fn upload_owned_by_foreign_job_is_dropped() {
    let mut client = dilute_snapshot();
    client.add_item(ItemRecord {
        id: "I2".to_string(),
        sample: Some(SampleRecord {
            id: 1,
            name: "S1".to_string(),
        }),
        object_type: tube(),
        associations: vec![AssociationRecord::upload("reading", "u9")],
    });
    client.add_field_values(
        "op1",
        vec![
            item_input("f1", "Culture", "I1", Some("out")),
            item_input("f3", "Reference", "I2", None),
            item_output("f2", "Dilution Plate", "C1", Some("out")),
        ],
    );
    // the upload's job has no operation in this plan
    client.add_upload(UploadRecord {
        id: "u9".to_string(),
        name: "foreign.csv".to_string(),
        size: None,
        job_id: "j-foreign".to_string(),
        check_sum: None,
    });
    client.add_job(JobRecord {
        id: "j-foreign".to_string(),
        status: "complete".to_string(),
        start_time: None,
        end_time: None,
        updated_at: None,
        operation_ids: vec!["op-elsewhere".to_string()],
        upload_ids: vec!["u9".to_string()],
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    assert!(trace.file_by_upload("u9").is_none());
}

#[test]
fn sample_matrix_materializes_parts_with_samples() {
    let client = dilute_snapshot();
    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();

    for well in ["A1", "A2"] {
        let part = trace.get_part("C1", well).expect("part exists");
        assert_eq!(part.sample().map(|s| s.id), Some(1));
        assert_eq!(
            part.provenance().generator,
            Some(ActivityRef::Operation("op1".to_string()))
        );
    }
    assert!(trace.get_part("C1", "A3").is_none());
    assert!(trace.get_part("C1", "A4").is_none());
}

#[test]
fn materialization_is_idempotent() {
    let client = dilute_snapshot();
    let mut factory = TraceFactory::new(&client);
    let mut trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();

    let before: Vec<String> = trace
        .item_ids_of_kind(labtrace_model::EntityKind::Part)
        .into_iter()
        .collect();
    let edges_before: Vec<Vec<String>> = before
        .iter()
        .map(|id| {
            trace
                .get_item(id)
                .unwrap()
                .provenance()
                .sources
                .iter()
                .cloned()
                .collect()
        })
        .collect();

    let mut materializer = PartMaterializer::new();
    apply_visitor(&mut trace, &mut factory, &mut materializer);

    let after: Vec<String> = trace
        .item_ids_of_kind(labtrace_model::EntityKind::Part)
        .into_iter()
        .collect();
    let edges_after: Vec<Vec<String>> = after
        .iter()
        .map(|id| {
            trace
                .get_item(id)
                .unwrap()
                .provenance()
                .sources
                .iter()
                .cloned()
                .collect()
        })
        .collect();
    assert_eq!(before, after);
    assert_eq!(edges_before, edges_after);
}

#[test]
fn routing_matrix_adds_sources_and_attributes() {
    let mut client = dilute_snapshot();
    client.add_collection(CollectionRecord {
        id: "C1".to_string(),
        object_type: tube(),
        sample_matrix: vec![],
        part_associations: vec![],
        associations: vec![AssociationRecord::object(
            "routing",
            json!({
                "routing_matrix": {
                    "rows": [[{"source": "I1", "attributes": {"volume": "10:microliter"}}]]
                }
            }),
        )],
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    let part = trace.get_part("C1", "A1").expect("part from routing");
    assert_eq!(sources_of(part), vec!["I1"]);
    // sample identity flows from the routing source
    assert_eq!(part.sample().map(|s| s.id), Some(1));
    let attrs = part.attributes().unwrap();
    assert_eq!(attrs.get("volume"), Some(&json!("10:microliter")));
    // plain-item sources are recorded for colony extraction
    assert_eq!(attrs.get("source_reference"), Some(&json!("I1")));
}

#[test]
fn conflicting_sample_evidence_drops_source_edge() {
    let mut client = dilute_snapshot();
    // the routing source carries sample 2 while the matrix says sample 1
    client.add_item(ItemRecord {
        id: "909".to_string(),
        sample: Some(SampleRecord {
            id: 2,
            name: "S2".to_string(),
        }),
        object_type: tube(),
        associations: vec![],
    });
    client.add_collection(CollectionRecord {
        id: "C1".to_string(),
        object_type: tube(),
        sample_matrix: vec![vec![Some(1)]],
        part_associations: vec![],
        associations: vec![AssociationRecord::object(
            "routing",
            json!({ "routing_matrix": { "rows": [[{"source": "909"}]] } }),
        )],
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    let part = trace.get_part("C1", "A1").expect("part exists");
    // first writer wins and the conflicting edge is dropped
    assert_eq!(part.sample().map(|s| s.id), Some(1));
    assert!(sources_of(part).is_empty());
}

#[test]
fn legacy_bracketed_source_reference_resolves() {
    let mut client = dilute_snapshot();
    client.add_collection(CollectionRecord {
        id: "402".to_string(),
        object_type: tube(),
        sample_matrix: vec![vec![None, Some(1)]],
        part_associations: vec![],
        associations: vec![],
    });
    client.add_collection(CollectionRecord {
        id: "C1".to_string(),
        object_type: tube(),
        sample_matrix: vec![],
        part_associations: vec![],
        associations: vec![AssociationRecord::object(
            "routing",
            json!({ "routing_matrix": { "rows": [[{"source": "402/[[0, 1]]"}]] } }),
        )],
    });

    let mut factory = TraceFactory::new(&client);
    let trace = factory
        .build("p1", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    let part = trace.get_part("C1", "A1").expect("part exists");
    assert_eq!(sources_of(part), vec!["402/A2"]);
    // the upstream part picked up its sample from the 402 matrix
    let upstream = trace.get_item("402/A2").unwrap();
    assert_eq!(upstream.sample().map(|s| s.id), Some(1));
}

/// Client wrapper counting `find_item` calls, to pin down memoization.
struct CountingClient {
    inner: SnapshotClient,
    item_fetches: RefCell<usize>,
}

impl LimsClient for CountingClient {
    fn find_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, LimsError> {
        self.inner.find_plan(plan_id)
    }

    fn find_item(&self, item_id: &str) -> Result<Option<ItemRecord>, LimsError> {
        *self.item_fetches.borrow_mut() += 1;
        self.inner.find_item(item_id)
    }

    fn find_collection(&self, item_id: &str) -> Result<Option<CollectionRecord>, LimsError> {
        self.inner.find_collection(item_id)
    }

    fn find_operation_inputs(
        &self,
        operation_id: &str,
    ) -> Result<Option<Vec<FieldValueRecord>>, LimsError> {
        self.inner.find_operation_inputs(operation_id)
    }

    fn find_job(&self, job_id: &str) -> Result<Option<JobRecord>, LimsError> {
        self.inner.find_job(job_id)
    }

    fn find_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>, LimsError> {
        self.inner.find_upload(upload_id)
    }

    fn find_sample(&self, sample_id: i64) -> Result<Option<SampleRecord>, LimsError> {
        self.inner.find_sample(sample_id)
    }
}

#[test]
fn repeated_references_fetch_each_item_once() {
    let mut client = dilute_snapshot();
    // a second operation consuming the same input item
    client.add_plan(PlanRecord {
        id: "p3".to_string(),
        name: "run".to_string(),
        status: "done".to_string(),
        operations: vec![
            OperationRecord {
                id: "op1".to_string(),
                operation_type: operation_type("Dilute"),
                job_associations: vec![completed_job("j1", "2018-10-20T10:00:00Z")],
                associations: vec![],
            },
            OperationRecord {
                id: "op3".to_string(),
                operation_type: operation_type("Measure"),
                job_associations: vec![completed_job("j1", "2018-10-20T10:00:00Z")],
                associations: vec![],
            },
        ],
        associations: vec![],
    });
    client.add_field_values("op3", vec![item_input("f9", "Culture", "I1", None)]);
    let client = CountingClient {
        inner: client,
        item_fetches: RefCell::new(0),
    };

    let mut factory = TraceFactory::new(&client);
    factory
        .build("p3", "exp", None, &BuildOptions { apply_fixes: false })
        .unwrap();
    // I1 and C1 each fetched exactly once despite repeated references
    assert_eq!(*client.item_fetches.borrow(), 2);
}
