//! The provenance JSON document.
//!
//! The shape is a consumer contract: field names and nesting must stay
//! stable. Files are restricted to those with a resolved generator, and a
//! file's path is scoped under its generator's activity identifier so
//! per-measurement directories never collide.

use chrono::{DateTime, Utc};
use labtrace_model::{
    ActivityRef, Entity, FileEntity, JobActivity, OperationActivity, OperationArgument, Trace,
};
use serde_json::{json, Map, Value};

fn time_value(time: &Option<DateTime<Utc>>) -> Value {
    match time {
        Some(time) => json!(time.to_rfc3339()),
        None => Value::Null,
    }
}

fn argument_value(argument: &OperationArgument) -> Value {
    match argument {
        OperationArgument::Parameter {
            name,
            field_value_id,
            value,
        } => json!({
            "name": name,
            "field_value_id": field_value_id,
            "value": value,
        }),
        OperationArgument::Input {
            name,
            field_value_id,
            item_id,
            routing_id,
        } => {
            let mut object = Map::new();
            object.insert("name".to_string(), json!(name));
            object.insert("field_value_id".to_string(), json!(field_value_id));
            object.insert("item_id".to_string(), json!(item_id));
            if let Some(routing_id) = routing_id {
                object.insert("routing_id".to_string(), json!(routing_id));
            }
            Value::Object(object)
        }
    }
}

fn operation_value(operation: &OperationActivity) -> Value {
    let mut object = Map::new();
    object.insert("operation_id".to_string(), json!(operation.operation_id));
    object.insert(
        "operation_type".to_string(),
        json!({
            "operation_type_id": operation.operation_type.id,
            "category": operation.operation_type.category,
            "name": operation.operation_type.name,
        }),
    );
    object.insert(
        "inputs".to_string(),
        Value::Array(operation.get_inputs().map(argument_value).collect()),
    );
    object.insert(
        "outputs".to_string(),
        Value::Array(operation.get_outputs().map(argument_value).collect()),
    );
    object.insert("start_time".to_string(), time_value(&operation.start_time));
    object.insert("end_time".to_string(), time_value(&operation.end_time));
    if !operation.attributes.is_empty() {
        object.insert("attributes".to_string(), operation.attributes.as_value());
    }
    Value::Object(object)
}

fn job_value(job: &JobActivity) -> Value {
    json!({
        "job_id": job.job_id,
        "operations": job.operation_ids,
        "status": job.status,
    })
}

fn generator_value(trace: &Trace, generator: &ActivityRef) -> Value {
    match generator {
        ActivityRef::Job(job_id) => match trace.get_job(job_id) {
            Some(job) => job_value(job),
            None => json!({ "job_id": job_id }),
        },
        ActivityRef::Operation(operation_id) => json!({ "operation_id": operation_id }),
    }
}

fn provenance_fields(trace: &Trace, entity: &Entity, object: &mut Map<String, Value>) {
    if let Some(generator) = &entity.provenance().generator {
        object.insert(
            "generated_by".to_string(),
            generator_value(trace, generator),
        );
    }
    if entity.provenance().has_sources() {
        let sources: Vec<&String> = entity.provenance().sources.iter().collect();
        object.insert("sources".to_string(), json!(sources));
    }
}

fn entity_value(trace: &Trace, entity: &Entity) -> Value {
    let mut object = Map::new();
    object.insert("item_id".to_string(), json!(entity.item_id()));
    object.insert("type".to_string(), json!(entity.type_name()));
    provenance_fields(trace, entity, &mut object);
    if let Some(sample) = entity.sample() {
        object.insert(
            "sample".to_string(),
            json!({
                "sample_id": sample.id.to_string(),
                "sample_name": sample.name,
            }),
        );
    }
    if let Some(object_type) = entity.object_type() {
        object.insert(
            "object_type".to_string(),
            json!({
                "object_type_id": object_type.id,
                "object_type_name": object_type.name,
            }),
        );
    }
    if let Entity::Part(part) = entity {
        object.insert("well".to_string(), json!(part.well()));
        object.insert("part_of".to_string(), json!(part.collection_id));
    }
    if let Some(attributes) = entity.attributes() {
        if !attributes.is_empty() {
            object.insert("attributes".to_string(), attributes.as_value());
        }
    }
    Value::Object(object)
}

fn file_value(trace: &Trace, file: &FileEntity, generator: &ActivityRef) -> Value {
    let mut object = Map::new();
    object.insert("id".to_string(), json!(file.id.to_string()));
    object.insert(
        "filename".to_string(),
        json!(file.path_under(Some(&generator.activity_id()))),
    );
    if let Some(file_type) = file.file_type() {
        object.insert("type".to_string(), json!(file_type.label()));
    }
    if let Some(check_sum) = &file.check_sum {
        object.insert("sha256".to_string(), json!(check_sum));
    }
    if let Some(upload_id) = file.upload_id() {
        object.insert("upload_id".to_string(), json!(upload_id));
    }
    if let Some(size) = file.size() {
        object.insert("size".to_string(), json!(size));
    }
    object.insert(
        "generated_by".to_string(),
        generator_value(trace, generator),
    );
    let sources: Vec<&String> = file.provenance.sources.iter().collect();
    object.insert("sources".to_string(), json!(sources));
    Value::Object(object)
}

/// Render the trace as the provenance document.
pub fn trace_document(trace: &Trace) -> Value {
    let mut document = Map::new();
    document.insert("experiment_id".to_string(), json!(trace.experiment_id));
    if let Some(plan) = trace.plans().next() {
        document.insert("plan_id".to_string(), json!(plan.plan_id));
        document.insert("plan_name".to_string(), json!(plan.name));
        document.insert("plan_status".to_string(), json!(plan.status));
    }
    document.insert(
        "plan_inputs".to_string(),
        json!(trace
            .inputs()
            .iter()
            .map(|entity| entity.item_id())
            .collect::<Vec<_>>()),
    );
    document.insert(
        "operations".to_string(),
        Value::Array(trace.operations().map(operation_value).collect()),
    );
    document.insert(
        "jobs".to_string(),
        Value::Array(trace.jobs().map(job_value).collect()),
    );
    document.insert(
        "items".to_string(),
        Value::Array(
            trace
                .entities()
                .map(|entity| entity_value(trace, entity))
                .collect(),
        ),
    );
    document.insert(
        "files".to_string(),
        Value::Array(
            trace
                .files()
                .filter_map(|file| {
                    file.provenance
                        .generator
                        .as_ref()
                        .map(|generator| file_value(trace, file, generator))
                })
                .collect(),
        ),
    );
    if !trace.attributes.is_empty() {
        document.insert("attributes".to_string(), trace.attributes.as_value());
    }
    Value::Object(document)
}
