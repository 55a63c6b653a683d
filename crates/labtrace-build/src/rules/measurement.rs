//! Measurement capabilities: steps that tag measurement operations and
//! resolve file generators and sources.

use std::collections::HashMap;

use labtrace_model::{ActivityRef, Entity, FileId, Trace};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::embedded_item_id;
use crate::visitor::VisitCx;

/// Tags matching operations as measurements and attaches instrument
/// metadata; resolves file generators from the file's job, falling back to
/// the whole job when several operations match. Optionally allocates one
/// job operation per file (instruments that write one file per operation
/// without linking them) and sources calibration-bead files.
pub struct MeasurementTag {
    /// Instrument metadata copied onto matching operations.
    pub measurement: Value,
    /// Allocate one matching job operation per file when the generator
    /// could only be pinned to the job.
    pub allocate_per_job: bool,
    /// Generator argument naming the calibration-bead input, for files
    /// listed in the trace's `bead_files` attribute.
    pub bead_argument: Option<String>,
    /// job ID -> not-yet-allocated matching operations
    job_queues: HashMap<String, Vec<String>>,
}

impl MeasurementTag {
    pub fn new(measurement: Value) -> Self {
        Self {
            measurement,
            allocate_per_job: false,
            bead_argument: None,
            job_queues: HashMap::new(),
        }
    }

    pub fn with_job_allocation(mut self) -> Self {
        self.allocate_per_job = true;
        self
    }

    pub fn with_bead_argument(mut self, argument: impl Into<String>) -> Self {
        self.bead_argument = Some(argument.into());
        self
    }

    /// The caller has already checked the operation-name match.
    pub fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        let Some(operation) = cx.trace.get_operation_mut(operation_id) else {
            return;
        };
        operation
            .attributes
            .add("measurement_operation", Value::Bool(true));
        operation.attributes.extend_from(&self.measurement);
    }

    /// Pop one matching operation of the job for this file.
    fn allocate_operation(
        &mut self,
        trace: &Trace,
        job_id: &str,
        names: &[String],
    ) -> Option<String> {
        let queue = self.job_queues.entry(job_id.to_string()).or_insert_with(|| {
            trace
                .get_job(job_id)
                .map(|job| {
                    job.operation_ids
                        .iter()
                        .filter(|op_id| {
                            trace
                                .get_operation(op_id)
                                .map(|op| names.iter().any(|name| name == op.type_name()))
                                .unwrap_or(false)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        });
        queue.pop()
    }

    pub fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId, names: &[String]) {
        self.find_file_generator(cx, file_id, names);

        if self.allocate_per_job {
            let job_generator = cx.trace.get_file(file_id).and_then(|file| {
                match &file.provenance.generator {
                    Some(ActivityRef::Job(job_id)) => Some(job_id.clone()),
                    _ => None,
                }
            });
            if let Some(job_id) = job_generator {
                match self.allocate_operation(cx.trace, &job_id, names) {
                    Some(operation_id) => {
                        cx.trace
                            .set_file_generator(file_id, ActivityRef::Operation(operation_id));
                    }
                    None => error!(file = %file_id, "no generator found for file"),
                }
            }
        }

        if self.bead_argument.is_some() {
            self.bead_source(cx, file_id, names);
        }
    }

    /// Determine the most specific generator from the job of the file.
    ///
    /// Operations of the job are filtered by this rule's operation names,
    /// then against the file's source: the source must be an input to the
    /// operation or be generated by it. One candidate becomes the
    /// generator; several promote the generator to the whole job rather
    /// than guessing.
    fn find_file_generator(&mut self, cx: &mut VisitCx<'_>, file_id: FileId, names: &[String]) {
        let Some(file) = cx.trace.get_file(file_id) else {
            return;
        };
        if file.provenance.generator.is_some() {
            return;
        }
        let Some(job_id) = file.job_id().map(str::to_string) else {
            return;
        };
        let Some(job) = cx.trace.get_job(&job_id) else {
            debug!(file = %file_id, job = %job_id, "job of file is not in trace");
            return;
        };

        let job_ops: Vec<String> = job
            .operation_ids
            .iter()
            .filter(|op_id| {
                cx.trace
                    .get_operation(op_id)
                    .map(|op| names.iter().any(|name| name == op.type_name()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if job_ops.is_empty() {
            debug!(file = %file_id, job = %job_id, "no job operation matches rule");
            return;
        }

        let mut candidates = job_ops;
        if let Some(source_id) = file_source(cx.trace, file_id) {
            let Some(source_generator) = cx
                .trace
                .get_item(&source_id)
                .and_then(|source| source.provenance().generator.clone())
            else {
                error!(source = %source_id, file = %file_id, "source for file has no generator");
                return;
            };
            candidates.retain(|op_id| {
                let consumes = cx
                    .trace
                    .get_operation(op_id)
                    .map(|op| op.has_input_item(&source_id))
                    .unwrap_or(false);
                consumes || source_generator == ActivityRef::Operation(op_id.clone())
            });
            if candidates.is_empty() {
                debug!(
                    file = %file_id,
                    source = %source_id,
                    "no generator found for file matching source"
                );
                return;
            }
        }

        if candidates.len() == 1 {
            let operation_id = candidates.remove(0);
            info!(operation = %operation_id, file = %file_id, "adding generator for file");
            cx.trace
                .set_file_generator(file_id, ActivityRef::Operation(operation_id));
        } else {
            info!(job = %job_id, file = %file_id, "adding job as generator for file");
            cx.trace.set_file_generator(file_id, ActivityRef::Job(job_id));
        }
    }

    /// Calibration-bead files are stray plan uploads; allocate an operation
    /// and source the file from its bead input.
    fn bead_source(&mut self, cx: &mut VisitCx<'_>, file_id: FileId, names: &[String]) {
        let Some(argument) = self.bead_argument.clone() else {
            return;
        };
        let Some(file) = cx.trace.get_file(file_id) else {
            return;
        };
        if file.provenance.has_sources() {
            return;
        }
        let Some(job_id) = file.job_id().map(str::to_string) else {
            return;
        };
        let Some(bead_files) = cx.trace.get_attribute("bead_files").and_then(Value::as_array)
        else {
            debug!("no bead_files attribute");
            return;
        };
        if !bead_files.contains(&Value::from(file_id.0)) {
            debug!(file = %file_id, "file is not in bead_files");
            return;
        }

        let Some(operation_id) = self.allocate_operation(cx.trace, &job_id, names) else {
            error!(file = %file_id, "no generator found for bead file");
            return;
        };
        cx.trace
            .set_file_generator(file_id, ActivityRef::Operation(operation_id.clone()));

        let bead_item = cx
            .trace
            .get_operation(&operation_id)
            .and_then(|op| op.named_inputs(&argument).first().cloned())
            .and_then(|arg| arg.item_id().map(str::to_string));
        let Some(bead_item_id) = bead_item else {
            warn!(operation = %operation_id, argument = %argument, "no bead input on operation");
            return;
        };
        cx.trace.add_file_source(file_id, bead_item_id.clone());
        if let Some(attrs) = cx
            .trace
            .get_item_mut(&bead_item_id)
            .and_then(Entity::attributes_mut)
        {
            attrs.add("standard", Value::String("BEAD_FLUORESCENCE".to_string()));
        }
        info!(beads = %bead_item_id, file = %file_id, "adding beads as source for file");
    }
}

/// The single source of a file, collection-ized: a part source stands in
/// for its collection. More than one source is an error and yields `None`.
fn file_source(trace: &Trace, file_id: FileId) -> Option<String> {
    let file = trace.get_file(file_id)?;
    if !file.provenance.has_sources() {
        return None;
    }
    if file.provenance.sources.len() > 1 {
        error!(
            file = %file_id,
            sources = ?file.provenance.sources,
            "file has more than one source"
        );
        return None;
    }
    let source_id = file.provenance.sources.first()?;
    match trace.get_item(source_id) {
        Some(Entity::Part(part)) => Some(part.collection_id.clone()),
        _ => Some(source_id.clone()),
    }
}

/// Measurement file sourced from the generator's named plate input. Applies
/// once the generator has been pinned to a matching operation.
pub fn file_source_from_input(
    cx: &mut VisitCx<'_>,
    file_id: FileId,
    names: &[String],
    argument: &str,
) {
    let Some(file) = cx.trace.get_file(file_id) else {
        return;
    };
    if file.provenance.has_sources() {
        return;
    }
    let Some(ActivityRef::Operation(operation_id)) = file.provenance.generator.clone() else {
        debug!(file = %file_id, "file has no operation generator");
        return;
    };
    let Some(operation) = cx.trace.get_operation(&operation_id) else {
        return;
    };
    if !names.iter().any(|name| name == operation.type_name()) {
        return;
    }
    let Some(plate_id) = operation
        .named_inputs(argument)
        .first()
        .and_then(|arg| arg.item_id().map(str::to_string))
    else {
        return;
    };
    cx.trace.add_file_source(file_id, plate_id.clone());
    info!(plate = %plate_id, file = %file_id, "adding plate as source for file");
}

/// Files referenced by upload-valued attributes of the collection's source
/// get the collection as their source (and its generator when they have
/// none). The caller has already checked the generator match.
pub fn file_source_from_attribute(cx: &mut VisitCx<'_>, collection_id: &str, keys: &[String]) {
    let Some(collection) = cx.trace.get_item(collection_id) else {
        return;
    };
    if !collection.provenance().has_sources() {
        return;
    }
    let generator = collection.provenance().generator.clone();
    let Some(source_id) = collection.provenance().sources.first().cloned() else {
        return;
    };
    for key in keys {
        let upload_id = cx
            .trace
            .get_item(&source_id)
            .and_then(Entity::attributes)
            .and_then(|attrs| attrs.get(key))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        let Some(upload_id) = upload_id else {
            continue;
        };
        let Some(file_id) = cx.trace.file_by_upload(&upload_id).map(|file| file.id) else {
            continue;
        };
        let file = cx.trace.get_file(file_id);
        if file.map(|f| f.provenance.has_sources()).unwrap_or(true) {
            continue;
        }
        cx.trace.add_file_source(file_id, collection_id);
        let needs_generator = cx
            .trace
            .get_file(file_id)
            .map(|f| f.provenance.generator.is_none())
            .unwrap_or(false);
        if needs_generator {
            if let Some(generator) = generator.clone() {
                cx.trace.set_file_generator(file_id, generator);
            }
        }
    }
}

/// File located by name prefix from a collection attribute; the collection
/// becomes its source and the collection's generator its generator.
pub fn timeseries_file_source(cx: &mut VisitCx<'_>, collection_id: &str, attribute: &str) {
    let Some(collection) = cx.trace.get_item(collection_id) else {
        return;
    };
    let generator = collection.provenance().generator.clone();
    let Some(prefix) = collection
        .attributes()
        .and_then(|attrs| attrs.get(attribute))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return;
    };
    let matches = cx.trace.find_files_by_name_prefix(&prefix);
    let Some(file_id) = matches.first().copied() else {
        warn!(prefix = %prefix, collection = collection_id, "no file matches name prefix");
        return;
    };
    cx.trace.add_file_source(file_id, collection_id);
    info!(collection = collection_id, file = %file_id, "adding collection as source for file");
    if let Some(generator) = generator {
        info!(file = %file_id, "adding generator for file");
        cx.trace.set_file_generator(file_id, generator);
    }
}

/// Resurrects a calibration plate referenced only through a plan-level
/// upload whose filename embeds the plate's item ID. The plate is
/// materialized through the resolver, gets the `CAL_`-parameterized
/// operation as its generator, and matching calibration files get the plate
/// as their source.
pub struct CalibrationPlate {
    /// Plan attribute key prefix holding the calibration upload.
    pub association_prefix: String,
    /// Operation argument distinguishing calibration runs (`CAL_` values).
    pub measurement_argument: String,
    plate: Option<String>,
}

impl CalibrationPlate {
    pub fn new(
        association_prefix: impl Into<String>,
        measurement_argument: impl Into<String>,
    ) -> Self {
        Self {
            association_prefix: association_prefix.into(),
            measurement_argument: measurement_argument.into(),
            plate: None,
        }
    }

    pub fn visit_plan(&mut self, cx: &mut VisitCx<'_>, plan_id: &str) {
        let filename = cx
            .trace
            .get_plan(plan_id)
            .and_then(|plan| {
                plan.attributes
                    .iter()
                    .find(|(key, _)| key.starts_with(&self.association_prefix))
                    .map(|(_, value)| value.clone())
            })
            .and_then(|upload| {
                upload
                    .get("upload_file_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let Some(filename) = filename else {
            debug!(plan = plan_id, "no calibration upload in plan associations");
            return;
        };
        let Some(plate_id) = embedded_item_id(&filename) else {
            return;
        };
        if let Some(entity_id) = cx.resolver.resolve_item(cx.trace, &plate_id) {
            info!(plate = %entity_id, "resurrected calibration plate");
            self.plate = Some(entity_id);
        }
    }

    /// The caller has already checked the operation-name match.
    pub fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        let Some(plate_id) = self.plate.clone() else {
            return;
        };
        let is_calibration = cx
            .trace
            .get_operation(operation_id)
            .and_then(|op| op.named_inputs(&self.measurement_argument).first().cloned())
            .and_then(|arg| arg.value_str().map(|value| value.starts_with("CAL_")))
            .unwrap_or(false);
        if is_calibration {
            cx.trace
                .set_generator(&plate_id, ActivityRef::Operation(operation_id.to_string()));
        }
    }

    pub fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId, names: &[String]) {
        let Some(file) = cx.trace.get_file(file_id) else {
            return;
        };
        let Some(ActivityRef::Operation(operation_id)) = file.provenance.generator.clone() else {
            return;
        };
        let matches = cx
            .trace
            .get_operation(&operation_id)
            .map(|op| names.iter().any(|name| name == op.type_name()))
            .unwrap_or(false);
        if !matches {
            return;
        }

        let source_count = cx
            .trace
            .get_file(file_id)
            .map(|f| f.provenance.sources.len())
            .unwrap_or(0);
        if source_count == 0 {
            // source the file from the calibration plate named in its filename
            let Some(plate_id) = &self.plate else {
                return;
            };
            let named = cx
                .trace
                .get_file(file_id)
                .and_then(|f| embedded_item_id(&f.name));
            if named.as_deref() == Some(plate_id.as_str()) {
                let plate_id = plate_id.clone();
                cx.trace.add_file_source(file_id, plate_id);
            }
        } else if source_count > 1 {
            // keep only the source generated by this operation
            let keeper = cx.trace.get_file(file_id).and_then(|f| {
                f.provenance
                    .sources
                    .iter()
                    .find(|source_id| {
                        cx.trace
                            .get_item(source_id)
                            .map(|source| {
                                source.provenance().generated_by(&ActivityRef::Operation(
                                    operation_id.clone(),
                                ))
                            })
                            .unwrap_or(false)
                    })
                    .cloned()
            });
            if let Some(keeper) = keeper {
                if let Some(file) = cx.trace.get_file_mut(file_id) {
                    file.provenance.sources.retain(|source| source == &keeper);
                }
            }
        }
    }
}

/// Promote a file's sole source's generator to the file, when the source is
/// generated by a matching operation that nothing else consumes.
pub fn file_generator_from_sole_source(
    cx: &mut VisitCx<'_>,
    file_id: FileId,
    names: &[String],
    standard: Option<&str>,
) {
    let Some(file) = cx.trace.get_file(file_id) else {
        return;
    };
    if file.provenance.generator.is_some() {
        return;
    }
    if file.provenance.sources.len() != 1 {
        return;
    }
    let source_id = file.provenance.sources.first().cloned().unwrap_or_default();
    let Some(source_generator) = cx
        .trace
        .get_item(&source_id)
        .and_then(|source| source.provenance().generator.clone())
    else {
        error!(source = %source_id, file = %file_id, "source of file has no generator");
        return;
    };
    let ActivityRef::Operation(operation_id) = source_generator else {
        return;
    };
    let matches = cx
        .trace
        .get_operation(&operation_id)
        .map(|op| names.iter().any(|name| name == op.type_name()))
        .unwrap_or(false);
    if !matches {
        return;
    }
    if !cx.trace.operations_consuming(&source_id).is_empty() {
        return;
    }
    cx.trace
        .set_file_generator(file_id, ActivityRef::Operation(operation_id));
    if let Some(standard) = standard {
        if let Some(attrs) = cx.trace.get_item_mut(&source_id).and_then(Entity::attributes_mut) {
            attrs.add("standard", Value::String(standard.to_string()));
        }
    }
}

/// Attach the job's first upload to the operation as its design document.
/// The caller has already checked the operation-name match.
pub fn design_document_from_job_upload(cx: &mut VisitCx<'_>, operation_id: &str, attribute: &str) {
    let Some(job_id) = cx
        .trace
        .get_operation(operation_id)
        .and_then(|op| op.job_id.clone())
    else {
        warn!(operation = operation_id, "operation has no job");
        return;
    };
    let Some(upload_id) = cx.resolver.job_uploads(&job_id).first().cloned() else {
        warn!(job = %job_id, "job has no uploads");
        return;
    };
    if let Some(file_id) = cx.resolver.resolve_file(cx.trace, &upload_id) {
        cx.trace
            .set_file_generator(file_id, ActivityRef::Operation(operation_id.to_string()));
    }
    if let Some(operation) = cx.trace.get_operation_mut(operation_id) {
        operation
            .attributes
            .add(attribute, Value::String(upload_id));
    }
}
