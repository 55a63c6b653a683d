//! Graph factory: assembles a provenance trace from raw LIMS records.
//!
//! The factory walks a plan's operations in plan order, resolving or
//! creating the referenced entities, wiring operation inputs and outputs,
//! and correlating outputs to inputs that share a lab-declared routing key.
//! Jobs, parts, and files are then filled in by the primary visitor pass,
//! followed by the protocol rule battery and the structural patch pass.
//!
//! Every remote record is fetched at most once per build; a missing record
//! is logged and the dependent element skipped, never fatal. Only a missing
//! plan aborts the build.

use std::collections::{HashMap, HashSet};

use labtrace_lims::records::{
    AssociationRecord, CollectionRecord, FieldRole, FieldValueRecord, JobAssociationRecord,
    JobRecord, OperationRecord, OperationTypeRecord, PlanRecord,
};
use labtrace_lims::{LimsClient, LimsError};
use labtrace_model::{
    well_coordinates, ActivityRef, Attributes, CollectionEntity, Entity, FileEntity, FileId,
    FileIdAllocator, ItemEntity, ObjectType, OperationActivity, OperationArgument, OperationType,
    PartEntity, PlanActivity, Provenance, Sample, Trace,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::patch::create_patch_visitor;
use crate::visitor::{apply_visitor, BatchVisitor, EntityResolver, TraceVisitor, VisitCx};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("plan {0} not found in the LIMS")]
    PlanNotFound(String),
    #[error(transparent)]
    Lims(#[from] LimsError),
}

/// Build-wide switches. Clearing `apply_fixes` skips the heuristic rule
/// battery and the patch pass, leaving the raw skeleton for inspection.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub apply_fixes: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { apply_fixes: true }
    }
}

pub struct TraceFactory<'c> {
    client: &'c dyn LimsClient,
    ids: FileIdAllocator,
    plan_records: HashMap<String, PlanRecord>,
    operation_records: HashMap<String, OperationRecord>,
    item_associations: HashMap<String, Vec<AssociationRecord>>,
    collection_records: HashMap<String, CollectionRecord>,
    job_records: HashMap<String, JobRecord>,
    samples: HashMap<i64, Option<Sample>>,
    /// upload ID -> file, memoizing negative results as well
    upload_files: HashMap<String, Option<FileId>>,
    external_files: HashMap<String, FileId>,
}

impl<'c> TraceFactory<'c> {
    pub fn new(client: &'c dyn LimsClient) -> Self {
        Self {
            client,
            ids: FileIdAllocator::new(),
            plan_records: HashMap::new(),
            operation_records: HashMap::new(),
            item_associations: HashMap::new(),
            collection_records: HashMap::new(),
            job_records: HashMap::new(),
            samples: HashMap::new(),
            upload_files: HashMap::new(),
            external_files: HashMap::new(),
        }
    }

    /// Build the trace for one plan.
    ///
    /// `profile` is the protocol-specific repair battery; the primary pass
    /// (jobs, parts, files) and patch pass are always the same.
    pub fn build(
        &mut self,
        plan_id: &str,
        experiment_id: &str,
        profile: Option<&mut dyn TraceVisitor>,
        options: &BuildOptions,
    ) -> Result<Trace, BuildError> {
        let mut trace = Trace::new(experiment_id);

        let plan = self
            .client
            .find_plan(plan_id)?
            .ok_or_else(|| BuildError::PlanNotFound(plan_id.to_string()))?;
        self.add_plan(&mut trace, plan)?;

        let mut primary = BatchVisitor::new();
        primary.add_visitor(Box::new(JobVisitor::new()));
        primary.add_visitor(Box::new(crate::parts::PartMaterializer::new()));
        primary.add_visitor(Box::new(FileProvenanceVisitor));
        apply_visitor(&mut trace, self, &mut primary);

        if options.apply_fixes {
            if let Some(profile) = profile {
                apply_visitor(&mut trace, self, profile);
            }
            let mut patch = create_patch_visitor();
            apply_visitor(&mut trace, self, &mut patch);
        }

        Ok(trace)
    }

    fn add_plan(&mut self, trace: &mut Trace, plan: PlanRecord) -> Result<(), LimsError> {
        let mut operation_ids = Vec::new();
        for operation in &plan.operations {
            let operation_id = operation.id.clone();
            self.operation_records
                .insert(operation_id.clone(), operation.clone());
            self.add_operation(trace, operation);
            self.gather_io(trace, &operation_id)?;
            operation_ids.push(operation_id);
        }

        let mut attributes = Attributes::new();
        for association in &plan.associations {
            if let Some(object) = association.attribute_object() {
                debug!(key = %association.key, "adding plan attribute");
                attributes.extend_from(object);
            }
        }
        let plan_activity = PlanActivity {
            plan_id: plan.id.clone(),
            name: plan.name.clone(),
            status: plan.status.clone(),
            operation_ids,
            attributes,
        };
        self.plan_records.insert(plan.id.clone(), plan);
        trace.add_plan(plan_activity);
        Ok(())
    }

    fn add_operation(&mut self, trace: &mut Trace, record: &OperationRecord) {
        if trace.has_operation(&record.id) {
            return;
        }
        let mut activity = OperationActivity::new(&record.id, to_operation_type(&record.operation_type));
        for association in &record.associations {
            if let Some(object) = association.attribute_object() {
                activity.attributes.extend_from(object);
            }
        }
        trace.add_operation(activity);
    }

    /// Visit field values of the operation, inputs before outputs, building
    /// arguments and correlating outputs to inputs by routing key.
    fn gather_io(&mut self, trace: &mut Trace, operation_id: &str) -> Result<(), LimsError> {
        debug!(operation = operation_id, "gathering operation I/O");
        let mut field_values = match self.client.find_operation_inputs(operation_id)? {
            Some(values) => values,
            None => {
                warn!(operation = operation_id, "no field values for operation");
                return Ok(());
            }
        };
        field_values.sort_by_key(|fv| fv.role);

        let mut routing = RoutingMap::default();
        for field_value in &field_values {
            let Some(argument) = self.create_argument(trace, field_value) else {
                continue;
            };
            match field_value.role {
                FieldRole::Input => {
                    if let Some(item_id) = argument.item_id() {
                        routing.add(&argument);
                        trace.add_input(item_id.to_string(), operation_id.to_string());
                    }
                    if let Some(op) = trace.get_operation_mut(operation_id) {
                        op.add_input(argument);
                    }
                }
                FieldRole::Output => {
                    let Some(item_id) = argument.item_id().map(str::to_string) else {
                        continue;
                    };
                    if let Some(routing_id) = argument.routing_id() {
                        if routing.contains(routing_id) {
                            for input_id in routing.get(routing_id) {
                                if input_id != &item_id {
                                    trace.add_source_to(&item_id, input_id.clone());
                                }
                            }
                        } else {
                            warn!(
                                routing = routing_id,
                                operation = operation_id,
                                "unmatched routing id"
                            );
                        }
                    }
                    trace.set_generator(&item_id, ActivityRef::Operation(operation_id.to_string()));
                    if let Some(op) = trace.get_operation_mut(operation_id) {
                        op.add_output(argument);
                    }
                }
            }
        }
        Ok(())
    }

    /// Argument for one field value. A field value without an item reference
    /// is a parameter; one with row/column addressing refers to a part.
    /// Returns `None` (logged) when the referenced record is missing.
    fn create_argument(
        &mut self,
        trace: &mut Trace,
        field_value: &FieldValueRecord,
    ) -> Option<OperationArgument> {
        let Some(child_item_id) = &field_value.child_item_id else {
            return Some(OperationArgument::Parameter {
                name: field_value.name.clone(),
                field_value_id: field_value.id.clone(),
                value: field_value.value.clone().unwrap_or(Value::Null),
            });
        };

        let mut entity_id = match self.resolve_item(trace, child_item_id) {
            Some(id) => id,
            None => {
                error!(
                    item = %child_item_id,
                    argument = %field_value.name,
                    "no item found for argument"
                );
                return None;
            }
        };

        if let (Some(row), Some(column)) = (field_value.row, field_value.column) {
            debug!(item = %entity_id, row, column, "argument addresses a part");
            let well = match well_coordinates(row, column) {
                Ok(well) => well,
                Err(err) => {
                    warn!(item = %entity_id, %err, "bad part address on argument");
                    return None;
                }
            };
            entity_id = match self.resolve_part(trace, &entity_id, &well) {
                Some(id) => id,
                None => {
                    error!(
                        item = %entity_id,
                        well = %well,
                        argument = %field_value.name,
                        "no part found for argument"
                    );
                    return None;
                }
            };
        }

        Some(OperationArgument::Input {
            name: field_value.name.clone(),
            field_value_id: field_value.id.clone(),
            item_id: entity_id,
            routing_id: field_value.routing.clone(),
        })
    }

    fn fetch_collection_record(&mut self, collection_id: &str) -> Option<CollectionRecord> {
        if let Some(record) = self.collection_records.get(collection_id) {
            return Some(record.clone());
        }
        let record = match self.client.find_collection(collection_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(collection = collection_id, "no collection record upstream");
                CollectionRecord {
                    id: collection_id.to_string(),
                    object_type: None,
                    sample_matrix: Vec::new(),
                    part_associations: Vec::new(),
                    associations: Vec::new(),
                }
            }
            Err(err) => {
                error!(collection = collection_id, %err, "collection fetch failed");
                return None;
            }
        };
        self.collection_records
            .insert(collection_id.to_string(), record.clone());
        Some(record)
    }
}

fn to_operation_type(record: &OperationTypeRecord) -> OperationType {
    OperationType {
        id: record.id.clone(),
        category: record.category.clone(),
        name: record.name.clone(),
    }
}

fn to_object_type(record: &labtrace_lims::records::ObjectTypeRecord) -> ObjectType {
    ObjectType {
        id: record.id.clone(),
        name: record.name.clone(),
    }
}

fn to_sample(record: &labtrace_lims::records::SampleRecord) -> Sample {
    Sample {
        id: record.id,
        name: record.name.clone(),
    }
}

impl EntityResolver for TraceFactory<'_> {
    fn resolve_item(&mut self, trace: &mut Trace, item_id: &str) -> Option<String> {
        debug!(item = item_id, "resolving item");
        if trace.has_item(item_id) {
            return Some(item_id.to_string());
        }

        let record = match self.client.find_item(item_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(item = item_id, "no item record upstream");
                return None;
            }
            Err(err) => {
                error!(item = item_id, %err, "item fetch failed");
                return None;
            }
        };

        if record.is_collection() {
            let collection = self.fetch_collection_record(item_id)?;
            let mut entity = CollectionEntity::new(
                item_id,
                collection.object_type.as_ref().map(to_object_type),
            );
            for association in &collection.associations {
                if let Some(object) = association.attribute_object() {
                    entity.attributes.extend_from(object);
                }
            }
            self.item_associations
                .insert(item_id.to_string(), collection.associations.clone());
            trace.add_item(Entity::Collection(entity));
        } else {
            let mut entity = ItemEntity::new(
                item_id,
                record.sample.as_ref().map(to_sample),
                record.object_type.as_ref().map(to_object_type),
            );
            for association in &record.associations {
                if let Some(object) = association.attribute_object() {
                    entity.attributes.extend_from(object);
                }
            }
            self.item_associations
                .insert(item_id.to_string(), record.associations.clone());
            trace.add_item(Entity::Item(entity));
        }
        Some(item_id.to_string())
    }

    fn resolve_part(
        &mut self,
        trace: &mut Trace,
        collection_id: &str,
        well: &str,
    ) -> Option<String> {
        if !trace.has_item(collection_id) {
            self.resolve_item(trace, collection_id)?;
        }
        let collection = trace.get_item(collection_id)?;
        let Some(collection) = collection.as_collection() else {
            error!(
                item = collection_id,
                "refusing to create part for non-collection"
            );
            return None;
        };
        if let Some(part_id) = collection.part_id_for(well) {
            return Some(part_id.clone());
        }

        let part_ref = labtrace_model::part_ref(collection_id, well);
        debug!(part = %part_ref, "creating part");

        // prefer the lab-declared registration at this address, if any
        let record = self.fetch_collection_record(collection_id);
        let declared = record.as_ref().and_then(|record| {
            record.part_associations.iter().find(|pa| {
                well_coordinates(pa.row, pa.column).as_deref() == Ok(well)
            })
        });

        let (part_id, sample, object_type) = match declared {
            Some(pa) => {
                if pa.collection_id != collection_id {
                    error!(
                        collection = collection_id,
                        association = %pa.collection_id,
                        "collection does not match part association"
                    );
                    return None;
                }
                (
                    pa.part_id.clone(),
                    pa.sample.as_ref().map(to_sample),
                    pa.object_type.as_ref().map(to_object_type),
                )
            }
            None => (part_ref.clone(), None, None),
        };

        let mut attributes = Attributes::new();
        if part_id != part_ref {
            // a first-class part may carry its own associations
            if let Ok(Some(part_record)) = self.client.find_item(&part_id) {
                for association in &part_record.associations {
                    if let Some(object) = association.attribute_object() {
                        attributes.extend_from(object);
                    }
                }
                self.item_associations
                    .insert(part_id.clone(), part_record.associations);
            }
        }

        trace.add_item(Entity::Part(PartEntity {
            item_id: part_id.clone(),
            part_ref,
            collection_id: collection_id.to_string(),
            sample,
            object_type,
            attributes,
            provenance: Provenance::default(),
        }));
        Some(part_id)
    }

    fn resolve_file(&mut self, trace: &mut Trace, upload_id: &str) -> Option<FileId> {
        if let Some(memoized) = self.upload_files.get(upload_id) {
            return *memoized;
        }
        if let Some(existing) = trace.file_id_by_upload(upload_id) {
            return Some(existing);
        }

        let resolved = (|| {
            let upload = match self.client.find_upload(upload_id) {
                Ok(Some(upload)) => upload,
                Ok(None) => {
                    error!(upload = upload_id, "no upload record upstream");
                    return None;
                }
                Err(err) => {
                    error!(upload = upload_id, %err, "upload fetch failed");
                    return None;
                }
            };
            if self.resolve_job(trace, &upload.job_id).is_none() {
                debug!(
                    upload = upload_id,
                    job = %upload.job_id,
                    "job of upload is not in plan"
                );
                return None;
            }
            let mut file = FileEntity::from_upload(
                self.ids.next_id(),
                upload.name.clone(),
                upload.id.clone(),
                upload.size,
                upload.job_id.clone(),
            );
            file.check_sum = upload.check_sum.clone();
            let file_id = file.id;
            trace.add_file(file);
            Some(file_id)
        })();

        self.upload_files.insert(upload_id.to_string(), resolved);
        resolved
    }

    fn external_file(&mut self, trace: &mut Trace, name: &str) -> Option<FileId> {
        if let Some(file_id) = self.external_files.get(name) {
            return Some(*file_id);
        }
        let file = FileEntity::external(self.ids.next_id(), name);
        let file_id = file.id;
        trace.add_file(file);
        self.external_files.insert(name.to_string(), file_id);
        Some(file_id)
    }

    fn resolve_job(&mut self, trace: &mut Trace, job_id: &str) -> Option<String> {
        if trace.has_job(job_id) {
            return Some(job_id.to_string());
        }
        let record = if let Some(record) = self.job_records.get(job_id) {
            record.clone()
        } else {
            match self.client.find_job(job_id) {
                Ok(Some(record)) => {
                    self.job_records.insert(job_id.to_string(), record.clone());
                    record
                }
                Ok(None) => {
                    debug!(job = job_id, "no job record upstream");
                    return None;
                }
                Err(err) => {
                    error!(job = job_id, %err, "job fetch failed");
                    return None;
                }
            }
        };

        let mut operation_ids = Vec::new();
        for operation_id in &record.operation_ids {
            if let Some(operation) = trace.get_operation_mut(operation_id) {
                operation.start_time = record.start_time;
                operation.end_time = record.end_time;
                operation.job_id = Some(job_id.to_string());
                operation_ids.push(operation_id.clone());
            }
        }
        if operation_ids.is_empty() {
            debug!(job = job_id, "job has no operations in plan");
            return None;
        }

        debug!(job = job_id, "creating job");
        trace.add_job(labtrace_model::JobActivity {
            job_id: job_id.to_string(),
            operation_ids,
            start_time: record.start_time,
            end_time: record.end_time,
            status: record.status.clone(),
        });
        Some(job_id.to_string())
    }

    fn find_sample(&mut self, sample_id: i64) -> Option<Sample> {
        if sample_id <= 0 {
            return None;
        }
        if let Some(memoized) = self.samples.get(&sample_id) {
            return memoized.clone();
        }
        let sample = match self.client.find_sample(sample_id) {
            Ok(record) => record.as_ref().map(to_sample),
            Err(err) => {
                error!(sample = sample_id, %err, "sample fetch failed");
                None
            }
        };
        self.samples.insert(sample_id, sample.clone());
        sample
    }

    fn collection_record(&mut self, collection_id: &str) -> Option<CollectionRecord> {
        self.fetch_collection_record(collection_id)
    }

    fn job_candidates(&self, operation_id: &str) -> Vec<JobAssociationRecord> {
        self.operation_records
            .get(operation_id)
            .map(|record| record.job_associations.clone())
            .unwrap_or_default()
    }

    fn plan_associations(&self, plan_id: &str) -> Vec<AssociationRecord> {
        self.plan_records
            .get(plan_id)
            .map(|record| record.associations.clone())
            .unwrap_or_default()
    }

    fn operation_associations(&self, operation_id: &str) -> Vec<AssociationRecord> {
        self.operation_records
            .get(operation_id)
            .map(|record| record.associations.clone())
            .unwrap_or_default()
    }

    fn item_associations(&self, item_id: &str) -> Vec<AssociationRecord> {
        self.item_associations.get(item_id).cloned().unwrap_or_default()
    }

    fn job_uploads(&self, job_id: &str) -> Vec<String> {
        self.job_records
            .get(job_id)
            .map(|record| record.upload_ids.clone())
            .unwrap_or_default()
    }
}

/// routing_id -> input item IDs, scoped to one operation.
#[derive(Debug, Default)]
struct RoutingMap {
    routes: HashMap<String, Vec<String>>,
}

impl RoutingMap {
    fn add(&mut self, argument: &OperationArgument) {
        let (Some(routing_id), Some(item_id)) = (argument.routing_id(), argument.item_id()) else {
            return;
        };
        self.routes
            .entry(routing_id.to_string())
            .or_default()
            .push(item_id.to_string());
    }

    fn contains(&self, routing_id: &str) -> bool {
        self.routes.contains_key(routing_id)
    }

    fn get(&self, routing_id: &str) -> &[String] {
        self.routes
            .get(routing_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Attaches each operation to its completed job: the job association with
/// status `"complete"` and the most recent update time. An exact-timestamp
/// tie is unspecified upstream; it is logged, not tiebroken.
pub struct JobVisitor {
    visited: HashSet<String>,
}

impl JobVisitor {
    pub fn new() -> Self {
        Self {
            visited: HashSet::new(),
        }
    }
}

impl Default for JobVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceVisitor for JobVisitor {
    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        if self.visited.contains(operation_id) {
            return;
        }
        let candidates = cx.resolver.job_candidates(operation_id);
        if candidates.is_empty() {
            error!(operation = operation_id, "operation has no job associations");
            return;
        }
        let completed: Vec<&JobAssociationRecord> = candidates
            .iter()
            .filter(|candidate| candidate.status == "complete")
            .collect();
        let Some(chosen) = completed
            .iter()
            .max_by_key(|candidate| candidate.updated_at)
        else {
            error!(operation = operation_id, "operation has no completed jobs");
            return;
        };
        let ties = completed
            .iter()
            .filter(|candidate| {
                candidate.updated_at == chosen.updated_at && candidate.job_id != chosen.job_id
            })
            .count();
        if ties > 0 {
            warn!(
                operation = operation_id,
                job = %chosen.job_id,
                "multiple completed jobs share an update time; selection is unspecified"
            );
        }

        if let Some(job_id) = cx.resolver.resolve_job(cx.trace, &chosen.job_id) {
            if let Some(job) = cx.trace.get_job(&job_id) {
                self.visited
                    .extend(job.operation_ids.iter().cloned());
            }
        }
    }
}

/// Discovers files from upload associations: item-, collection-, and
/// part-attached uploads get the entity as their source; operation-attached
/// uploads get the operation as their generator; job uploads are simply
/// materialized; plan-level calibration-bead uploads accumulate into the
/// `bead_files` trace attribute.
pub struct FileProvenanceVisitor;

impl FileProvenanceVisitor {
    fn entity_files(cx: &mut VisitCx<'_>, item_id: &str) {
        for association in cx.resolver.item_associations(item_id) {
            let Some(upload_id) = association.upload_reference() else {
                continue;
            };
            debug!(key = %association.key, upload = %upload_id, item = item_id, "upload association");
            if let Some(file_id) = cx.resolver.resolve_file(cx.trace, &upload_id) {
                cx.trace.add_file_source(file_id, item_id);
            }
        }
    }
}

impl TraceVisitor for FileProvenanceVisitor {
    fn visit_item(&mut self, cx: &mut VisitCx<'_>, item_id: &str) {
        Self::entity_files(cx, item_id);
    }

    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {
        Self::entity_files(cx, collection_id);
    }

    fn visit_part(&mut self, cx: &mut VisitCx<'_>, part_id: &str) {
        Self::entity_files(cx, part_id);
    }

    fn visit_job(&mut self, cx: &mut VisitCx<'_>, job_id: &str) {
        for upload_id in cx.resolver.job_uploads(job_id) {
            cx.resolver.resolve_file(cx.trace, &upload_id);
        }
    }

    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        for association in cx.resolver.operation_associations(operation_id) {
            let Some(upload_id) = association.upload_reference() else {
                continue;
            };
            if let Some(file_id) = cx.resolver.resolve_file(cx.trace, &upload_id) {
                cx.trace
                    .set_file_generator(file_id, ActivityRef::Operation(operation_id.to_string()));
            }
        }
    }

    fn visit_plan(&mut self, cx: &mut VisitCx<'_>, plan_id: &str) {
        for association in cx.resolver.plan_associations(plan_id) {
            let Some(upload_id) = association.upload_reference() else {
                continue;
            };
            let Some(file_id) = cx.resolver.resolve_file(cx.trace, &upload_id) else {
                continue;
            };
            if association.key.ends_with("BEAD_UPLOAD") || association.key.starts_with("BEADS_") {
                add_bead_file(cx.trace, file_id);
            }
        }
    }
}

fn add_bead_file(trace: &mut Trace, file_id: FileId) {
    let mut bead_files = trace
        .attributes
        .get("bead_files")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let entry = json!(file_id.0);
    if !bead_files.contains(&entry) {
        info!(file = %file_id, "recording calibration bead file");
        bead_files.push(entry);
        trace.attributes.add("bead_files", Value::Array(bead_files));
    }
}
