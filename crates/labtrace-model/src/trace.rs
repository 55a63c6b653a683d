//! The provenance trace: arena and index structure for one workflow
//! execution.
//!
//! All dictionaries preserve insertion order, which is what makes the fixed
//! traversal order of the repair passes deterministic.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::activity::{JobActivity, OperationActivity, PlanActivity};
use crate::attributes::Attributes;
use crate::entity::{ActivityRef, Entity, EntityKind};
use crate::file::{FileEntity, FileId};
use crate::plate::split_part_ref;

#[derive(Debug, Default)]
pub struct Trace {
    pub experiment_id: String,
    pub attributes: Attributes,
    plans: IndexMap<String, PlanActivity>,
    operations: IndexMap<String, OperationActivity>,
    jobs: IndexMap<String, JobActivity>,
    /// Items, collections, and parts, keyed by item ID.
    items: IndexMap<String, Entity>,
    files: IndexMap<FileId, FileEntity>,
    /// upload ID -> file, so repair rules can follow upload-valued attributes.
    upload_index: HashMap<String, FileId>,
    /// item ID -> operations consuming it as input ("what consumed this").
    input_index: HashMap<String, Vec<String>>,
}

impl Trace {
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------

    pub fn add_plan(&mut self, plan: PlanActivity) {
        debug!(plan = %plan.plan_id, "adding plan to trace");
        self.plans.insert(plan.plan_id.clone(), plan);
    }

    pub fn get_plan(&self, plan_id: &str) -> Option<&PlanActivity> {
        self.plans.get(plan_id)
    }

    pub fn get_plan_mut(&mut self, plan_id: &str) -> Option<&mut PlanActivity> {
        self.plans.get_mut(plan_id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &PlanActivity> {
        self.plans.values()
    }

    pub fn plan_ids(&self) -> Vec<String> {
        self.plans.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    pub fn add_operation(&mut self, operation: OperationActivity) {
        debug!(operation = %operation.operation_id, "adding operation to trace");
        self.operations
            .insert(operation.operation_id.clone(), operation);
    }

    pub fn has_operation(&self, operation_id: &str) -> bool {
        self.operations.contains_key(operation_id)
    }

    pub fn get_operation(&self, operation_id: &str) -> Option<&OperationActivity> {
        self.operations.get(operation_id)
    }

    pub fn get_operation_mut(&mut self, operation_id: &str) -> Option<&mut OperationActivity> {
        self.operations.get_mut(operation_id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationActivity> {
        self.operations.values()
    }

    pub fn operation_ids(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub fn add_job(&mut self, job: JobActivity) {
        debug!(job = %job.job_id, "adding job to trace");
        self.jobs.insert(job.job_id.clone(), job);
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Option<&JobActivity> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobActivity> {
        self.jobs.values()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Items, collections, parts
    // ------------------------------------------------------------------

    pub fn add_item(&mut self, entity: Entity) {
        debug!(item = %entity.item_id(), kind = entity.type_name(), "adding entity to trace");
        if let Entity::Part(part) = &entity {
            let collection_id = part.collection_id.clone();
            let well = part.well().to_string();
            let part_id = part.item_id.clone();
            if let Some(collection) = self
                .items
                .get_mut(&collection_id)
                .and_then(Entity::as_collection_mut)
            {
                collection.add_part(well, part_id);
            }
        }
        self.items.insert(entity.item_id().to_string(), entity);
    }

    pub fn has_item(&self, item_id: &str) -> bool {
        !item_id.is_empty() && self.items.contains_key(item_id)
    }

    pub fn get_item(&self, item_id: &str) -> Option<&Entity> {
        self.items.get(item_id)
    }

    pub fn get_item_mut(&mut self, item_id: &str) -> Option<&mut Entity> {
        self.items.get_mut(item_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.items.values()
    }

    /// IDs of entities of one kind, in insertion order. Snapshots are taken
    /// per traversal category so elements materialized mid-pass are picked
    /// up by the later categories.
    pub fn item_ids_of_kind(&self, kind: EntityKind) -> Vec<String> {
        self.items
            .values()
            .filter(|entity| entity.kind() == kind)
            .map(|entity| entity.item_id().to_string())
            .collect()
    }

    /// The part registered at a well of a collection, if any.
    pub fn get_part(&self, collection_id: &str, well: &str) -> Option<&Entity> {
        let part_id = self
            .items
            .get(collection_id)
            .and_then(Entity::as_collection)?
            .part_id_for(well)?;
        self.items.get(part_id)
    }

    /// Resolve an ID that may be either a direct entity ID or a part
    /// reference of the form `collection_id/well`.
    pub fn resolve_entity_id(&self, reference: &str) -> Option<String> {
        if self.has_item(reference) {
            return Some(reference.to_string());
        }
        let (collection_id, well) = split_part_ref(reference)?;
        self.get_part(collection_id, well)
            .map(|part| part.item_id().to_string())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    pub fn add_file(&mut self, file: FileEntity) {
        debug!(file = %file.id, name = %file.name, "adding file to trace");
        if let Some(upload_id) = file.upload_id() {
            self.upload_index.insert(upload_id.to_string(), file.id);
        }
        self.files.insert(file.id, file);
    }

    pub fn has_file(&self, file_id: FileId) -> bool {
        self.files.contains_key(&file_id)
    }

    pub fn get_file(&self, file_id: FileId) -> Option<&FileEntity> {
        self.files.get(&file_id)
    }

    pub fn get_file_mut(&mut self, file_id: FileId) -> Option<&mut FileEntity> {
        self.files.get_mut(&file_id)
    }

    pub fn file_by_upload(&self, upload_id: &str) -> Option<&FileEntity> {
        self.upload_index
            .get(upload_id)
            .and_then(|id| self.files.get(id))
    }

    pub fn file_id_by_upload(&self, upload_id: &str) -> Option<FileId> {
        self.upload_index.get(upload_id).copied()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntity> {
        self.files.values()
    }

    pub fn file_ids(&self) -> Vec<FileId> {
        self.files.keys().copied().collect()
    }

    pub fn files_generated_by<'a>(
        &'a self,
        generator: &'a ActivityRef,
    ) -> impl Iterator<Item = &'a FileEntity> {
        self.files
            .values()
            .filter(move |file| file.provenance.generated_by(generator))
    }

    pub fn find_files_by_name_prefix(&self, prefix: &str) -> Vec<FileId> {
        self.files
            .values()
            .filter(|file| file.name.starts_with(prefix))
            .map(|file| file.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Reverse input index
    // ------------------------------------------------------------------

    pub fn add_input(&mut self, item_id: impl Into<String>, operation_id: impl Into<String>) {
        self.input_index
            .entry(item_id.into())
            .or_default()
            .push(operation_id.into());
    }

    /// Operations that consume the item as an input.
    pub fn operations_consuming(&self, item_id: &str) -> &[String] {
        self.input_index
            .get(item_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ------------------------------------------------------------------
    // Structural queries
    // ------------------------------------------------------------------

    /// Whether the entity is an input to this trace: a non-part entity with
    /// no in-trace generator and no in-trace source. Parts are never inputs.
    pub fn is_input(&self, entity: &Entity) -> bool {
        if entity.is_part() {
            return false;
        }
        if !self.has_item(entity.item_id()) {
            return false;
        }
        match &entity.provenance().generator {
            Some(ActivityRef::Job(job_id)) if self.has_job(job_id) => return false,
            Some(ActivityRef::Operation(op_id)) if self.has_operation(op_id) => return false,
            _ => {}
        }
        !entity
            .provenance()
            .sources
            .iter()
            .any(|source| self.has_item(source))
    }

    /// Entities that are inputs to the plan of this trace.
    pub fn inputs(&self) -> Vec<&Entity> {
        self.items
            .values()
            .filter(|entity| self.is_input(entity))
            .collect()
    }

    // ------------------------------------------------------------------
    // Edge mutation helpers
    // ------------------------------------------------------------------

    pub fn add_source_to(&mut self, entity_id: &str, source_id: impl Into<String>) {
        if let Some(entity) = self.items.get_mut(entity_id) {
            entity.add_source(source_id);
        }
    }

    pub fn set_generator(&mut self, entity_id: &str, generator: ActivityRef) {
        if let Some(entity) = self.items.get_mut(entity_id) {
            entity.add_generator(generator);
        }
    }

    pub fn add_file_source(&mut self, file_id: FileId, entity_id: impl Into<String>) {
        let entity_id = entity_id.into();
        if let Some(file) = self.files.get_mut(&file_id) {
            debug!(file = %file_id, source = %entity_id, "adding source for file");
            file.provenance.add_source(entity_id);
        }
    }

    pub fn set_file_generator(&mut self, file_id: FileId, generator: ActivityRef) {
        if let Some(file) = self.files.get_mut(&file_id) {
            file.provenance.add_generator(generator);
        }
    }

    // ------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------

    /// Sub-trace for one generator: its files, the generating activity (and
    /// a job's constituent operations), and the files' direct sources. Used
    /// to emit per-measurement provenance next to uploaded data.
    pub fn project_from(&self, generator: &ActivityRef) -> Trace {
        let mut projected = Trace::new(self.experiment_id.clone());
        projected.attributes = self.attributes.clone();
        for plan in self.plans.values() {
            projected.add_plan(plan.clone());
        }
        match generator {
            ActivityRef::Operation(op_id) => {
                if let Some(op) = self.operations.get(op_id) {
                    projected.add_operation(op.clone());
                }
            }
            ActivityRef::Job(job_id) => {
                if let Some(job) = self.jobs.get(job_id) {
                    for op_id in &job.operation_ids {
                        if let Some(op) = self.operations.get(op_id) {
                            projected.add_operation(op.clone());
                        }
                    }
                    projected.add_job(job.clone());
                }
            }
        }
        for file in self.files_generated_by(generator) {
            for source_id in &file.provenance.sources {
                let Some(source) = self.items.get(source_id) else {
                    continue;
                };
                // a part needs its collection present for structural checks
                if let Entity::Part(part) = source {
                    if !projected.has_item(&part.collection_id) {
                        if let Some(collection) = self.items.get(&part.collection_id) {
                            projected.add_item(collection.clone());
                        }
                    }
                }
                if !projected.has_item(source_id) {
                    projected.add_item(source.clone());
                }
            }
            projected.add_file(file.clone());
        }
        projected
    }

    /// Trace-level attribute convenience used by repair rules.
    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
