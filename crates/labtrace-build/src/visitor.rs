//! Traversal framework for trace passes.
//!
//! A visitor exposes one callback per graph-element kind; the driver applies
//! it over the whole trace in a fixed order: trace, plans, operations, jobs,
//! items, collections, parts, files. Collections before parts is deliberate:
//! part-level rules read state the collection-level rules must have set
//! first. Within a category, visitation follows insertion order.
//!
//! There is no short-circuit. Every visitor observes every element of its
//! kind and self-filters, usually on the generating operation's type name.

use labtrace_lims::records::{AssociationRecord, CollectionRecord, JobAssociationRecord};
use labtrace_model::{EntityKind, FileId, Sample, Trace};

/// What a repair pass may ask of the graph-building factory. Rules hold this
/// capability rather than the factory itself, which bounds what a rule can
/// mutate to on-demand entity materialization and record reads.
pub trait EntityResolver {
    /// Resolve or create the entity for an item or collection ID. Returns
    /// the entity ID, or `None` when the record is absent upstream.
    fn resolve_item(&mut self, trace: &mut Trace, item_id: &str) -> Option<String>;

    /// Resolve or create the part of a collection at a well. Falls back to a
    /// reference-identified part when the LIMS has no first-class part
    /// registered at that address.
    fn resolve_part(&mut self, trace: &mut Trace, collection_id: &str, well: &str)
        -> Option<String>;

    /// Resolve or create the file entity for an upload. `None` when the
    /// upload is unknown or its owning job falls outside the plan.
    fn resolve_file(&mut self, trace: &mut Trace, upload_id: &str) -> Option<FileId>;

    /// File entity for an artifact hosted outside the LIMS. `None` only for
    /// reference-only resolvers.
    fn external_file(&mut self, trace: &mut Trace, name: &str) -> Option<FileId>;

    /// Resolve or create the job activity, restricted to operations present
    /// in the plan. `None` when no plan operation belongs to the job.
    fn resolve_job(&mut self, trace: &mut Trace, job_id: &str) -> Option<String>;

    /// Memoized sample lookup. Non-positive IDs denote empty wells.
    fn find_sample(&mut self, sample_id: i64) -> Option<Sample>;

    /// Cached raw record for a collection already seen during the build.
    fn collection_record(&mut self, collection_id: &str) -> Option<CollectionRecord>;

    /// Cached job associations of an operation (completion candidates).
    fn job_candidates(&self, operation_id: &str) -> Vec<JobAssociationRecord>;

    /// Cached raw associations of a plan record.
    fn plan_associations(&self, plan_id: &str) -> Vec<AssociationRecord>;

    /// Cached raw associations of an operation record.
    fn operation_associations(&self, operation_id: &str) -> Vec<AssociationRecord>;

    /// Cached raw associations of an item, collection, or part record.
    fn item_associations(&self, item_id: &str) -> Vec<AssociationRecord>;

    /// Upload IDs recorded on a job.
    fn job_uploads(&self, job_id: &str) -> Vec<String>;
}

/// Resolver that materializes nothing. Used by passes that only read the
/// trace, such as the consistency checker.
#[derive(Debug, Default)]
pub struct NullResolver;

impl EntityResolver for NullResolver {
    fn resolve_item(&mut self, _trace: &mut Trace, _item_id: &str) -> Option<String> {
        None
    }

    fn resolve_part(
        &mut self,
        _trace: &mut Trace,
        _collection_id: &str,
        _well: &str,
    ) -> Option<String> {
        None
    }

    fn resolve_file(&mut self, _trace: &mut Trace, _upload_id: &str) -> Option<FileId> {
        None
    }

    fn external_file(&mut self, _trace: &mut Trace, _name: &str) -> Option<FileId> {
        None
    }

    fn resolve_job(&mut self, _trace: &mut Trace, _job_id: &str) -> Option<String> {
        None
    }

    fn find_sample(&mut self, _sample_id: i64) -> Option<Sample> {
        None
    }

    fn collection_record(&mut self, _collection_id: &str) -> Option<CollectionRecord> {
        None
    }

    fn job_candidates(&self, _operation_id: &str) -> Vec<JobAssociationRecord> {
        Vec::new()
    }

    fn plan_associations(&self, _plan_id: &str) -> Vec<AssociationRecord> {
        Vec::new()
    }

    fn operation_associations(&self, _operation_id: &str) -> Vec<AssociationRecord> {
        Vec::new()
    }

    fn item_associations(&self, _item_id: &str) -> Vec<AssociationRecord> {
        Vec::new()
    }

    fn job_uploads(&self, _job_id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Mutable context handed to every visitor callback.
pub struct VisitCx<'a> {
    pub trace: &'a mut Trace,
    pub resolver: &'a mut dyn EntityResolver,
}

#[allow(unused_variables)]
pub trait TraceVisitor {
    fn visit_trace(&mut self, cx: &mut VisitCx<'_>) {}

    fn visit_plan(&mut self, cx: &mut VisitCx<'_>, plan_id: &str) {}

    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {}

    fn visit_job(&mut self, cx: &mut VisitCx<'_>, job_id: &str) {}

    fn visit_item(&mut self, cx: &mut VisitCx<'_>, item_id: &str) {}

    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {}

    fn visit_part(&mut self, cx: &mut VisitCx<'_>, part_id: &str) {}

    fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId) {}
}

/// Composite visitor: dispatches the same element to every child, in
/// registration order, before the driver moves to the next element.
#[derive(Default)]
pub struct BatchVisitor {
    visitors: Vec<Box<dyn TraceVisitor>>,
}

impl BatchVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_visitor(&mut self, visitor: Box<dyn TraceVisitor>) {
        self.visitors.push(visitor);
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }
}

impl TraceVisitor for BatchVisitor {
    fn visit_trace(&mut self, cx: &mut VisitCx<'_>) {
        for visitor in &mut self.visitors {
            visitor.visit_trace(cx);
        }
    }

    fn visit_plan(&mut self, cx: &mut VisitCx<'_>, plan_id: &str) {
        for visitor in &mut self.visitors {
            visitor.visit_plan(cx, plan_id);
        }
    }

    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        for visitor in &mut self.visitors {
            visitor.visit_operation(cx, operation_id);
        }
    }

    fn visit_job(&mut self, cx: &mut VisitCx<'_>, job_id: &str) {
        for visitor in &mut self.visitors {
            visitor.visit_job(cx, job_id);
        }
    }

    fn visit_item(&mut self, cx: &mut VisitCx<'_>, item_id: &str) {
        for visitor in &mut self.visitors {
            visitor.visit_item(cx, item_id);
        }
    }

    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {
        for visitor in &mut self.visitors {
            visitor.visit_collection(cx, collection_id);
        }
    }

    fn visit_part(&mut self, cx: &mut VisitCx<'_>, part_id: &str) {
        for visitor in &mut self.visitors {
            visitor.visit_part(cx, part_id);
        }
    }

    fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId) {
        for visitor in &mut self.visitors {
            visitor.visit_file(cx, file_id);
        }
    }
}

/// Drive one visitor over the whole trace in the fixed pass order.
///
/// Each category's ID list is snapshotted immediately before iterating it,
/// so an element materialized while visiting collections is still seen by
/// the later parts loop. Elements added to an already-visited category are
/// picked up by the next pass.
pub fn apply_visitor(
    trace: &mut Trace,
    resolver: &mut dyn EntityResolver,
    visitor: &mut dyn TraceVisitor,
) {
    let mut cx = VisitCx { trace, resolver };
    visitor.visit_trace(&mut cx);
    for plan_id in cx.trace.plan_ids() {
        visitor.visit_plan(&mut cx, &plan_id);
    }
    for operation_id in cx.trace.operation_ids() {
        visitor.visit_operation(&mut cx, &operation_id);
    }
    for job_id in cx.trace.job_ids() {
        visitor.visit_job(&mut cx, &job_id);
    }
    for item_id in cx.trace.item_ids_of_kind(EntityKind::Item) {
        visitor.visit_item(&mut cx, &item_id);
    }
    for collection_id in cx.trace.item_ids_of_kind(EntityKind::Collection) {
        visitor.visit_collection(&mut cx, &collection_id);
    }
    for part_id in cx.trace.item_ids_of_kind(EntityKind::Part) {
        visitor.visit_part(&mut cx, &part_id);
    }
    for file_id in cx.trace.file_ids() {
        visitor.visit_file(&mut cx, file_id);
    }
}
