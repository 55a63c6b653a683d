//! Consistency checker: reports structural violations, repairs nothing.
//!
//! The checker walks the completed trace and logs every gap it finds:
//! missing generators, dangling source references, orphaned parts, files
//! with zero or multiple sources. The result is a single aggregate boolean;
//! the log stream is the report.

use std::collections::HashSet;

use labtrace_model::{ActivityRef, Entity, FileId, Trace};
use tracing::warn;

use crate::visitor::{apply_visitor, NullResolver, TraceVisitor, VisitCx};

/// `stop_list` is the set of entity IDs considered legitimate, unexplained
/// workflow inputs. Returns true when no violation was found.
pub fn check_trace<I, S>(trace: &mut Trace, stop_list: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut checker = CheckVisitor::new(stop_list);
    let mut resolver = NullResolver;
    apply_visitor(trace, &mut resolver, &mut checker);
    checker.passed()
}

pub struct CheckVisitor {
    stop_list: HashSet<String>,
    no_error: bool,
}

impl CheckVisitor {
    pub fn new<I, S>(stop_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stop_list: stop_list.into_iter().map(Into::into).collect(),
            no_error: true,
        }
    }

    pub fn passed(&self) -> bool {
        self.no_error
    }

    fn check_generator(&mut self, trace: &Trace, kind: &str, entity_id: &str, generator: &ActivityRef) {
        match generator {
            ActivityRef::Job(job_id) => {
                match trace.get_job(job_id) {
                    None => {
                        warn!(
                            job = %job_id,
                            kind,
                            entity = entity_id,
                            "job is a generator but is not in trace"
                        );
                        self.no_error = false;
                    }
                    Some(job) => {
                        for operation_id in &job.operation_ids {
                            if !trace.has_operation(operation_id) {
                                warn!(
                                    operation = %operation_id,
                                    job = %job_id,
                                    kind,
                                    entity = entity_id,
                                    "operation of generator job is not in trace"
                                );
                                self.no_error = false;
                            }
                        }
                    }
                }
            }
            ActivityRef::Operation(operation_id) => {
                if !trace.has_operation(operation_id) {
                    warn!(
                        operation = %operation_id,
                        kind,
                        entity = entity_id,
                        "operation is a generator but is not in trace"
                    );
                    self.no_error = false;
                }
            }
        }
    }

    fn check_sources(&mut self, trace: &Trace, kind: &str, entity_id: &str) {
        let Some(entity) = trace.get_item(entity_id) else {
            return;
        };
        for source_id in &entity.provenance().sources {
            if !trace.has_item(source_id) {
                warn!(
                    source = %source_id,
                    kind,
                    entity = entity_id,
                    "source is not in trace"
                );
                self.no_error = false;
            }
        }
    }
}

impl TraceVisitor for CheckVisitor {
    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        let Some(operation) = cx.trace.get_operation(operation_id) else {
            return;
        };
        let missing: Vec<String> = operation
            .input_items()
            .filter_map(|arg| arg.item_id())
            .filter(|item_id| !cx.trace.has_item(item_id))
            .map(str::to_string)
            .collect();
        for item_id in missing {
            warn!(
                item = %item_id,
                operation = operation_id,
                "argument of operation is not in the trace"
            );
            self.no_error = false;
        }
    }

    fn visit_item(&mut self, cx: &mut VisitCx<'_>, item_id: &str) {
        if self.stop_list.contains(item_id) {
            return;
        }
        let Some(item) = cx.trace.get_item(item_id) else {
            return;
        };
        if item.sample().is_none() {
            warn!(item = item_id, "item has no sample");
            self.no_error = false;
        }
        if !item.provenance().has_sources() {
            warn!(item = item_id, "item has no sources");
            self.no_error = false;
        }
        match item.provenance().generator.clone() {
            None => {
                warn!(item = item_id, "item has no generator");
                self.no_error = false;
            }
            Some(generator) => self.check_generator(cx.trace, "item", item_id, &generator),
        }
        self.check_sources(cx.trace, "item", item_id);
    }

    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {
        if self.stop_list.contains(collection_id) {
            return;
        }
        let Some(collection) = cx.trace.get_item(collection_id).and_then(Entity::as_collection)
        else {
            return;
        };
        let dangling: Vec<String> = collection
            .part_ids()
            .filter(|part_id| !cx.trace.has_item(part_id))
            .cloned()
            .collect();
        for part_id in dangling {
            warn!(part = %part_id, "part not in trace");
            self.no_error = false;
        }
        if !collection.provenance.has_sources() {
            warn!(collection = collection_id, "collection has no sources");
            self.no_error = false;
        }
        match collection.provenance.generator.clone() {
            None => {
                warn!(collection = collection_id, "collection has no generator");
                self.no_error = false;
            }
            Some(generator) => {
                self.check_generator(cx.trace, "collection", collection_id, &generator)
            }
        }
        self.check_sources(cx.trace, "collection", collection_id);
    }

    fn visit_part(&mut self, cx: &mut VisitCx<'_>, part_id: &str) {
        if self.stop_list.contains(part_id) {
            return;
        }
        let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
            return;
        };
        if part.sample.is_none() {
            warn!(part = part_id, "part has no sample");
            self.no_error = false;
        }

        let collection_id = part.collection_id.clone();
        let collection_generator = cx
            .trace
            .get_item(&collection_id)
            .and_then(|collection| collection.provenance().generator.clone());
        match part.provenance.generator.clone() {
            None => {
                // a part without a generator is only a gap when its
                // collection has one to inherit
                if collection_generator.is_some() {
                    warn!(part = part_id, "part has no generator");
                    self.no_error = false;
                }
            }
            Some(generator) => self.check_generator(cx.trace, "part", part_id, &generator),
        }

        if !part.provenance.has_sources() {
            if !cx.trace.has_item(&collection_id) {
                warn!(
                    part = part_id,
                    collection = %collection_id,
                    "part has collection not in trace"
                );
                self.no_error = false;
            }
            let collection_has_sources = cx
                .trace
                .get_item(&collection_id)
                .map(|collection| collection.provenance().has_sources())
                .unwrap_or(false);
            if collection_has_sources {
                // heuristic, not a hard law: a part can legitimately lack
                // sourcing detail its collection has
                warn!(
                    part = part_id,
                    collection = %collection_id,
                    "part has no sources, but collection does"
                );
                self.no_error = false;
            }
        }
        self.check_sources(cx.trace, "part", part_id);
    }

    fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId) {
        let Some(file) = cx.trace.get_file(file_id) else {
            return;
        };
        if file.is_external() {
            return;
        }
        match file.provenance.sources.len() {
            0 => {
                warn!(file = %file_id, name = %file.name, "file has no sources");
                self.no_error = false;
            }
            1 => {}
            n => {
                // a pruning opportunity; reported, never auto-repaired here
                warn!(file = %file_id, name = %file.name, sources = n, "file has multiple sources");
                self.no_error = false;
            }
        }
        let dangling: Vec<String> = file
            .provenance
            .sources
            .iter()
            .filter(|source_id| !cx.trace.has_item(source_id))
            .cloned()
            .collect();
        for source_id in dangling {
            warn!(source = %source_id, file = %file_id, "file source is not in trace");
            self.no_error = false;
        }
        match cx
            .trace
            .get_file(file_id)
            .and_then(|file| file.provenance.generator.clone())
        {
            None => {
                warn!(file = %file_id, "file has no generator");
                self.no_error = false;
            }
            Some(generator) => {
                let name = format!("file {}", file_id);
                self.check_generator(cx.trace, "file", &name, &generator);
            }
        }
    }
}
