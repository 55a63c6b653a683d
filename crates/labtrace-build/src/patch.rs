//! Structural patch pass: protocol-independent fixes applied after the rule
//! battery.

use labtrace_model::{Entity, FileId};
use tracing::{debug, error, info};

use crate::rules::embedded_item_id;
use crate::visitor::{BatchVisitor, TraceVisitor, VisitCx};

/// The ordered patch battery: notice logging, file source pruning,
/// collection-source inference from parts, file name prefixing.
pub fn create_patch_visitor() -> BatchVisitor {
    let mut visitor = BatchVisitor::new();
    visitor.add_visitor(Box::new(FixNoticeVisitor));
    visitor.add_visitor(Box::new(FileSourcePruningVisitor));
    visitor.add_visitor(Box::new(CollectionSourceInferenceVisitor));
    visitor.add_visitor(Box::new(FilePrefixVisitor));
    visitor
}

struct FixNoticeVisitor;

impl TraceVisitor for FixNoticeVisitor {
    fn visit_plan(&mut self, _cx: &mut VisitCx<'_>, plan_id: &str) {
        info!(plan = plan_id, "applying heuristic fixes to plan");
    }
}

/// Replaces a file's sources with the single item whose ID is embedded in
/// the filename. A file should have exactly one source, but associations
/// routinely capture more than one.
pub struct FileSourcePruningVisitor;

impl TraceVisitor for FileSourcePruningVisitor {
    fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId) {
        let Some(file) = cx.trace.get_file(file_id) else {
            return;
        };
        if !file.provenance.has_sources() {
            return;
        }
        let Some(named_id) = embedded_item_id(&file.name) else {
            return;
        };
        if !file.provenance.sources.contains(&named_id) {
            error!(
                item = %named_id,
                filename = %file.name,
                sources = ?file.provenance.sources,
                file = %file_id,
                "item id from filename not in sources for file"
            );
        }
        if !cx.trace.has_item(&named_id) {
            error!(item = %named_id, "item named in filename does not exist in trace");
            return;
        }
        if let Some(file) = cx.trace.get_file_mut(file_id) {
            file.provenance.sources.retain(|source| source == &named_id);
            if file.provenance.sources.is_empty() {
                file.provenance.add_source(named_id);
            }
        }
    }
}

/// A collection with no sources of its own inherits the deduplicated
/// collection-level sources implied by its parts.
pub struct CollectionSourceInferenceVisitor;

impl TraceVisitor for CollectionSourceInferenceVisitor {
    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {
        let Some(collection) = cx.trace.get_item(collection_id).and_then(Entity::as_collection)
        else {
            return;
        };
        if collection.provenance.has_sources() {
            return;
        }
        if !collection.has_parts() {
            debug!(collection = collection_id, "collection has no parts");
            return;
        }
        debug!(collection = collection_id, "inferring collection sources from parts");

        let part_ids: Vec<String> = collection.part_ids().cloned().collect();
        let mut inferred: Vec<String> = Vec::new();
        for part_id in part_ids {
            let Some(part) = cx.trace.get_item(&part_id) else {
                continue;
            };
            for source_id in &part.provenance().sources {
                // a part-typed source contributes its collection
                let collection_level = match cx.trace.get_item(source_id) {
                    Some(Entity::Part(source_part)) => source_part.collection_id.clone(),
                    _ => source_id.clone(),
                };
                if !inferred.contains(&collection_level) {
                    inferred.push(collection_level);
                }
            }
        }
        if inferred.is_empty() {
            debug!(collection = collection_id, "no sources added for collection");
            return;
        }
        for source_id in inferred {
            info!(
                source = %source_id,
                collection = collection_id,
                "using part routing to add collection source"
            );
            cx.trace.add_source_to(collection_id, source_id);
        }
    }
}

/// Prefixes a file's display name with its upload ID to avoid collisions
/// when files sharing a base name land in one destination directory (e.g.
/// per-well instrument readings all named `A01.fcs`).
pub struct FilePrefixVisitor;

impl TraceVisitor for FilePrefixVisitor {
    fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId) {
        let Some(file) = cx.trace.get_file_mut(file_id) else {
            return;
        };
        let Some(upload_id) = file.upload_id().map(str::to_string) else {
            debug!(file = %file_id, "file is external, not changing name");
            return;
        };
        debug!(file = %file_id, name = %file.name, "prefixing file name");
        file.name = format!("{}-{}", upload_id, file.name);
    }
}
