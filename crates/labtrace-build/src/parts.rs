//! Part materializer: expands collections into per-well part entities.
//!
//! Four evidence sources, merged by well address: lab-declared part
//! registrations, the per-well sample matrix, the routing matrix (under one
//! of several known attribute keys, a compatibility surface for schema
//! drift), and the per-well upload matrix. A previously assigned sample is
//! never overwritten; disagreeing evidence is logged and its source edge
//! dropped.

use labtrace_model::{
    coordinates_for, parse_source_ref, part_ref, well_coordinates, Attributes, Entity, Sample,
    SourceRef, Trace,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::visitor::{TraceVisitor, VisitCx};

pub struct PartMaterializer;

impl PartMaterializer {
    pub fn new() -> Self {
        Self
    }

    fn collect_declared_parts(&self, cx: &mut VisitCx<'_>, collection_id: &str) {
        let Some(record) = cx.resolver.collection_record(collection_id) else {
            return;
        };
        for association in &record.part_associations {
            debug!(part = %association.part_id, "declared part");
            if cx.trace.has_item(&association.part_id) {
                continue;
            }
            if association.collection_id != collection_id {
                error!(
                    collection = collection_id,
                    association = %association.collection_id,
                    "collection does not match part association"
                );
                continue;
            }
            let well = match well_coordinates(association.row, association.column) {
                Ok(well) => well,
                Err(err) => {
                    warn!(part = %association.part_id, %err, "bad declared part address");
                    continue;
                }
            };
            cx.resolver.resolve_part(cx.trace, collection_id, &well);
        }
    }

    fn parts_from_samples(
        &self,
        cx: &mut VisitCx<'_>,
        collection_id: &str,
        generator: &Option<labtrace_model::ActivityRef>,
    ) {
        let Some(record) = cx.resolver.collection_record(collection_id) else {
            return;
        };
        for (row, cells) in record.sample_matrix.iter().enumerate() {
            for (column, cell) in cells.iter().enumerate() {
                let Some(sample_id) = cell.filter(|id| *id > 0) else {
                    continue;
                };
                let Some(sample) = cx.resolver.find_sample(sample_id) else {
                    continue;
                };
                let Ok(well) = well_coordinates(row, column) else {
                    warn!(collection = collection_id, row, "sample matrix exceeds plate geometry");
                    continue;
                };
                let Some(part_id) = cx.resolver.resolve_part(cx.trace, collection_id, &well)
                else {
                    continue;
                };
                inherit_generator(cx.trace, &part_id, generator);
                assign_sample(cx.trace, &part_id, &sample);
            }
        }
    }

    fn parts_from_routing(
        &self,
        cx: &mut VisitCx<'_>,
        collection_id: &str,
        generator: &Option<labtrace_model::ActivityRef>,
        matrix: &Value,
    ) {
        let Some(rows) = matrix.as_array() else {
            return;
        };
        for (row, cells) in rows.iter().enumerate() {
            let Some(cells) = cells.as_array() else {
                continue;
            };
            for (column, entry) in cells.iter().enumerate() {
                if !entry.is_object() {
                    continue;
                }
                let Some(source_id) = routing_source_id(entry) else {
                    continue;
                };
                let Ok(well) = well_coordinates(row, column) else {
                    continue;
                };
                let Some(part_id) = cx.resolver.resolve_part(cx.trace, collection_id, &well)
                else {
                    continue;
                };
                inherit_generator(cx.trace, &part_id, generator);

                match self.resolve_source(cx, &source_id) {
                    Some(source_entity_id) => {
                        let source = cx.trace.get_item(&source_entity_id);
                        let source_sample = source.and_then(|s| s.sample().cloned());
                        let source_is_item = source.map(Entity::is_item).unwrap_or(false);
                        if let Some(source_sample) = source_sample {
                            let part_sample =
                                cx.trace.get_item(&part_id).and_then(|p| p.sample().cloned());
                            match part_sample {
                                None => assign_sample(cx.trace, &part_id, &source_sample),
                                Some(existing) if existing.id != source_sample.id => {
                                    error!(
                                        source = %source_id,
                                        source_sample = source_sample.id,
                                        part = %part_id,
                                        part_sample = existing.id,
                                        "source sample does not match part sample"
                                    );
                                    continue;
                                }
                                Some(_) => {}
                            }
                        }
                        cx.trace.add_source_to(&part_id, source_entity_id.clone());
                        if source_is_item {
                            debug!(source = %source_entity_id, "routing source is a plain item");
                            if let Some(attrs) =
                                cx.trace.get_item_mut(&part_id).and_then(Entity::attributes_mut)
                            {
                                attrs.add("source_reference", Value::String(source_id.clone()));
                            }
                        }
                    }
                    None => {
                        debug!(source = %source_id, part = %part_id, "routing source not found"
                        );
                    }
                }

                if let Some(attributes) = entry.get("attributes") {
                    if let Some(attrs) =
                        cx.trace.get_item_mut(&part_id).and_then(Entity::attributes_mut)
                    {
                        attrs.extend_from(attributes);
                    }
                }
            }
        }
    }

    fn parts_from_uploads(
        &self,
        cx: &mut VisitCx<'_>,
        collection_id: &str,
        generator: &Option<labtrace_model::ActivityRef>,
        matrix: &Value,
    ) {
        let Some(rows) = matrix.as_array() else {
            return;
        };
        for (row, cells) in rows.iter().enumerate() {
            let Some(cells) = cells.as_array() else {
                continue;
            };
            for (column, cell) in cells.iter().enumerate() {
                let Some(upload_id) = cell.as_i64().filter(|id| *id > 0) else {
                    continue;
                };
                let Ok(well) = well_coordinates(row, column) else {
                    continue;
                };
                let Some(part_id) = cx.resolver.resolve_part(cx.trace, collection_id, &well)
                else {
                    continue;
                };
                inherit_generator(cx.trace, &part_id, generator);
                debug!(part = %part_id, upload = upload_id, "part has upload");
                if let Some(file_id) = cx.resolver.resolve_file(cx.trace, &upload_id.to_string())
                {
                    cx.trace.add_file_source(file_id, part_id);
                }
            }
        }
    }

    /// Resolve a routing source reference to an entity, materializing the
    /// upstream collection's part on demand. A part resolved this way gets
    /// its sample backfilled from the upstream sample matrix.
    fn resolve_source(&self, cx: &mut VisitCx<'_>, source_id: &str) -> Option<String> {
        debug!(source = source_id, "resolving routing source");
        if let Some(resolved) = cx.trace.resolve_entity_id(source_id) {
            return Some(resolved);
        }
        match parse_source_ref(source_id) {
            Err(err) => {
                warn!(source = source_id, %err, "unrecognized source reference");
                None
            }
            Ok(SourceRef::Item { item_id }) => cx.resolver.resolve_item(cx.trace, &item_id),
            Ok(SourceRef::Part { item_id, well }) => {
                let collection_id = cx.resolver.resolve_item(cx.trace, &item_id)?;
                if !cx.trace.get_item(&collection_id)?.is_collection() {
                    info!(
                        source = source_id,
                        item = %collection_id,
                        "ignoring well of non-collection source"
                    );
                    return Some(collection_id);
                }
                let part_id = cx.resolver.resolve_part(cx.trace, &collection_id, &well)?;
                if cx.trace.get_item(&part_id)?.sample().is_none() {
                    if let Ok((row, column)) = coordinates_for(&well) {
                        let sample_id = cx
                            .resolver
                            .collection_record(&collection_id)
                            .and_then(|record| {
                                record.sample_matrix.get(row)?.get(column).copied().flatten()
                            });
                        if let Some(sample) =
                            sample_id.and_then(|id| cx.resolver.find_sample(id))
                        {
                            assign_sample(cx.trace, &part_id, &sample);
                        }
                    }
                }
                Some(part_id)
            }
        }
    }
}

impl Default for PartMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceVisitor for PartMaterializer {
    /// Materialize the parts of a collection. Idempotent: a collection that
    /// already has parts is left alone.
    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {
        let Some(collection) = cx.trace.get_item(collection_id).and_then(Entity::as_collection)
        else {
            return;
        };
        if collection.has_parts() {
            return;
        }
        debug!(collection = collection_id, "materializing parts");
        let generator = collection.provenance.generator.clone();
        let routing_matrix = routing_matrix_of(&collection.attributes);
        let upload_matrix = upload_matrix_of(&collection.attributes);

        self.collect_declared_parts(cx, collection_id);
        self.parts_from_samples(cx, collection_id, &generator);
        if let Some(matrix) = routing_matrix {
            self.parts_from_routing(cx, collection_id, &generator, &matrix);
        }
        if let Some(matrix) = upload_matrix {
            self.parts_from_uploads(cx, collection_id, &generator, &matrix);
        }
    }

    /// Resolve the per-part `source` attribute list left by newer protocols.
    fn visit_part(&mut self, cx: &mut VisitCx<'_>, part_id: &str) {
        let Some(part) = cx.trace.get_item(part_id) else {
            return;
        };
        if part.provenance().has_sources() {
            return;
        }
        let Some(source_list) = part
            .attributes()
            .and_then(|attrs| attrs.get("source"))
            .and_then(Value::as_array)
            .cloned()
        else {
            return;
        };
        debug!(part = part_id, "adding sources from part source attribute");
        for entry in &source_list {
            let Some(source_id) = entry.get("id").map(value_to_id) else {
                continue;
            };
            let resolved = match (entry.get("row").and_then(Value::as_u64), entry.get("column").and_then(Value::as_u64)) {
                (Some(row), Some(column)) => well_coordinates(row as usize, column as usize)
                    .ok()
                    .map(|well| part_ref(&source_id, &well))
                    .and_then(|reference| cx.trace.resolve_entity_id(&reference)),
                _ => cx.resolver.resolve_item(cx.trace, &source_id),
            };
            match resolved {
                Some(source_entity_id) => cx.trace.add_source_to(part_id, source_entity_id),
                None => debug!(part = part_id, source = %source_id, "part source not found"),
            }
        }
    }
}

fn inherit_generator(
    trace: &mut Trace,
    part_id: &str,
    generator: &Option<labtrace_model::ActivityRef>,
) {
    let Some(generator) = generator else {
        return;
    };
    if let Some(part) = trace.get_item_mut(part_id) {
        if part.provenance().generator.is_none() {
            part.add_generator(generator.clone());
        }
    }
}

fn assign_sample(trace: &mut Trace, part_id: &str, sample: &Sample) {
    if let Some(Entity::Part(part)) = trace.get_item_mut(part_id) {
        if part.sample.is_none() {
            debug!(sample = sample.id, part = part_id, "assigning sample to part");
            part.sample = Some(sample.clone());
        }
    }
}

fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The routing source of one routing-matrix entry: either a list of
/// `{id, ...}` objects (first wins) or a bare reference.
fn routing_source_id(entry: &Value) -> Option<String> {
    let source = entry.get("source")?;
    let id = match source {
        Value::Array(list) => value_to_id(list.first()?.get("id")?),
        other => value_to_id(other),
    };
    if id.is_empty() {
        return None;
    }
    Some(id)
}

/// The routing matrix may sit under one of several attribute keys; older
/// protocols nested the rows one level down.
fn routing_matrix_of(attributes: &Attributes) -> Option<Value> {
    if let Some(value) = attributes.get("routing_matrix") {
        return value.get("rows").cloned();
    }
    if let Some(value) = attributes.get("routing_dilution_matrix") {
        return value.get("rows").cloned();
    }
    attributes.get("part_data").cloned()
}

/// Number of wells per row in the legacy flat upload-list encoding.
const LEGACY_ROW_WIDTH: usize = 12;

fn upload_matrix_of(attributes: &Attributes) -> Option<Value> {
    if let Some(value) = attributes.get("SAMPLE_UPLOADS") {
        return value.get("upload_matrix").cloned();
    }
    let uploads = attributes.get("sample_uploads")?.as_array()?;
    let mut sorted: Vec<&Value> = uploads.iter().collect();
    sorted.sort_by_key(|upload| {
        upload
            .get("upload_file_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    });
    let ids: Vec<Value> = sorted
        .iter()
        .filter_map(|upload| upload.get("id").cloned())
        .collect();
    let rows: Vec<Value> = ids
        .chunks(LEGACY_ROW_WIDTH)
        .map(|chunk| Value::Array(chunk.to_vec()))
        .collect();
    Some(Value::Array(rows))
}
