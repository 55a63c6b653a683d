//! Routing capabilities: steps that infer missing derivation edges.

use labtrace_model::{coordinates_for, part_ref, well_coordinates, Entity, Trace};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::visitor::VisitCx;

fn log_source_add(trace: &Trace, source_id: &str, target_id: &str) {
    let source_kind = trace
        .get_item(source_id)
        .map(Entity::type_name)
        .unwrap_or("missing");
    let target_kind = trace
        .get_item(target_id)
        .map(Entity::type_name)
        .unwrap_or("missing");
    info!(
        source = source_id,
        source_kind,
        target = target_id,
        target_kind,
        "adding source"
    );
}

/// Same-well passthrough: if the part has no source and its collection has
/// collection-typed sources, the first upstream part at the same well wins.
pub fn passthrough_wells(cx: &mut VisitCx<'_>, part_id: &str) {
    let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
        return;
    };
    if part.provenance.has_sources() {
        return;
    }
    let well = part.well().to_string();
    let collection_id = part.collection_id.clone();
    debug!(part = part_id, well = %well, "passthrough routing");

    let Some(collection) = cx.trace.get_item(&collection_id) else {
        return;
    };
    if !collection.provenance().has_sources() {
        return;
    }
    let collection_sources: Vec<String> = collection
        .provenance()
        .sources
        .iter()
        .filter(|source| {
            cx.trace
                .get_item(source)
                .map(Entity::is_collection)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    for source_collection in collection_sources {
        match cx.trace.get_part(&source_collection, &well) {
            Some(source_part) => {
                let source_part_id = source_part.item_id().to_string();
                cx.trace.add_source_to(part_id, source_part_id.clone());
                log_source_add(cx.trace, &source_part_id, part_id);
                return;
            }
            None => debug!(
                collection = %source_collection,
                well = %well,
                part = part_id,
                "routing failed, no source at well"
            ),
        }
    }
}

/// Coordinate-remap routing: the collection carries a per-well table that
/// maps this well to an upstream well address.
pub fn transfer_coordinate_map(cx: &mut VisitCx<'_>, part_id: &str, attribute: &str) {
    let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
        return;
    };
    if part.provenance.has_sources() {
        return;
    }
    let collection_id = part.collection_id.clone();
    let Ok((row, column)) = coordinates_for(part.well()) else {
        warn!(part = part_id, "part well does not parse");
        return;
    };

    let Some(collection) = cx.trace.get_item(&collection_id) else {
        return;
    };
    let Some(source_collection) = collection.provenance().sources.first().cloned() else {
        warn!(collection = %collection_id, "collection has no sources");
        return;
    };
    let Some(target_well) = collection
        .attributes()
        .and_then(|attrs| attrs.get(attribute))
        .and_then(|table| table.get(row)?.get(column))
        .and_then(Value::as_str)
    else {
        warn!(
            collection = %collection_id,
            attribute,
            part = part_id,
            "no transfer coordinates for well"
        );
        return;
    };

    let reference = part_ref(&source_collection, target_well);
    match cx.trace.resolve_entity_id(&reference) {
        Some(source_id) => {
            cx.trace.add_source_to(part_id, source_id.clone());
            log_source_add(cx.trace, &source_id, part_id);
        }
        None => warn!(source = %reference, part = part_id, "computed source does not exist"),
    }
}

/// Inversion of a block transfer: a re-pooling operation took interleaved
/// blocks out of upstream plates; the upstream plate is identified by the
/// anchor entry of its transfer table.
pub struct InverseBlockTransfer {
    pub attribute: String,
    /// How many destination rows interleave one source row.
    pub row_interleave: usize,
    /// Width of one transferred column block.
    pub column_block: usize,
}

impl InverseBlockTransfer {
    pub fn apply(&self, cx: &mut VisitCx<'_>, part_id: &str) {
        let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
            return;
        };
        if part.provenance.has_sources() {
            return;
        }
        let Ok((row, column)) = coordinates_for(part.well()) else {
            warn!(part = part_id, "part well does not parse");
            return;
        };
        let Some(generator) = part.provenance.generator.clone() else {
            return;
        };
        let labtrace_model::ActivityRef::Operation(operation_id) = generator else {
            return;
        };

        let Ok(anchor) = well_coordinates(
            row % self.row_interleave,
            self.column_block * (column / self.column_block),
        ) else {
            return;
        };

        let Some(operation) = cx.trace.get_operation(&operation_id) else {
            return;
        };
        let mut source_collection = None;
        for argument in operation.input_items() {
            let Some(input_id) = argument.item_id() else {
                continue;
            };
            let table_anchor = cx
                .trace
                .get_item(input_id)
                .and_then(Entity::attributes)
                .and_then(|attrs| attrs.get(&self.attribute))
                .and_then(|table| table.get(0)?.get(0))
                .and_then(Value::as_str);
            if table_anchor == Some(anchor.as_str()) {
                source_collection = Some(input_id.to_string());
            }
        }
        let Some(source_collection) = source_collection else {
            warn!(part = part_id, anchor = %anchor, "no input matches transfer anchor");
            return;
        };

        let Ok(source_well) =
            well_coordinates(row / self.row_interleave, column % self.column_block)
        else {
            return;
        };
        let reference = part_ref(&source_collection, &source_well);
        match cx.trace.resolve_entity_id(&reference) {
            Some(source_id) => {
                cx.trace.add_source_to(part_id, source_id.clone());
                log_source_add(cx.trace, &source_id, part_id);
            }
            None => debug!(source = %reference, part = part_id, "source does not exist"),
        }
    }
}

/// Collection source from one named input of its generator.
pub fn collection_source_from_input(cx: &mut VisitCx<'_>, collection_id: &str, argument: &str) {
    let Some(collection) = cx.trace.get_item(collection_id) else {
        return;
    };
    if collection.provenance().has_sources() {
        return;
    }
    let Some(labtrace_model::ActivityRef::Operation(operation_id)) =
        collection.provenance().generator.clone()
    else {
        return;
    };
    let Some(operation) = cx.trace.get_operation(&operation_id) else {
        return;
    };
    let inputs = operation.named_inputs(argument);
    if inputs.len() > 1 {
        warn!(
            operation = %operation_id,
            argument,
            "multiple plate inputs to operation"
        );
    }
    match inputs.first().and_then(|arg| arg.item_id()) {
        Some(source_id) => {
            let source_id = source_id.to_string();
            cx.trace.add_source_to(collection_id, source_id.clone());
            log_source_add(cx.trace, &source_id, collection_id);
        }
        None => warn!(
            collection = collection_id,
            argument, "failed to find source for collection"
        ),
    }
}

/// Collection sources from every item input of its generator.
pub fn collection_source_from_inputs(cx: &mut VisitCx<'_>, collection_id: &str) {
    let Some(collection) = cx.trace.get_item(collection_id) else {
        return;
    };
    let Some(labtrace_model::ActivityRef::Operation(operation_id)) =
        collection.provenance().generator.clone()
    else {
        return;
    };
    let Some(operation) = cx.trace.get_operation(&operation_id) else {
        return;
    };
    let input_ids: Vec<String> = operation
        .input_items()
        .filter_map(|arg| arg.item_id().map(str::to_string))
        .collect();
    for input_id in input_ids {
        cx.trace.add_source_to(collection_id, input_id.clone());
        log_source_add(cx.trace, &input_id, collection_id);
    }
}

/// Item sources from every item input of its generator.
pub fn item_source_from_inputs(cx: &mut VisitCx<'_>, item_id: &str) {
    let Some(item) = cx.trace.get_item(item_id) else {
        return;
    };
    let Some(labtrace_model::ActivityRef::Operation(operation_id)) =
        item.provenance().generator.clone()
    else {
        return;
    };
    debug!(item = item_id, "adding generator inputs as sources");
    let Some(operation) = cx.trace.get_operation(&operation_id) else {
        return;
    };
    let input_ids: Vec<String> = operation
        .input_items()
        .filter_map(|arg| arg.item_id().map(str::to_string))
        .collect();
    for input_id in input_ids {
        cx.trace.add_source_to(item_id, input_id);
    }
}

/// Part source from the named input whose sample matches the part's; also
/// lifts the source to the collection level.
pub fn part_source_by_sample(cx: &mut VisitCx<'_>, part_id: &str, argument: &str) {
    let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
        return;
    };
    if part.provenance.has_sources() {
        return;
    }
    let part_sample = part.sample.clone();
    let collection_id = part.collection_id.clone();
    let Some(labtrace_model::ActivityRef::Operation(operation_id)) =
        part.provenance.generator.clone()
    else {
        return;
    };
    let Some(operation) = cx.trace.get_operation(&operation_id) else {
        return;
    };

    let candidate_ids: Vec<String> = operation
        .named_inputs(argument)
        .iter()
        .filter_map(|arg| arg.item_id().map(str::to_string))
        .collect();
    let mut source = None;
    for candidate_id in candidate_ids {
        let Some(part_sample) = &part_sample else {
            error!(part = part_id, "part has no sample");
            continue;
        };
        let candidate_sample = cx
            .trace
            .get_item(&candidate_id)
            .and_then(|candidate| candidate.sample().cloned());
        if candidate_sample.map(|sample| sample.id) == Some(part_sample.id) {
            source = Some(candidate_id);
        }
    }
    let Some(source_id) = source else {
        return;
    };

    cx.trace.add_source_to(part_id, source_id.clone());
    log_source_add(cx.trace, &source_id, part_id);

    // lift to the collection: a part-typed source contributes its collection
    let collection_source = cx
        .trace
        .get_item(&source_id)
        .and_then(Entity::as_part)
        .map(|part| part.collection_id.clone())
        .unwrap_or(source_id);
    cx.trace.add_source_to(&collection_id, collection_source);
}

/// Computed-index routing: the upstream plate was laid out as
/// `replicates x plates` sample wells repeated once per target value, with
/// control wells appended after the sample block.
pub struct ReplicateIndexRouting {
    /// Argument of the upstream generator holding the replicate count.
    pub replicates_argument: String,
    /// Argument of the upstream generator listing source plates.
    pub plates_argument: String,
    /// Argument of this generator holding the target-value list.
    pub target_argument: String,
    /// Key under which the target list is encoded in the argument text.
    pub target_key: String,
    /// Attribute recording the part's target value.
    pub target_attribute: String,
    /// Wells per plate row.
    pub row_width: usize,
    /// Control wells routed to a fixed upstream well.
    pub control_wells: Vec<(String, String)>,
}

impl ReplicateIndexRouting {
    fn target_list(&self, text: &str) -> Option<Vec<f64>> {
        let number = r"(?:\d+(?:\.\d*)?|\.\d+)";
        let pattern = format!(
            r#"\{{?"?{}s?"?:\{{?((\[(?:{number},)*{number}\]))\}}"#,
            regex::escape(&self.target_key),
            number = number
        );
        let regex = Regex::new(&pattern).ok()?;
        let captures = regex.captures(text)?;
        serde_json::from_str(&captures[1]).ok()
    }

    pub fn apply(&self, cx: &mut VisitCx<'_>, part_id: &str) {
        let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
            return;
        };
        let collection_id = part.collection_id.clone();
        let part_sample = part.sample.clone();
        let part_well = part.well().to_string();
        let part_generator = part.provenance.generator.clone();
        if part.provenance.has_sources() {
            return;
        }

        let Some(collection) = cx.trace.get_item(&collection_id) else {
            return;
        };
        if collection.provenance().sources.len() > 1 {
            warn!(part = part_id, "collection for part has more than one source");
            return;
        }
        let Some(collection_source_id) = collection.provenance().sources.first().cloned() else {
            return;
        };
        warn!(part = part_id, "part has no sources, computing replicate routing");

        // fixed-destination control wells first
        if let Some((_, anchor)) = self
            .control_wells
            .iter()
            .find(|(well, _)| well == &part_well)
        {
            warn!(part = part_id, well = %part_well, "part is a control well");
            match cx.trace.get_part(&collection_source_id, anchor) {
                Some(source_part) => {
                    let source_part_id = source_part.item_id().to_string();
                    warn!(
                        source = %source_part_id,
                        part = part_id,
                        "using control anchor as source"
                    );
                    cx.trace.add_source_to(part_id, source_part_id.clone());
                    log_source_add(cx.trace, &source_part_id, part_id);
                }
                None => warn!(
                    collection = %collection_source_id,
                    well = %anchor,
                    "control anchor does not exist"
                ),
            }
            return;
        }

        let Some(source_generator) = cx
            .trace
            .get_item(&collection_source_id)
            .and_then(|source| source.provenance().generator.clone())
        else {
            warn!(source = %collection_source_id, "source has no generator");
            return;
        };
        let labtrace_model::ActivityRef::Operation(source_operation_id) = source_generator else {
            return;
        };
        let Some(source_operation) = cx.trace.get_operation(&source_operation_id) else {
            return;
        };

        let replicates = source_operation
            .named_inputs(&self.replicates_argument)
            .first()
            .and_then(|arg| arg.value_str())
            .and_then(|text| text.parse::<usize>().ok());
        let plate_count = source_operation.named_inputs(&self.plates_argument).len();
        let target_text = part_generator
            .as_ref()
            .and_then(|generator| match generator {
                labtrace_model::ActivityRef::Operation(op_id) => cx.trace.get_operation(op_id),
                labtrace_model::ActivityRef::Job(_) => None,
            })
            .and_then(|op| {
                op.named_inputs(&self.target_argument)
                    .first()
                    .and_then(|arg| arg.value_str())
                    .map(str::to_string)
            });

        let (Some(replicates), Some(target_text)) = (replicates, target_text) else {
            warn!(
                source = %collection_source_id,
                "unable to compute number of parts for source"
            );
            return;
        };
        if plate_count == 0 {
            warn!(
                source = %collection_source_id,
                "unable to compute number of parts for source"
            );
            return;
        }
        let num_source_parts = replicates * plate_count;
        info!(
            plate = %collection_source_id,
            parts = num_source_parts,
            "computed sample part count"
        );

        let Ok((row, column)) = coordinates_for(&part_well) else {
            return;
        };
        let absolute = row * self.row_width + column;

        let Some(targets) = self.target_list(&target_text) else {
            warn!(part = part_id, "unable to get target values for operation");
            return;
        };

        let source_well = if absolute < num_source_parts * targets.len() {
            let source_index = absolute % num_source_parts;
            let target_index = absolute / num_source_parts;
            let has_attribute = cx
                .trace
                .get_item(part_id)
                .and_then(Entity::attributes)
                .map(|attrs| attrs.has(&self.target_attribute))
                .unwrap_or(false);
            if !has_attribute {
                if let Some(attrs) = cx.trace.get_item_mut(part_id).and_then(Entity::attributes_mut)
                {
                    debug!(
                        part = part_id,
                        value = targets[target_index],
                        "recording target value"
                    );
                    attrs.add(
                        self.target_attribute.clone(),
                        serde_json::json!(targets[target_index]),
                    );
                }
            }
            match well_coordinates(
                source_index / self.row_width,
                source_index % self.row_width,
            ) {
                Ok(well) => well,
                Err(_) => return,
            }
        } else {
            // controls are appended to the plate after the sample wells
            part_well.clone()
        };

        let reference = part_ref(&collection_source_id, &source_well);
        let Some(source_id) = cx.trace.resolve_entity_id(&reference) else {
            warn!(source = %reference, part = part_id, "computed source does not exist");
            return;
        };

        let source_sample_id = cx
            .trace
            .get_item(&source_id)
            .and_then(|source| source.sample().map(|sample| sample.id));
        if let (Some(source_sample), Some(part_sample)) = (source_sample_id, &part_sample) {
            if source_sample != part_sample.id {
                error!(
                    source = %reference,
                    source_sample,
                    part = part_id,
                    part_sample = part_sample.id,
                    "sample mismatch for computed source"
                );
                return;
            }
        }

        cx.trace.add_source_to(part_id, source_id.clone());
        log_source_add(cx.trace, &source_id, part_id);
    }
}
