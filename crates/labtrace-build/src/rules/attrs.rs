//! Attribute capabilities: steps that derive or propagate attributes.

use labtrace_model::{coordinates_for, Entity};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::visitor::VisitCx;

/// Media parameter to sample-id attribute, via a data table. The caller has
/// already checked the generator match.
pub struct MediaLookup {
    /// Generator argument naming the media type.
    pub argument: String,
    /// media name -> sample ID
    pub table: Vec<(String, String)>,
}

impl MediaLookup {
    pub fn new(argument: impl Into<String>, table: Vec<(&str, &str)>) -> Self {
        Self {
            argument: argument.into(),
            table: table
                .into_iter()
                .map(|(name, sample_id)| (name.to_string(), sample_id.to_string()))
                .collect(),
        }
    }

    pub fn apply(&self, cx: &mut VisitCx<'_>, entity_id: &str) {
        let Some(entity) = cx.trace.get_item(entity_id) else {
            return;
        };
        let Some(labtrace_model::ActivityRef::Operation(operation_id)) =
            entity.provenance().generator.clone()
        else {
            return;
        };
        let Some(operation) = cx.trace.get_operation(&operation_id) else {
            return;
        };
        let Some(media) = operation
            .named_inputs(&self.argument)
            .first()
            .and_then(|arg| arg.value_str())
            .map(str::to_string)
        else {
            debug!(operation = %operation_id, "operation has no media argument");
            return;
        };
        let Some((_, sample_id)) = self.table.iter().find(|(name, _)| name == &media) else {
            error!(media = %media, "media type not recognized");
            return;
        };
        debug!(media = %sample_id, entity = entity_id, "adding media attribute");
        if let Some(attrs) = cx.trace.get_item_mut(entity_id).and_then(Entity::attributes_mut) {
            attrs.add("media", json!({ "sample_id": sample_id }));
        }
    }
}

/// Copy a named attribute from a single unambiguous source to the entity,
/// if not already present. First source carrying the key wins.
pub fn copy_attribute_from_source(cx: &mut VisitCx<'_>, entity_id: &str, key: &str) {
    let Some(entity) = cx.trace.get_item(entity_id) else {
        return;
    };
    if entity
        .attributes()
        .map(|attrs| attrs.has(key))
        .unwrap_or(true)
    {
        return;
    }
    if !entity.provenance().has_sources() {
        return;
    }
    let sources: Vec<String> = entity.provenance().sources.iter().cloned().collect();
    for source_id in sources {
        let value = cx
            .trace
            .get_item(&source_id)
            .and_then(Entity::attributes)
            .and_then(|attrs| attrs.get(key))
            .cloned();
        if let Some(value) = value {
            debug!(key, entity = entity_id, source = %source_id, "copying attribute");
            if let Some(attrs) = cx.trace.get_item_mut(entity_id).and_then(Entity::attributes_mut)
            {
                attrs.add(key, value);
            }
            return;
        }
    }
}

/// Expand collection attributes named `*_mat` into per-part attributes:
/// the part at (row, column) gets the matrix entry under the un-suffixed
/// key.
pub fn part_attributes_from_matrices(cx: &mut VisitCx<'_>, part_id: &str) {
    let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
        return;
    };
    let collection_id = part.collection_id.clone();
    let Ok((row, column)) = coordinates_for(part.well()) else {
        return;
    };
    let Some(collection) = cx.trace.get_item(&collection_id) else {
        return;
    };
    let Some(attributes) = collection.attributes() else {
        return;
    };
    let mut derived: Vec<(String, Value)> = Vec::new();
    for (key, value) in attributes.iter() {
        let Some(part_key) = key.strip_suffix("_mat") else {
            continue;
        };
        let Some(rows) = value.as_array() else {
            continue;
        };
        if !rows.iter().all(Value::is_array) {
            continue;
        }
        if let Some(entry) = value.get(row).and_then(|cells| cells.get(column)) {
            if !entry.is_null() {
                derived.push((part_key.to_string(), entry.clone()));
            }
        }
    }
    if derived.is_empty() {
        return;
    }
    if let Some(attrs) = cx.trace.get_item_mut(part_id).and_then(Entity::attributes_mut) {
        for (key, value) in derived {
            debug!(key = %key, part = part_id, "adding matrix attribute to part");
            attrs.add(key, value);
        }
    }
}

/// Per-part source locator (plate and colony index), recovered from one of
/// three places protocols have recorded it: the part's `source` attribute
/// list, a legacy `source_reference` string, or the source item's
/// `destination` attribute.
pub struct SourceLocatorDetail {
    /// Prefix a legacy `source_reference` must carry to be trusted.
    pub reference_prefix: String,
    /// Attribute written onto the part.
    pub attribute: String,
}

impl SourceLocatorDetail {
    pub fn new(reference_prefix: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            reference_prefix: reference_prefix.into(),
            attribute: attribute.into(),
        }
    }

    pub fn apply(&self, cx: &mut VisitCx<'_>, part_id: &str) {
        debug!(part = part_id, "searching for source locator");
        let Some(locator) = self.find_locator(cx, part_id) else {
            return;
        };
        if let Some(attrs) = cx.trace.get_item_mut(part_id).and_then(Entity::attributes_mut) {
            attrs.add(self.attribute.clone(), locator);
        }
    }

    fn find_locator(&self, cx: &mut VisitCx<'_>, part_id: &str) -> Option<Value> {
        let part = cx.trace.get_item(part_id).and_then(Entity::as_part)?;
        let collection_id = part.collection_id.clone();
        let coordinates = coordinates_for(part.well()).ok();
        let source_list = part.attributes.get("source").and_then(Value::as_array).cloned();
        let reference = part
            .attributes
            .get("source_reference")
            .and_then(Value::as_str)
            .map(str::to_string);
        let sources: Vec<String> = part.provenance.sources.iter().cloned().collect();

        // newest protocols: the source attribute list carries the colony
        if let Some(source_list) = source_list {
            let with_colony: Vec<&Value> = source_list
                .iter()
                .filter(|entry| entry.get("source_colony").is_some())
                .collect();
            return match with_colony.as_slice() {
                [entry] => Some(json!({
                    "plate": entry.get("id").cloned().unwrap_or(Value::Null),
                    "colony": entry.get("source_colony").cloned().unwrap_or(Value::Null),
                })),
                [] => None,
                many => {
                    error!(part = part_id, count = many.len(), "part has several source colonies");
                    None
                }
            };
        }

        // older protocols: a typed source_reference string
        if let Some(reference) = reference {
            if reference.starts_with(&self.reference_prefix) {
                let components: Vec<&str> = reference.split('/').collect();
                if components.len() != 4 {
                    return None;
                }
                return Some(json!({
                    "plate": components[1],
                    "colony": components[3].get(1..).unwrap_or_default(),
                }));
            }
        }
        debug!(part = part_id, "part has no source reference");

        // fall back to the source item's destination table
        if sources.len() != 1 {
            debug!(part = part_id, "part does not have exactly one source");
            return None;
        }
        let source_id = sources.into_iter().next().unwrap_or_default();
        let (row, column) = coordinates?;
        let Some(destinations) = cx
            .trace
            .get_item(&source_id)
            .and_then(Entity::attributes)
            .and_then(|attrs| attrs.get("destination"))
            .and_then(Value::as_array)
        else {
            debug!(source = %source_id, part = part_id, "source has no destination attribute");
            return None;
        };
        let matches: Vec<&Value> = destinations
            .iter()
            .filter(|entry| {
                let id_matches = entry
                    .get("id")
                    .map(|id| match id {
                        Value::String(s) => s == &collection_id,
                        other => other.to_string() == collection_id,
                    })
                    .unwrap_or(false);
                id_matches
                    && entry.get("row").and_then(Value::as_u64) == Some(row as u64)
                    && entry.get("column").and_then(Value::as_u64) == Some(column as u64)
            })
            .collect();
        match matches.as_slice() {
            [entry] => Some(json!({
                "plate": source_id,
                "colony": entry.get("source_colony").cloned().unwrap_or(Value::Null),
            })),
            [] => None,
            _ => {
                error!(part = part_id, "more than one destination matches part");
                None
            }
        }
    }
}
