//! Heuristic repair rules.
//!
//! A rule is scoped to one or more operation-type names and is a no-op for
//! entities whose generator does not match. Rather than a hierarchy of rule
//! classes, a [`ProtocolRule`] is an ordered pipeline of independent
//! capability steps ([`RuleStep`]) invoked in sequence at each matching
//! traversal point. The biology lives in the step payloads (argument names,
//! lookup tables, layout constants), never in the engine.
//!
//! Every step follows the same failure contract: absence of expected
//! structure or an ambiguous match is logged and the step declines to act;
//! a malformed source-reference string is logged and treated as unresolved.
//! Steps never raise.

pub mod attrs;
pub mod measurement;
pub mod routing;

use std::sync::OnceLock;

use labtrace_model::{ActivityRef, Entity, FileId, Trace};
use regex::Regex;
use tracing::warn;

use crate::visitor::{TraceVisitor, VisitCx};

pub use attrs::{MediaLookup, SourceLocatorDetail};
pub use measurement::{CalibrationPlate, MeasurementTag};
pub use routing::{InverseBlockTransfer, ReplicateIndexRouting};

/// One capability of a protocol rule.
pub enum RuleStep {
    /// Same-well routing through the collection's collection-typed sources.
    PassthroughWells,
    /// Per-well remap table attached to the collection as an attribute.
    TransferCoordinateMap { attribute: String },
    /// Anchor-keyed inversion of a block transfer map.
    InverseBlockTransfer(InverseBlockTransfer),
    /// Collection source from one named input of its generator.
    CollectionSourceFromInput { argument: String },
    /// Collection sources from every item input of its generator.
    CollectionSourceFromInputs,
    /// Item sources from every item input of its generator.
    ItemSourceFromInputs,
    /// Part source from the named input whose sample matches the part's.
    PartSourceBySample { argument: String },
    /// Computed-index routing from replicate and plate counts.
    ReplicateIndexRouting(ReplicateIndexRouting),
    /// Measurement tagging plus file-generator resolution with job fallback.
    MeasurementTag(MeasurementTag),
    /// Measurement file sourced from the generator's named plate input.
    FileSourceFromInput { argument: String },
    /// Files referenced by upload-valued attributes of the collection's source.
    FileSourceFromAttribute { keys: Vec<String> },
    /// File located by name prefix from a collection attribute.
    TimeseriesFileSource { attribute: String },
    /// Calibration-plate resurrection from a plan-level upload filename.
    CalibrationPlate(CalibrationPlate),
    /// Promote a file's sole source's generator to the file.
    FileGeneratorFromSoleSource { standard: Option<String> },
    /// Attach the job's design-document upload to the operation.
    DesignDocumentFromJobUpload { attribute: String },
    /// Media parameter to sample-id attribute, via a data table.
    MediaLookup(MediaLookup),
    /// Copy a named attribute from a single unambiguous source.
    CopyAttributeFromSource { key: String },
    /// Expand `*_mat` collection attributes to per-part attributes.
    PartAttributesFromMatrices,
    /// Per-part source locator (plate and colony) from routing metadata.
    SourceLocatorDetail(SourceLocatorDetail),
}

/// A protocol-scoped pipeline of repair capabilities.
pub struct ProtocolRule {
    operation_names: Vec<String>,
    steps: Vec<RuleStep>,
}

impl ProtocolRule {
    pub fn new<I, S>(operation_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation_names: operation_names.into_iter().map(Into::into).collect(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: RuleStep) -> Self {
        self.steps.push(step);
        self
    }

    fn names(&self) -> &[String] {
        &self.operation_names
    }
}

/// The operation generating the entity, provided it is present and its type
/// name is in `names`; job generators never match.
pub(crate) fn matching_operation_id(
    trace: &Trace,
    generator: Option<&ActivityRef>,
    names: &[String],
) -> Option<String> {
    match generator {
        Some(ActivityRef::Operation(op_id)) => trace
            .get_operation(op_id)
            .filter(|op| names.iter().any(|name| name == op.type_name()))
            .map(|op| op.operation_id.clone()),
        _ => None,
    }
}

/// Numeric item ID embedded in an upload filename (`...item_412_...`).
pub(crate) fn embedded_item_id(filename: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"item(_|)([0-9]+)_").expect("static regex"));
    pattern
        .captures(filename)
        .map(|caps| caps[2].to_string())
}

impl TraceVisitor for ProtocolRule {
    fn visit_plan(&mut self, cx: &mut VisitCx<'_>, plan_id: &str) {
        for step in &mut self.steps {
            if let RuleStep::CalibrationPlate(calibration) = step {
                calibration.visit_plan(cx, plan_id);
            }
        }
    }

    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        let names = self.operation_names.clone();
        let matches = cx
            .trace
            .get_operation(operation_id)
            .map(|op| names.iter().any(|name| name == op.type_name()))
            .unwrap_or(false);
        for step in &mut self.steps {
            match step {
                RuleStep::MeasurementTag(tag) if matches => tag.visit_operation(cx, operation_id),
                RuleStep::CalibrationPlate(calibration) if matches => {
                    calibration.visit_operation(cx, operation_id)
                }
                RuleStep::DesignDocumentFromJobUpload { attribute } if matches => {
                    measurement::design_document_from_job_upload(cx, operation_id, attribute)
                }
                _ => {}
            }
        }
    }

    fn visit_item(&mut self, cx: &mut VisitCx<'_>, item_id: &str) {
        let generator = cx
            .trace
            .get_item(item_id)
            .and_then(|item| item.provenance().generator.clone());
        let Some(_) = matching_operation_id(cx.trace, generator.as_ref(), self.names()) else {
            return;
        };
        for step in &mut self.steps {
            match step {
                RuleStep::ItemSourceFromInputs => routing::item_source_from_inputs(cx, item_id),
                RuleStep::MediaLookup(lookup) => lookup.apply(cx, item_id),
                RuleStep::CopyAttributeFromSource { key } => {
                    attrs::copy_attribute_from_source(cx, item_id, key)
                }
                _ => {}
            }
        }
    }

    fn visit_collection(&mut self, cx: &mut VisitCx<'_>, collection_id: &str) {
        let generator = cx
            .trace
            .get_item(collection_id)
            .and_then(|collection| collection.provenance().generator.clone());
        if matching_operation_id(cx.trace, generator.as_ref(), self.names()).is_none() {
            return;
        }
        for step in &mut self.steps {
            match step {
                RuleStep::CollectionSourceFromInput { argument } => {
                    routing::collection_source_from_input(cx, collection_id, argument)
                }
                RuleStep::CollectionSourceFromInputs => {
                    routing::collection_source_from_inputs(cx, collection_id)
                }
                RuleStep::FileSourceFromAttribute { keys } => {
                    measurement::file_source_from_attribute(cx, collection_id, keys)
                }
                RuleStep::TimeseriesFileSource { attribute } => {
                    measurement::timeseries_file_source(cx, collection_id, attribute)
                }
                _ => {}
            }
        }
    }

    fn visit_part(&mut self, cx: &mut VisitCx<'_>, part_id: &str) {
        // parts inherit their generator context from the collection before
        // any rule-specific work
        let Some(part) = cx.trace.get_item(part_id).and_then(Entity::as_part) else {
            return;
        };
        if part.provenance.generator.is_none() {
            let collection_id = part.collection_id.clone();
            let collection_generator = cx
                .trace
                .get_item(&collection_id)
                .and_then(|collection| collection.provenance().generator.clone());
            match collection_generator {
                Some(generator) => cx.trace.set_generator(part_id, generator),
                None => {
                    warn!(
                        collection = %collection_id,
                        part = part_id,
                        "no generator, cannot fix sources"
                    );
                    return;
                }
            }
        }

        let generator = cx
            .trace
            .get_item(part_id)
            .and_then(|part| part.provenance().generator.clone());
        if matching_operation_id(cx.trace, generator.as_ref(), self.names()).is_none() {
            return;
        }
        for step in &mut self.steps {
            match step {
                RuleStep::PassthroughWells => routing::passthrough_wells(cx, part_id),
                RuleStep::TransferCoordinateMap { attribute } => {
                    routing::transfer_coordinate_map(cx, part_id, attribute)
                }
                RuleStep::InverseBlockTransfer(inverse) => inverse.apply(cx, part_id),
                RuleStep::PartSourceBySample { argument } => {
                    routing::part_source_by_sample(cx, part_id, argument)
                }
                RuleStep::ReplicateIndexRouting(replicate) => replicate.apply(cx, part_id),
                RuleStep::MediaLookup(lookup) => lookup.apply(cx, part_id),
                RuleStep::CopyAttributeFromSource { key } => {
                    attrs::copy_attribute_from_source(cx, part_id, key)
                }
                RuleStep::PartAttributesFromMatrices => {
                    attrs::part_attributes_from_matrices(cx, part_id)
                }
                RuleStep::SourceLocatorDetail(locator) => locator.apply(cx, part_id),
                _ => {}
            }
        }
    }

    fn visit_file(&mut self, cx: &mut VisitCx<'_>, file_id: FileId) {
        let names = self.operation_names.clone();
        for step in &mut self.steps {
            match step {
                RuleStep::MeasurementTag(tag) => tag.visit_file(cx, file_id, &names),
                RuleStep::FileSourceFromInput { argument } => {
                    measurement::file_source_from_input(cx, file_id, &names, argument)
                }
                RuleStep::CalibrationPlate(calibration) => {
                    calibration.visit_file(cx, file_id, &names)
                }
                RuleStep::FileGeneratorFromSoleSource { standard } => {
                    measurement::file_generator_from_sole_source(
                        cx,
                        file_id,
                        &names,
                        standard.as_deref(),
                    )
                }
                _ => {}
            }
        }
    }
}
