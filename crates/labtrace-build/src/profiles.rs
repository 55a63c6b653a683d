//! Built-in protocol profiles.
//!
//! The repair engine is generic; everything protocol-specific lives here as
//! data: operation-type names, argument names, media tables, instrument
//! metadata, and layout constants. Rules are registered in the order
//! attributes are produced and consumed — media lookups run before the
//! rules that copy `media` downstream, growth protocols before measurement
//! protocols.

use serde_json::json;

use crate::rules::{
    CalibrationPlate, InverseBlockTransfer, MeasurementTag, MediaLookup, ProtocolRule,
    ReplicateIndexRouting, RuleStep, SourceLocatorDetail,
};
use crate::visitor::{BatchVisitor, TraceVisitor, VisitCx};

/// Challenge-problem tag selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeProblem {
    YeastGates,
    NovelChassis,
    ProteinDesign,
}

impl ChallengeProblem {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "yg" => Some(Self::YeastGates),
            "nc" => Some(Self::NovelChassis),
            "ps" => Some(Self::ProteinDesign),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::YeastGates => "YEAST_GATES",
            Self::NovelChassis => "NOVEL_CHASSIS",
            Self::ProteinDesign => "PROTEIN_DESIGN",
        }
    }

    fn experiment_reference(&self) -> Option<&'static str> {
        match self {
            Self::YeastGates => Some("Yeast-Gates"),
            Self::NovelChassis => Some("NovelChassis-NAND-Gate"),
            Self::ProteinDesign => None,
        }
    }
}

/// Tags the plan with the lab name and challenge-problem attributes the
/// downstream consumers expect.
pub struct PlanTagVisitor {
    lab_name: String,
    challenge_problem: Option<ChallengeProblem>,
}

impl PlanTagVisitor {
    pub fn new(lab_name: impl Into<String>, challenge_problem: Option<ChallengeProblem>) -> Self {
        Self {
            lab_name: lab_name.into(),
            challenge_problem,
        }
    }
}

impl TraceVisitor for PlanTagVisitor {
    fn visit_plan(&mut self, cx: &mut VisitCx<'_>, plan_id: &str) {
        let Some(plan) = cx.trace.get_plan_mut(plan_id) else {
            return;
        };
        plan.attributes.add("lab", json!(self.lab_name));
        let Some(challenge_problem) = self.challenge_problem else {
            return;
        };
        if !plan.attributes.has("challenge_problem") {
            tracing::warn!(plan = plan_id, "adding challenge_problem plan attribute");
            plan.attributes
                .add("challenge_problem", json!(challenge_problem.label()));
        }
        if !plan.attributes.has("experiment_reference") {
            if let Some(reference) = challenge_problem.experiment_reference() {
                tracing::warn!(plan = plan_id, "adding experiment_reference plan attribute");
                plan.attributes.add("experiment_reference", json!(reference));
            }
        }
    }
}

const INSTRUMENT_BASE: &str = "agave://data-sd2e-community/biofab/instruments";
const CYTOMETER_CONFIG: &str = "accuri/5539/10202018/cytometer_configuration.json";
const PLATE_READER_CONFIG: &str = "synergy_ht/216503/03132018/platereader_configuration.json";
const CYTOMETER_CHANNELS: [&str; 4] = ["FL1-A", "FL4-A", "FSC-A", "SSC-A"];

fn flow_measurement() -> serde_json::Value {
    json!({
        "measurement_type": "FLOW",
        "instrument_configuration": format!("{}/{}", INSTRUMENT_BASE, CYTOMETER_CONFIG),
        "channels": CYTOMETER_CHANNELS,
    })
}

fn plate_reader_measurement() -> serde_json::Value {
    json!({
        "measurement_type": "PLATE_READER",
        "instrument_configuration": format!("{}/{}", INSTRUMENT_BASE, PLATE_READER_CONFIG),
    })
}

fn media_table() -> Vec<(&'static str, &'static str)> {
    vec![
        ("YPAD", "11767"),
        ("Synthetic_Complete", "11769"),
        ("SC", "11769"),
        ("SC_Sorbitol", "22798"),
        ("SC_Glycerol_EtOH", "22799"),
    ]
}

/// The standard rule battery. Ordering matters: rules that set attributes
/// precede rules that read them.
pub fn standard_battery() -> BatchVisitor {
    let mut battery = BatchVisitor::new();

    // growth protocols first; they establish sources and media attributes
    battery.add_visitor(Box::new(
        ProtocolRule::new(["Yeast Mating"]).with_step(RuleStep::ItemSourceFromInputs),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["Yeast Overnight Suspension"]).with_step(RuleStep::MediaLookup(
            MediaLookup::new("Type of Media", media_table()),
        )),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["2. Resuspension and Outgrowth"])
            .with_step(RuleStep::PartSourceBySample {
                argument: "Yeast Plate".to_string(),
            })
            .with_step(RuleStep::SourceLocatorDetail(SourceLocatorDetail::new(
                "Yeast Plate",
                "source_colony",
            )))
            .with_step(RuleStep::MediaLookup(MediaLookup::new(
                "Type of Media",
                media_table(),
            )))
            .with_step(RuleStep::FileGeneratorFromSoleSource {
                standard: Some("IGEM_protocol".to_string()),
            }),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["3. Synchronize by OD"])
            .with_step(RuleStep::MeasurementTag(MeasurementTag::new(
                plate_reader_measurement(),
            )))
            .with_step(RuleStep::MediaLookup(MediaLookup::new(
                "Type of Media",
                media_table(),
            )))
            .with_step(RuleStep::ReplicateIndexRouting(ReplicateIndexRouting {
                replicates_argument: "Biological Replicates".to_string(),
                plates_argument: "Yeast Plate".to_string(),
                target_argument: "Final OD".to_string(),
                target_key: "final_OD".to_string(),
                target_attribute: "od600".to_string(),
                row_width: 12,
                control_wells: vec![
                    ("H7".to_string(), "A1".to_string()),
                    ("H8".to_string(), "A1".to_string()),
                ],
            }))
            .with_step(RuleStep::CopyAttributeFromSource {
                key: "media".to_string(),
            }),
    ));

    // measurement protocols read what the growth protocols established
    battery.add_visitor(Box::new(
        ProtocolRule::new(["4. Measure OD and GFP"])
            .with_step(RuleStep::MeasurementTag(MeasurementTag::new(
                plate_reader_measurement(),
            )))
            .with_step(RuleStep::PassthroughWells)
            .with_step(RuleStep::FileSourceFromAttribute {
                keys: vec!["16hr_od".to_string(), "16hr_gfp".to_string()],
            })
            .with_step(RuleStep::CopyAttributeFromSource {
                key: "media".to_string(),
            }),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["Plate Reader Measurement"])
            .with_step(RuleStep::MeasurementTag(MeasurementTag::new(
                plate_reader_measurement(),
            )))
            .with_step(RuleStep::CalibrationPlate(CalibrationPlate::new(
                "Calibration_CAL_",
                "Type of Measurement(s)",
            )))
            .with_step(RuleStep::CollectionSourceFromInput {
                argument: "96 Deep Well Plate".to_string(),
            })
            .with_step(RuleStep::PassthroughWells),
    ));

    // chassis protocols: explicit transfer geometry
    battery.add_visitor(Box::new(
        ProtocolRule::new(["NC_Inoculation & Media"])
            .with_step(RuleStep::DesignDocumentFromJobUpload {
                attribute: "experimental_design_document".to_string(),
            })
            .with_step(RuleStep::PartAttributesFromMatrices),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["NC_Large_Volume_Induction"])
            .with_step(RuleStep::CollectionSourceFromInput {
                argument: "96 Well Plate in".to_string(),
            })
            .with_step(RuleStep::TransferCoordinateMap {
                attribute: "deep_well_transfer_coords".to_string(),
            })
            .with_step(RuleStep::PartAttributesFromMatrices),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["NC_Sampling"])
            .with_step(RuleStep::CollectionSourceFromInputs)
            .with_step(RuleStep::InverseBlockTransfer(InverseBlockTransfer {
                attribute: "deep_well_transfer_coords".to_string(),
                row_interleave: 2,
                column_block: 6,
            }))
            .with_step(RuleStep::PartAttributesFromMatrices),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["NC_Recovery"])
            .with_step(RuleStep::CollectionSourceFromInput {
                argument: "96 Deep Well Plate in".to_string(),
            })
            .with_step(RuleStep::PassthroughWells)
            .with_step(RuleStep::PartAttributesFromMatrices),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["NC_Plate_Reader_Induction"])
            .with_step(RuleStep::CollectionSourceFromInput {
                argument: "96 Deep Well plate".to_string(),
            })
            .with_step(RuleStep::PassthroughWells)
            .with_step(RuleStep::TimeseriesFileSource {
                attribute: "timeseries_filename".to_string(),
            })
            .with_step(RuleStep::PartAttributesFromMatrices),
    ));

    // cytometry last; file generators depend on job wiring above
    battery.add_visitor(Box::new(
        ProtocolRule::new(["Flow Cytometry 96 well", "Flow Cytometry 96 well (old)"])
            .with_step(RuleStep::MeasurementTag(
                MeasurementTag::new(flow_measurement())
                    .with_job_allocation()
                    .with_bead_argument("calibration beads"),
            ))
            .with_step(RuleStep::FileSourceFromInput {
                argument: "96 well plate".to_string(),
            }),
    ));
    battery.add_visitor(Box::new(
        ProtocolRule::new(["Cytometer Bead Calibration"]).with_step(RuleStep::MeasurementTag(
            MeasurementTag::new(flow_measurement())
                .with_job_allocation()
                .with_bead_argument("calibration beads"),
        )),
    ));

    battery
}

/// The full profile for one run: plan tagging plus the standard battery.
pub fn profile_for(
    lab_name: impl Into<String>,
    challenge_problem: Option<ChallengeProblem>,
) -> BatchVisitor {
    let mut profile = BatchVisitor::new();
    profile.add_visitor(Box::new(PlanTagVisitor::new(lab_name, challenge_problem)));
    profile.add_visitor(Box::new(standard_battery()));
    profile
}
