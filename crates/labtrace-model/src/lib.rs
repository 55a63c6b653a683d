//! Provenance graph model for laboratory workflow traces.
//!
//! Follows the PROV data model (<https://www.w3.org/TR/prov-dm/>), which
//! describes provenance in terms of entities and the activities that
//! generate and consume them. The mapping onto LIMS records is deliberately
//! loose: an item has a sample and an object type, a collection has an
//! object type but no sample, and a part of a collection has a sample but
//! usually no object type of its own.
//!
//! Graph elements live in a [`Trace`] arena keyed by string ID; derivation
//! and generation edges are IDs rather than references, so repair passes can
//! mutate one element while reading others.

pub mod activity;
pub mod attributes;
pub mod entity;
pub mod file;
pub mod plate;
pub mod trace;

pub use activity::{
    JobActivity, OperationActivity, OperationArgument, OperationType, PlanActivity,
};
pub use attributes::Attributes;
pub use entity::{
    ActivityRef, CollectionEntity, Entity, EntityKind, ItemEntity, MissingEntity, ObjectType,
    PartEntity, Provenance, Sample,
};
pub use file::{FileEntity, FileId, FileIdAllocator, FileOrigin, FileType};
pub use plate::{
    coordinates_for, normalize_well, parse_source_ref, part_ref, split_part_ref, well_coordinates,
    PlateError, SourceRef,
};
pub use trace::Trace;
