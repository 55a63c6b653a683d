//! Entities: the physical and derived artifacts of a workflow execution.
//!
//! An entity carries at most one generating activity and a set of source
//! entities it was derived from. Edges are stored as IDs into the owning
//! [`crate::Trace`], never as references.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attributes::Attributes;

/// Logical biological identity of an item or part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub name: String,
}

/// Physical container class of an item or collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub id: String,
    pub name: String,
}

/// Reference to the activity that generated an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityRef {
    Operation(String),
    Job(String),
}

impl ActivityRef {
    pub fn is_job(&self) -> bool {
        matches!(self, ActivityRef::Job(_))
    }

    pub fn id(&self) -> &str {
        match self {
            ActivityRef::Operation(id) | ActivityRef::Job(id) => id,
        }
    }

    /// Path-safe identifier used to scope file names to their generator.
    pub fn activity_id(&self) -> String {
        match self {
            ActivityRef::Operation(id) => format!("op_{}", id),
            ActivityRef::Job(id) => format!("job_{}", id),
        }
    }
}

/// Generation and derivation bookkeeping shared by every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub generator: Option<ActivityRef>,
    pub sources: IndexSet<String>,
}

impl Provenance {
    pub fn add_generator(&mut self, activity: ActivityRef) {
        self.generator = Some(activity);
    }

    pub fn add_source(&mut self, entity_id: impl Into<String>) {
        self.sources.insert(entity_id.into());
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Whether this entity was generated by the given activity.
    pub fn generated_by(&self, activity: &ActivityRef) -> bool {
        self.generator.as_ref() == Some(activity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Item,
    Collection,
    Part,
    Missing,
}

/// A physical, uniquely identified labware unit carrying one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEntity {
    pub item_id: String,
    pub sample: Option<Sample>,
    pub object_type: Option<ObjectType>,
    pub attributes: Attributes,
    pub provenance: Provenance,
}

impl ItemEntity {
    pub fn new(item_id: impl Into<String>, sample: Option<Sample>, object_type: Option<ObjectType>) -> Self {
        Self {
            item_id: item_id.into(),
            sample,
            object_type,
            attributes: Attributes::new(),
            provenance: Provenance::default(),
        }
    }
}

/// A multi-well container. Carries no sample of its own; per-well contents
/// are modeled as [`PartEntity`] values registered in `part_map`, which the
/// part materializer populates lazily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntity {
    pub item_id: String,
    pub object_type: Option<ObjectType>,
    /// well label -> part item_id
    pub part_map: indexmap::IndexMap<String, String>,
    pub attributes: Attributes,
    pub provenance: Provenance,
}

impl CollectionEntity {
    pub fn new(item_id: impl Into<String>, object_type: Option<ObjectType>) -> Self {
        Self {
            item_id: item_id.into(),
            object_type,
            part_map: indexmap::IndexMap::new(),
            attributes: Attributes::new(),
            provenance: Provenance::default(),
        }
    }

    pub fn add_part(&mut self, well: impl Into<String>, part_id: impl Into<String>) {
        self.part_map.insert(well.into(), part_id.into());
    }

    pub fn part_id_for(&self, well: &str) -> Option<&String> {
        self.part_map.get(well)
    }

    pub fn has_parts(&self) -> bool {
        !self.part_map.is_empty()
    }

    pub fn part_ids(&self) -> impl Iterator<Item = &String> {
        self.part_map.values()
    }
}

/// The contents of one well of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartEntity {
    pub item_id: String,
    /// `"{collection_id}/{well}"`
    pub part_ref: String,
    pub collection_id: String,
    pub sample: Option<Sample>,
    pub object_type: Option<ObjectType>,
    pub attributes: Attributes,
    pub provenance: Provenance,
}

impl PartEntity {
    pub fn well(&self) -> &str {
        crate::plate::split_part_ref(&self.part_ref)
            .map(|(_, well)| well)
            .unwrap_or(&self.part_ref)
    }
}

/// Placeholder for an entity whose record is absent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingEntity {
    pub item_id: String,
    pub provenance: Provenance,
}

/// A provenance-graph entity. Closed set: the traversal driver switches on
/// the variant, and every visitor callback receives exactly the entities of
/// its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Item(ItemEntity),
    Collection(CollectionEntity),
    Part(PartEntity),
    Missing(MissingEntity),
}

impl Entity {
    pub fn item_id(&self) -> &str {
        match self {
            Entity::Item(e) => &e.item_id,
            Entity::Collection(e) => &e.item_id,
            Entity::Part(e) => &e.item_id,
            Entity::Missing(e) => &e.item_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Item(_) => EntityKind::Item,
            Entity::Collection(_) => EntityKind::Collection,
            Entity::Part(_) => EntityKind::Part,
            Entity::Missing(_) => EntityKind::Missing,
        }
    }

    /// Lowercase kind label used in log lines and serialized output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::Item(_) => "item",
            Entity::Collection(_) => "collection",
            Entity::Part(_) => "part",
            Entity::Missing(_) => "missing",
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, Entity::Item(_))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Entity::Collection(_))
    }

    pub fn is_part(&self) -> bool {
        matches!(self, Entity::Part(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Entity::Missing(_))
    }

    pub fn provenance(&self) -> &Provenance {
        match self {
            Entity::Item(e) => &e.provenance,
            Entity::Collection(e) => &e.provenance,
            Entity::Part(e) => &e.provenance,
            Entity::Missing(e) => &e.provenance,
        }
    }

    pub fn provenance_mut(&mut self) -> &mut Provenance {
        match self {
            Entity::Item(e) => &mut e.provenance,
            Entity::Collection(e) => &mut e.provenance,
            Entity::Part(e) => &mut e.provenance,
            Entity::Missing(e) => &mut e.provenance,
        }
    }

    pub fn add_source(&mut self, source_id: impl Into<String>) {
        let source_id = source_id.into();
        debug!(source = %source_id, target = %self.item_id(), kind = self.type_name(), "adding source");
        self.provenance_mut().add_source(source_id);
    }

    pub fn add_generator(&mut self, activity: ActivityRef) {
        self.provenance_mut().add_generator(activity);
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Entity::Item(e) => Some(&e.attributes),
            Entity::Collection(e) => Some(&e.attributes),
            Entity::Part(e) => Some(&e.attributes),
            Entity::Missing(_) => None,
        }
    }

    pub fn attributes_mut(&mut self) -> Option<&mut Attributes> {
        match self {
            Entity::Item(e) => Some(&mut e.attributes),
            Entity::Collection(e) => Some(&mut e.attributes),
            Entity::Part(e) => Some(&mut e.attributes),
            Entity::Missing(_) => None,
        }
    }

    pub fn sample(&self) -> Option<&Sample> {
        match self {
            Entity::Item(e) => e.sample.as_ref(),
            Entity::Part(e) => e.sample.as_ref(),
            _ => None,
        }
    }

    pub fn object_type(&self) -> Option<&ObjectType> {
        match self {
            Entity::Item(e) => e.object_type.as_ref(),
            Entity::Collection(e) => e.object_type.as_ref(),
            Entity::Part(e) => e.object_type.as_ref(),
            Entity::Missing(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionEntity> {
        match self {
            Entity::Collection(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut CollectionEntity> {
        match self {
            Entity::Collection(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_part(&self) -> Option<&PartEntity> {
        match self {
            Entity::Part(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_part_mut(&mut self) -> Option<&mut PartEntity> {
        match self {
            Entity::Part(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_by_distinguishes_jobs_from_operations() {
        let mut provenance = Provenance::default();
        provenance.add_generator(ActivityRef::Operation("12".to_string()));
        assert!(provenance.generated_by(&ActivityRef::Operation("12".to_string())));
        assert!(!provenance.generated_by(&ActivityRef::Job("12".to_string())));
    }

    #[test]
    fn part_well_comes_from_reference() {
        let part = PartEntity {
            item_id: "900".to_string(),
            part_ref: "412/B2".to_string(),
            collection_id: "412".to_string(),
            sample: None,
            object_type: None,
            attributes: Attributes::new(),
            provenance: Provenance::default(),
        };
        assert_eq!(part.well(), "B2");
    }

    #[test]
    fn sources_deduplicate() {
        let mut item = Entity::Item(ItemEntity::new("1", None, None));
        item.add_source("2");
        item.add_source("2");
        assert_eq!(item.provenance().sources.len(), 1);
    }
}
