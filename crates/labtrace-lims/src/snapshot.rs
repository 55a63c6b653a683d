//! Snapshot-backed LIMS client.
//!
//! A snapshot is the full record set for one (or a few) plans, serialized as
//! a single JSON document. Tests build snapshots programmatically; the CLI
//! loads one with `--snapshot` to run without upstream access.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::records::{
    CollectionRecord, FieldValueRecord, ItemRecord, JobRecord, PlanRecord, SampleRecord,
    UploadRecord,
};
use crate::{LimsClient, LimsError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub plans: Vec<PlanRecord>,
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    #[serde(default)]
    pub collections: Vec<CollectionRecord>,
    /// operation ID -> field values
    #[serde(default)]
    pub field_values: HashMap<String, Vec<FieldValueRecord>>,
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
    #[serde(default)]
    pub samples: Vec<SampleRecord>,
}

#[derive(Debug, Default)]
pub struct SnapshotClient {
    plans: HashMap<String, PlanRecord>,
    items: HashMap<String, ItemRecord>,
    collections: HashMap<String, CollectionRecord>,
    field_values: HashMap<String, Vec<FieldValueRecord>>,
    jobs: HashMap<String, JobRecord>,
    uploads: HashMap<String, UploadRecord>,
    samples: HashMap<i64, SampleRecord>,
}

impl SnapshotClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut client = Self::new();
        for plan in snapshot.plans {
            client.add_plan(plan);
        }
        for item in snapshot.items {
            client.add_item(item);
        }
        for collection in snapshot.collections {
            client.add_collection(collection);
        }
        for (operation_id, values) in snapshot.field_values {
            client.add_field_values(operation_id, values);
        }
        for job in snapshot.jobs {
            client.add_job(job);
        }
        for upload in snapshot.uploads {
            client.add_upload(upload);
        }
        for sample in snapshot.samples {
            client.add_sample(sample);
        }
        client
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LimsError> {
        let text = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "loaded LIMS snapshot");
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn add_plan(&mut self, plan: PlanRecord) {
        self.plans.insert(plan.id.clone(), plan);
    }

    pub fn add_item(&mut self, item: ItemRecord) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn add_collection(&mut self, collection: CollectionRecord) {
        // collections answer find_item too, sample-less by construction
        self.items.entry(collection.id.clone()).or_insert(ItemRecord {
            id: collection.id.clone(),
            sample: None,
            object_type: collection.object_type.clone(),
            associations: collection.associations.clone(),
        });
        self.collections.insert(collection.id.clone(), collection);
    }

    pub fn add_field_values(&mut self, operation_id: impl Into<String>, values: Vec<FieldValueRecord>) {
        self.field_values.insert(operation_id.into(), values);
    }

    pub fn add_job(&mut self, job: JobRecord) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn add_upload(&mut self, upload: UploadRecord) {
        self.uploads.insert(upload.id.clone(), upload);
    }

    pub fn add_sample(&mut self, sample: SampleRecord) {
        self.samples.insert(sample.id, sample);
    }
}

impl LimsClient for SnapshotClient {
    fn find_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, LimsError> {
        Ok(self.plans.get(plan_id).cloned())
    }

    fn find_item(&self, item_id: &str) -> Result<Option<ItemRecord>, LimsError> {
        Ok(self.items.get(item_id).cloned())
    }

    fn find_collection(&self, item_id: &str) -> Result<Option<CollectionRecord>, LimsError> {
        Ok(self.collections.get(item_id).cloned())
    }

    fn find_operation_inputs(
        &self,
        operation_id: &str,
    ) -> Result<Option<Vec<FieldValueRecord>>, LimsError> {
        Ok(self.field_values.get(operation_id).cloned())
    }

    fn find_job(&self, job_id: &str) -> Result<Option<JobRecord>, LimsError> {
        Ok(self.jobs.get(job_id).cloned())
    }

    fn find_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>, LimsError> {
        Ok(self.uploads.get(upload_id).cloned())
    }

    fn find_sample(&self, sample_id: i64) -> Result<Option<SampleRecord>, LimsError> {
        Ok(self.samples.get(&sample_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snapshot = Snapshot::default();
        snapshot.samples.push(SampleRecord {
            id: 11,
            name: "strain-a".to_string(),
        });
        snapshot.uploads.push(UploadRecord {
            id: "3".to_string(),
            name: "od.csv".to_string(),
            size: Some(512),
            job_id: "9".to_string(),
            check_sum: None,
        });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&snapshot).unwrap()).unwrap();

        let client = SnapshotClient::from_json_file(file.path()).unwrap();
        assert_eq!(client.find_sample(11).unwrap().unwrap().name, "strain-a");
        assert_eq!(client.find_upload("3").unwrap().unwrap().size, Some(512));
        assert!(client.find_upload("4").unwrap().is_none());
    }

    #[test]
    fn collections_answer_find_item_without_sample() {
        let mut client = SnapshotClient::new();
        client.add_collection(CollectionRecord {
            id: "77".to_string(),
            object_type: None,
            sample_matrix: vec![],
            part_associations: vec![],
            associations: vec![],
        });
        let item = client.find_item("77").unwrap().unwrap();
        assert!(item.is_collection());
        assert!(client.find_collection("77").unwrap().is_some());
    }
}
