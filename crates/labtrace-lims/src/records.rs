//! Raw record shapes exposed by the LIMS.
//!
//! These mirror what the upstream system serves, not what the graph model
//! wants: linkage metadata is incomplete and inconsistent by construction,
//! and the graph builder is responsible for making sense of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTypeRecord {
    pub id: String,
    pub category: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeRecord {
    pub id: String,
    pub name: String,
}

/// A data association attached to a plan, operation, item, collection, or
/// part. Either an explicit upload reference or an arbitrary JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

/// Column set of an upload row; some protocols associate the raw upload row
/// as a plain object instead of an upload reference.
const UPLOAD_OBJECT_KEYS: [&str; 8] = [
    "created_at",
    "id",
    "job_id",
    "updated_at",
    "upload_content_type",
    "upload_file_name",
    "upload_file_size",
    "upload_updated_at",
];

impl AssociationRecord {
    pub fn object(key: impl Into<String>, object: Value) -> Self {
        Self {
            key: key.into(),
            upload_id: None,
            object: Some(object),
        }
    }

    pub fn upload(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: Some(upload_id.into()),
            object: None,
        }
    }

    pub fn is_upload_shaped(&self) -> bool {
        let Some(Value::Object(map)) = &self.object else {
            return false;
        };
        map.len() == UPLOAD_OBJECT_KEYS.len()
            && UPLOAD_OBJECT_KEYS.iter().all(|key| map.contains_key(*key))
    }

    /// The upload this association points at, whether declared explicitly or
    /// smuggled in as an upload-shaped object.
    pub fn upload_reference(&self) -> Option<String> {
        if let Some(upload_id) = &self.upload_id {
            return Some(upload_id.clone());
        }
        if self.is_upload_shaped() {
            let id = self.object.as_ref()?.get("id")?;
            return Some(match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        None
    }

    /// Non-upload object payload, for attribute attachment.
    pub fn attribute_object(&self) -> Option<&Value> {
        if self.upload_id.is_some() || self.is_upload_shaped() {
            return None;
        }
        self.object.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    Input,
    Output,
}

/// One field value of an operation: a parameter value or an item reference,
/// optionally addressed to a single well and optionally tagged with a
/// routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValueRecord {
    pub id: String,
    pub name: String,
    pub role: FieldRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAssociationRecord {
    pub job_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub operation_type: OperationTypeRecord,
    #[serde(default)]
    pub job_associations: Vec<JobAssociationRecord>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub operations: Vec<OperationRecord>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectTypeRecord>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord>,
}

impl ItemRecord {
    /// The LIMS does not type containers explicitly; an item without a
    /// sample is a collection and must be re-fetched as one.
    pub fn is_collection(&self) -> bool {
        self.sample.is_none()
    }
}

/// Lab-declared registration of a part inside a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartAssociationRecord {
    pub part_id: String,
    pub collection_id: String,
    pub row: usize,
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectTypeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectTypeRecord>,
    /// Per-well sample IDs; entries that are absent or non-positive mean an
    /// empty well.
    #[serde(default)]
    pub sample_matrix: Vec<Vec<Option<i64>>>,
    #[serde(default)]
    pub part_associations: Vec<PartAssociationRecord>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operation_ids: Vec<String>,
    #[serde(default)]
    pub upload_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_sum: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_reference_from_explicit_association() {
        let assoc = AssociationRecord::upload("reading", "42");
        assert_eq!(assoc.upload_reference(), Some("42".to_string()));
        assert!(assoc.attribute_object().is_none());
    }

    #[test]
    fn upload_reference_from_upload_shaped_object() {
        let assoc = AssociationRecord::object(
            "reading",
            json!({
                "created_at": "2018-10-20T00:00:00Z",
                "id": 42,
                "job_id": 7,
                "updated_at": "2018-10-20T00:00:00Z",
                "upload_content_type": "text/csv",
                "upload_file_name": "od.csv",
                "upload_file_size": 1024,
                "upload_updated_at": "2018-10-20T00:00:00Z"
            }),
        );
        assert_eq!(assoc.upload_reference(), Some("42".to_string()));
        assert!(assoc.attribute_object().is_none());
    }

    #[test]
    fn plain_objects_stay_attributes() {
        let assoc = AssociationRecord::object("media", json!({"media": "synthetic"}));
        assert_eq!(assoc.upload_reference(), None);
        assert!(assoc.attribute_object().is_some());
    }

    #[test]
    fn items_without_samples_are_collections() {
        let collection = ItemRecord {
            id: "9".to_string(),
            sample: None,
            object_type: None,
            associations: vec![],
        };
        assert!(collection.is_collection());
    }
}
