//! LIMS collaborator boundary.
//!
//! The upstream laboratory information management system is a read-only
//! remote data source with find-by-id semantics. This crate defines the raw
//! record shapes the graph builder consumes, the [`LimsClient`] trait the
//! upstream client must present, and a [`SnapshotClient`] backed by a single
//! serialized record set (used by tests and the CLI's offline mode).
//!
//! A missing record is `Ok(None)`, not an error: the builder treats absent
//! upstream records as a logged, recoverable condition. `Err` is reserved
//! for transport and decode failures.

pub mod records;
pub mod snapshot;

use thiserror::Error;

pub use records::{
    AssociationRecord, CollectionRecord, FieldRole, FieldValueRecord, ItemRecord,
    JobAssociationRecord, JobRecord, ObjectTypeRecord, OperationRecord, OperationTypeRecord,
    PartAssociationRecord, PlanRecord, SampleRecord, UploadRecord,
};
pub use snapshot::{Snapshot, SnapshotClient};

#[derive(Debug, Error)]
pub enum LimsError {
    #[error("transport failure talking to the LIMS: {0}")]
    Transport(String),
    #[error("failed to decode LIMS record: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Synchronous find-by-id interface of the upstream LIMS.
pub trait LimsClient {
    fn find_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, LimsError>;

    fn find_item(&self, item_id: &str) -> Result<Option<ItemRecord>, LimsError>;

    fn find_collection(&self, item_id: &str) -> Result<Option<CollectionRecord>, LimsError>;

    /// Field values (inputs, outputs, parameters) of one operation.
    fn find_operation_inputs(
        &self,
        operation_id: &str,
    ) -> Result<Option<Vec<FieldValueRecord>>, LimsError>;

    fn find_job(&self, job_id: &str) -> Result<Option<JobRecord>, LimsError>;

    fn find_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>, LimsError>;

    fn find_sample(&self, sample_id: i64) -> Result<Option<SampleRecord>, LimsError>;
}
