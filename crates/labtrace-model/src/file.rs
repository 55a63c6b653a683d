//! File entities: artifacts uploaded to the LIMS, plus externally hosted
//! files referenced by a trace.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entity::Provenance;

/// Identifier issued by a [`FileIdAllocator`]. Scoped to one graph build so
/// independent builds never share counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues [`FileId`]s for one factory build.
#[derive(Debug, Default)]
pub struct FileIdAllocator {
    next: u32,
}

impl FileIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> FileId {
        let id = FileId(self.next);
        self.next += 1;
        id
    }
}

/// Classification inferred from the filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Tabular,
    FlowCytometry,
    Xml,
}

impl FileType {
    /// Wire label used in serialized output.
    pub fn label(&self) -> &'static str {
        match self {
            FileType::Tabular => "CSV",
            FileType::FlowCytometry => "FCS",
            FileType::Xml => "XML",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileOrigin {
    /// Hosted by the LIMS; the owning job must be present in the trace.
    Upload {
        upload_id: String,
        size: Option<u64>,
        job_id: String,
    },
    /// Hosted outside the LIMS (e.g. a sequencing provider); exempt from
    /// source and generator checks.
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntity {
    pub id: FileId,
    /// Display name. Repair rules may prefix it for collision avoidance.
    pub name: String,
    pub check_sum: Option<String>,
    pub origin: FileOrigin,
    pub provenance: Provenance,
}

impl FileEntity {
    pub fn from_upload(
        id: FileId,
        name: impl Into<String>,
        upload_id: impl Into<String>,
        size: Option<u64>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            check_sum: None,
            origin: FileOrigin::Upload {
                upload_id: upload_id.into(),
                size,
                job_id: job_id.into(),
            },
            provenance: Provenance::default(),
        }
    }

    pub fn external(id: FileId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            check_sum: None,
            origin: FileOrigin::External,
            provenance: Provenance::default(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.origin, FileOrigin::External)
    }

    pub fn upload_id(&self) -> Option<&str> {
        match &self.origin {
            FileOrigin::Upload { upload_id, .. } => Some(upload_id),
            FileOrigin::External => None,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match &self.origin {
            FileOrigin::Upload { job_id, .. } => Some(job_id),
            FileOrigin::External => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match &self.origin {
            FileOrigin::Upload { size, .. } => *size,
            FileOrigin::External => None,
        }
    }

    pub fn file_type(&self) -> Option<FileType> {
        let extension = Path::new(&self.name).extension()?.to_str()?;
        match extension {
            "csv" => Some(FileType::Tabular),
            "fcs" => Some(FileType::FlowCytometry),
            "xml" => Some(FileType::Xml),
            _ => None,
        }
    }

    /// Name joined under an optional directory, for export paths.
    pub fn path_under(&self, directory: Option<&str>) -> String {
        match directory {
            Some(dir) => format!("{}/{}", dir, self.name),
            None => self.name.clone(),
        }
    }
}
