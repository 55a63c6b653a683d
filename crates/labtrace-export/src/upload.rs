//! Upload planning and the object-store boundary.
//!
//! The actual storage service is an external collaborator behind
//! [`ObjectStore`]; file bodies come from the LIMS behind [`FileFetcher`].
//! This module decides what goes where: one provenance document at the plan
//! root, plus a directory per file-generating activity containing its files
//! and a projected provenance document.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use labtrace_model::{FileType, Trace};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::json::trace_document;
use labtrace_build::check_trace;

pub trait ObjectStore {
    fn put_object(
        &mut self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> io::Result<()>;
}

/// Supplies upload bodies on demand. Returning `None` skips the file with a
/// log line; the provenance documents are uploaded regardless.
pub trait FileFetcher {
    fn fetch(&self, upload_id: &str) -> Option<Vec<u8>>;
}

/// Local-filesystem stand-in for the object store: JSON bodies are written
/// verbatim, binary bodies as a placeholder note. Used by the CLI's
/// `--dump` mode and by tests.
pub struct FsDumpStore {
    root: PathBuf,
}

impl FsDumpStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for FsDumpStore {
    fn put_object(
        &mut self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> io::Result<()> {
        let path = self.root.join(bucket).join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if content_type == "application/json" {
            fs::write(&path, body)
        } else {
            fs::write(&path, format!("would write file to {}", path.display()))
        }
    }
}

fn content_type(file_type: Option<FileType>) -> &'static str {
    match file_type {
        Some(FileType::Tabular) => "text/csv",
        Some(FileType::Xml) => "application/xml",
        Some(FileType::FlowCytometry) | None => "application/octet-stream",
    }
}

fn hex_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

/// Plans and performs the upload of one trace: the full provenance document
/// at the plan root, then one directory per file-generating activity.
pub struct UploadManager<'t> {
    trace: &'t Trace,
    /// generator activity id -> projected sub-trace
    directory_map: Vec<(String, Trace)>,
    bucket: String,
    basepath: String,
}

impl<'t> UploadManager<'t> {
    /// Project a sub-trace for every activity that generated files. Each
    /// projection is checked; a failing projection is uploaded anyway but
    /// reported.
    pub fn create_from(trace: &'t Trace, bucket: impl Into<String>, basepath: &str, date: NaiveDate) -> Self {
        let mut directory_map: Vec<(String, Trace)> = Vec::new();
        for file in trace.files() {
            let Some(generator) = &file.provenance.generator else {
                continue;
            };
            let directory = generator.activity_id();
            if directory_map.iter().any(|(name, _)| name == &directory) {
                continue;
            }
            info!(directory = %directory, "adding projected trace for upload");
            let mut projection = trace.project_from(generator);
            if !check_trace(&mut projection, Vec::<String>::new()) {
                warn!(directory = %directory, "provenance error in projected trace");
            }
            directory_map.push((directory, projection));
        }

        let plan_id = trace
            .plans()
            .next()
            .map(|plan| plan.plan_id.clone())
            .unwrap_or_else(|| trace.experiment_id.clone());
        let basepath = format!("{}/{}/{}", basepath, date.format("%Y%m"), plan_id);
        Self {
            trace,
            directory_map,
            bucket: bucket.into(),
            basepath,
        }
    }

    pub fn basepath(&self) -> &str {
        &self.basepath
    }

    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.directory_map.iter().map(|(name, _)| name.as_str())
    }

    pub fn upload(
        &self,
        store: &mut dyn ObjectStore,
        fetcher: &dyn FileFetcher,
        prov_only: bool,
    ) -> io::Result<()> {
        self.put_provenance(store, &self.basepath, self.trace)?;
        for (directory, projection) in &self.directory_map {
            let destination = format!("{}/{}", self.basepath, directory);
            if !prov_only {
                self.upload_directory(store, fetcher, &destination, projection)?;
            }
            self.put_provenance(store, &destination, projection)?;
        }
        Ok(())
    }

    fn upload_directory(
        &self,
        store: &mut dyn ObjectStore,
        fetcher: &dyn FileFetcher,
        destination: &str,
        projection: &Trace,
    ) -> io::Result<()> {
        for file in projection.files() {
            let Some(upload_id) = file.upload_id() else {
                continue;
            };
            let Some(body) = fetcher.fetch(upload_id) else {
                warn!(upload = upload_id, file = %file.name, "no body for upload, skipping");
                continue;
            };
            if let Some(recorded) = &file.check_sum {
                let digest = hex_digest(&body);
                if &digest != recorded {
                    warn!(
                        upload = upload_id,
                        file = %file.name,
                        "checksum mismatch between record and fetched body"
                    );
                }
            }
            let key = format!("{}/{}", destination, file.name);
            info!(key = %key, bucket = %self.bucket, "uploading file");
            store.put_object(
                &self.bucket,
                &key,
                &body,
                content_type(file.file_type()),
            )?;
        }
        Ok(())
    }

    fn put_provenance(
        &self,
        store: &mut dyn ObjectStore,
        destination: &str,
        trace: &Trace,
    ) -> io::Result<()> {
        let document = serde_json::to_string_pretty(&trace_document(trace))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let key = format!("{}/provenance_dump.json", destination);
        info!(key = %key, bucket = %self.bucket, "uploading provenance document");
        store.put_object(&self.bucket, &key, document.as_bytes(), "application/json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labtrace_model::{ActivityRef, FileEntity, FileId, OperationActivity, OperationType};

    struct NoBodies;

    impl FileFetcher for NoBodies {
        fn fetch(&self, _upload_id: &str) -> Option<Vec<u8>> {
            None
        }
    }

    fn trace_with_file() -> Trace {
        let mut trace = Trace::new("exp");
        trace.add_plan(labtrace_model::PlanActivity {
            plan_id: "p9".to_string(),
            name: "plan".to_string(),
            status: "done".to_string(),
            operation_ids: vec!["op1".to_string()],
            attributes: labtrace_model::Attributes::new(),
        });
        trace.add_operation(OperationActivity::new(
            "op1",
            OperationType {
                id: "1".to_string(),
                category: "c".to_string(),
                name: "Read".to_string(),
            },
        ));
        let mut file = FileEntity::from_upload(FileId(0), "od.csv", "31", Some(4), "j1");
        file.provenance
            .add_generator(ActivityRef::Operation("op1".to_string()));
        trace.add_file(file);
        trace
    }

    #[test]
    fn basepath_is_date_and_plan_scoped() {
        let trace = trace_with_file();
        let date = NaiveDate::from_ymd_opt(2018, 10, 20).unwrap();
        let manager = UploadManager::create_from(&trace, "uploads", "lab", date);
        assert_eq!(manager.basepath(), "lab/201810/p9");
        let directories: Vec<&str> = manager.directories().collect();
        assert_eq!(directories, vec!["op_op1"]);
    }

    #[test]
    fn dump_store_writes_provenance_documents() {
        let trace = trace_with_file();
        let date = NaiveDate::from_ymd_opt(2018, 10, 20).unwrap();
        let manager = UploadManager::create_from(&trace, "uploads", "lab", date);
        let root = tempfile::tempdir().unwrap();
        let mut store = FsDumpStore::new(root.path());
        manager.upload(&mut store, &NoBodies, false).unwrap();

        let plan_doc = root
            .path()
            .join("uploads/lab/201810/p9/provenance_dump.json");
        assert!(plan_doc.is_file());
        let op_doc = root
            .path()
            .join("uploads/lab/201810/p9/op_op1/provenance_dump.json");
        assert!(op_doc.is_file());
        let text = fs::read_to_string(plan_doc).unwrap();
        assert!(text.contains("\"plan_id\": \"p9\""));
    }

    #[test]
    fn digest_matches_known_value() {
        assert_eq!(
            hex_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
