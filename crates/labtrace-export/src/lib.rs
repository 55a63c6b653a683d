//! Export adapters for completed provenance traces.
//!
//! - [`json`]: the provenance document downstream consumers ingest.
//! - [`sbol`]: SBOL document mapping (components, activities, usages).
//! - [`upload`]: destination planning and the object-store boundary.

pub mod json;
pub mod sbol;
pub mod upload;

pub use json::trace_document;
pub use sbol::{SbolDocument, SbolVisitor};
pub use upload::{FileFetcher, FsDumpStore, ObjectStore, UploadManager};
