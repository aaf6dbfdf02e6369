//! ragsync-sync: discovery, local catalog, upload pipeline and reconciliation
//!
//! The pipeline and reconciliation engine talk to the remote store only
//! through `ragsync_remote::RemoteGateway`.

pub mod catalog;
pub mod checksum;
pub mod discovery;
pub mod mime;
pub mod pipeline;
pub mod reconcile;
pub mod resolver;
pub mod upload;

pub use catalog::Catalog;
pub use discovery::{discover_files, DiscoveredFile, ExcludeSet};
pub use pipeline::{check_catalog_primed, FileResult, FileStatus, UploadPipeline, UploadReport};
pub use resolver::{CatalogResolver, ExistingDocumentResolver, RemoteMetadataResolver};
pub use upload::{upload_document, UploadDisposition, UploadJob, UploadOutcome};
