//! ragsync-remote: the boundary to the hosted document store
//!
//! `RemoteGateway` is the seam the sync engine depends on. `GeminiClient`
//! speaks the File Search REST API; `MemoryGateway` keeps everything in
//! process and counts calls, for tests.

pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod operation;
pub mod types;

pub use client::GeminiClient;
pub use error::{RemoteError, RemoteResult};
pub use gateway::{RemoteGateway, ResolvedStore};
pub use memory::MemoryGateway;
pub use operation::{wait_for_operation, PollConfig};
pub use types::{
    Answer, Citation, CustomMetadata, Document, Operation, QueryRequest, Store, UploadBody,
    UploadRequest, CHECKSUM_KEY,
};
