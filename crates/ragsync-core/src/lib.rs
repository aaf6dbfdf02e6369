//! ragsync-core: types, configuration, and errors shared by every ragsync crate

pub mod config;
pub mod error;
pub mod types;

pub use config::RagsyncConfig;
pub use error::{RagsyncError, RagsyncResult};
pub use types::{CatalogData, FileRecord, StoreRecord};
