//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod backup;
pub mod import;
mod metadata;
mod status;

pub use backup::{BackupService, ExportSummary, RestoreSummary, COLLECTIONS};
pub use import::{ImportService, OpenedImport};
pub use metadata::{MetadataResult, MetadataResultEntry, MetadataService};
pub use status::{AccountSummary, StatusService, StatusSummary};
