//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
pub mod backup;
mod category;
pub mod currency;
pub mod result;
mod transaction;

pub use account::{Account, AccountCategory};
pub use backup::BackupManifest;
pub use category::{Category, Document, Tag, UNCATEGORIZED};
pub use currency::RateTable;
pub use transaction::{ImportMetadata, Transaction};
