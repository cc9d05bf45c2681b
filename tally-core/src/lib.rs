//! Tally Core - Business logic for ledger import and reconciliation
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Account, Transaction, etc.)
//! - **ports**: Trait definitions for external dependencies (Repository)
//! - **services**: Business logic orchestration (import, backup, status)
//! - **adapters**: Concrete implementations (JSON document store)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::json_store::JsonStore;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{Account, AccountCategory, Category, RateTable, Tag, Transaction};
pub use ports::Repository;

/// File name of the document store inside the data directory
pub const STORE_FILE: &str = "store.json";

/// Data directory: `TALLY_DIR`, else `~/.tally`
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("TALLY_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".tally")))
        .unwrap_or_else(|| PathBuf::from(".tally"))
}

/// Main context for Tally operations
///
/// This is the primary entry point for all business logic. It holds
/// the store, configuration, and all services.
pub struct TallyContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub repository: Arc<dyn Repository>,
    pub import_service: ImportService,
    pub backup_service: BackupService,
    pub status_service: StatusService,
}

impl TallyContext {
    /// Open the store in `data_dir` and wire up services
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let config = Config::load(data_dir)?;

        let store = JsonStore::open(&data_dir.join(STORE_FILE))
            .with_context(|| format!("Failed to open store in {}", data_dir.display()))?;
        Ok(Self::with_repository(config, data_dir, Arc::new(store)))
    }

    /// Wire services around an existing repository
    pub fn with_repository(config: Config, data_dir: &Path, repository: Arc<dyn Repository>) -> Self {
        let import_service = ImportService::new(Arc::clone(&repository), data_dir.to_path_buf());
        let backup_service = BackupService::new(Arc::clone(&repository));
        let status_service = StatusService::new(Arc::clone(&repository));

        Self {
            config,
            data_dir: data_dir.to_path_buf(),
            repository,
            import_service,
            backup_service,
            status_service,
        }
    }
}
