//! Import service - CSV/ZIP ledger import with account reconciliation
//!
//! The pipeline, leaves first:
//! - `normalize`: locale-tolerant amount and date parsing
//! - `reader`: file/archive detection and delimited-text parsing
//! - `mapping`: header -> canonical field mapping
//! - `classify`: raw row -> classified transaction
//! - `reconcile`: implied accounts, preview diff, account writes
//! - `materialize`: transaction legs, writes, balance updates
//! - `session`: the state machine tying it together

mod classify;
mod error;
mod mapping;
mod materialize;
pub mod normalize;
mod reader;
mod reconcile;
mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::config::{Config, ImportProfile};
use crate::ports::Repository;

pub use classify::{
    classify, classify_all, ClassifiedTransaction, ClassifyOptions, ImportStatus, TransactionKind,
};
pub use error::{AccountWriteFailure, ImportError, RowError};
pub use mapping::{guess_mapping, CanonicalField, ColumnMapping, MappingIssue};
pub use materialize::{
    apply_balances, check_writes, commit_writes, plan_writes, skip_known, CommitOutcome, PlannedWrite,
    RowEvent,
};
pub use reader::{parse_delimited, read_input, read_input_bytes, ImportInput, ParsedFile, RawRecord};
pub use reconcile::{
    build_candidates, diff_for_preview, infer_category, materialize_accounts, AccountAction,
    AccountCandidate, AccountPreview, AccountRef, AccountResolution, BalanceSource, CandidateMap,
    MaterializeMode,
};
pub use session::{
    CancelFlag, ImportPhase, ImportPreview, ImportProgress, ImportReport, ImportSession,
    ImportState, ProgressCallback, RowReport, RunOptions, StatusCounts,
};

/// What opening a file produced
#[derive(Debug)]
pub enum OpenedImport {
    /// A ledger file, parsed and waiting for a mapping
    Session(ImportSession),
    /// A full backup archive, to be restored instead of imported
    Backup(Vec<u8>),
}

/// Import service for CSV/ZIP ledger files
pub struct ImportService {
    repository: Arc<dyn Repository>,
    data_dir: PathBuf,
}

impl ImportService {
    pub fn new(repository: Arc<dyn Repository>, data_dir: PathBuf) -> Self {
        Self {
            repository,
            data_dir,
        }
    }

    /// Read a file and start a session for it
    pub fn open(&self, path: &Path) -> Result<OpenedImport, ImportError> {
        match read_input(path)? {
            ImportInput::Backup(bytes) => Ok(OpenedImport::Backup(bytes)),
            ImportInput::Delimited { name, bytes } => {
                let mut session = ImportSession::new();
                session.load(&name, &bytes)?;
                Ok(OpenedImport::Session(session))
            }
        }
    }

    /// Classify and diff against the stored accounts, categories and tags
    pub async fn preview(&self, session: &mut ImportSession) -> Result<ImportPreview, ImportError> {
        let (accounts, categories, tags) = tokio::try_join!(
            self.repository.get_accounts(),
            self.repository.get_categories(),
            self.repository.get_tags(),
        )?;
        session.preview(accounts, &categories, &tags)
    }

    /// Commit a previewed session
    pub async fn run(
        &self,
        session: &mut ImportSession,
        options: &RunOptions,
    ) -> Result<ImportReport, ImportError> {
        session.run(Arc::clone(&self.repository), options).await
    }

    /// Run options using the configured write concurrency
    pub fn run_options(&self) -> anyhow::Result<RunOptions> {
        let config = Config::load(&self.data_dir)?;
        Ok(RunOptions {
            concurrency: config.write_concurrency,
            ..RunOptions::default()
        })
    }

    /// List saved import profiles
    pub fn list_profiles(&self) -> anyhow::Result<BTreeMap<String, ImportProfile>> {
        let config = Config::load(&self.data_dir)?;
        Ok(config.import_profiles)
    }

    pub fn get_profile(&self, name: &str) -> anyhow::Result<ImportProfile> {
        let config = Config::load(&self.data_dir)?;
        config
            .import_profiles
            .get(name)
            .cloned()
            .with_context(|| format!("Import profile '{}' not found", name))
    }

    /// Save (or replace) an import profile
    pub fn save_profile(&self, name: &str, profile: ImportProfile) -> anyhow::Result<()> {
        let mut config = Config::load(&self.data_dir)?;
        config.import_profiles.insert(name.to_string(), profile);
        config.save(&self.data_dir)
    }
}
