//! Import session state machine
//!
//! ```text
//! idle -> parsed -> mapped -> previewed -> importing -> done
//! ```
//!
//! Nothing is written before `run`. `run` executes its phases in a fixed
//! order: accounts, then categories/tags, then transactions, then balances.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Account, Category, Tag, Transaction};
use crate::ports::Repository;
use crate::services::metadata::MetadataService;

use super::classify::{classify_all, ClassifiedTransaction, ClassifyOptions, ImportStatus, TransactionKind};
use super::error::{ImportError, RowError};
use super::mapping::{guess_mapping, ColumnMapping};
use super::materialize::{
    apply_balances, check_writes, commit_writes, plan_writes, skip_known, RowEvent,
};
use super::reader::{parse_delimited, RawRecord};
use super::reconcile::{
    build_candidates, diff_for_preview, materialize_accounts, AccountAction, AccountPreview,
    AccountResolution, MaterializeMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Idle,
    Parsed,
    Mapped,
    Previewed,
    Importing,
    Done,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportState::Idle => "idle",
            ImportState::Parsed => "parsed",
            ImportState::Mapped => "mapped",
            ImportState::Previewed => "previewed",
            ImportState::Importing => "importing",
            ImportState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation for a running import
///
/// Cloned handles share one flag; rows not yet started when it is set are
/// marked skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    Accounts,
    Metadata,
    Transactions,
    Balances,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportPhase::Accounts => "accounts",
            ImportPhase::Metadata => "categories and tags",
            ImportPhase::Transactions => "transactions",
            ImportPhase::Balances => "balances",
        };
        f.write_str(s)
    }
}

/// Snapshot sent to the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    pub phase: ImportPhase,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub type ProgressCallback = Arc<dyn Fn(ImportProgress) + Send + Sync>;

/// How `run` should execute
#[derive(Clone)]
pub struct RunOptions {
    /// Maximum writes in flight per phase
    pub concurrency: usize,
    pub cancel: CancelFlag,
    pub progress: Option<ProgressCallback>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            cancel: CancelFlag::new(),
            progress: None,
        }
    }
}

impl RunOptions {
    fn emit(&self, progress: ImportProgress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub success: usize,
    pub error: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn of(rows: &[ClassifiedTransaction]) -> Self {
        let mut counts = Self::default();
        for row in rows {
            match row.status {
                ImportStatus::Pending => counts.pending += 1,
                ImportStatus::Success => counts.success += 1,
                ImportStatus::Error => counts.error += 1,
                ImportStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

/// Everything the user reviews before confirming
#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    pub rows: Vec<ClassifiedTransaction>,
    pub accounts: Vec<AccountPreview>,
    pub counts: StatusCounts,
    /// Categories/tags on pending rows that do not exist yet
    pub new_categories: Vec<String>,
    pub new_tags: Vec<String>,
}

/// Final status of one row
#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
    pub row: usize,
    pub kind: Option<TransactionKind>,
    pub status: ImportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub batch_id: String,
    pub counts: StatusCounts,
    pub accounts_created: usize,
    pub accounts_updated: usize,
    pub categories_created: usize,
    pub tags_created: usize,
    /// Rows skipped because their transactions were already stored
    pub duplicates: usize,
    pub metadata_failures: Vec<String>,
    pub balance_failures: Vec<String>,
    pub cancelled: bool,
    pub rows: Vec<RowReport>,
}

/// One import, from file bytes to committed transactions
#[derive(Debug)]
pub struct ImportSession {
    state: ImportState,
    source: String,
    headers: Vec<String>,
    records: Vec<RawRecord>,
    mapping: Option<ColumnMapping>,
    options: ClassifyOptions,
    rows: Vec<ClassifiedTransaction>,
    accounts: Vec<AccountPreview>,
    existing: Vec<Account>,
}

impl Default for ImportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportSession {
    pub fn new() -> Self {
        Self {
            state: ImportState::Idle,
            source: String::new(),
            headers: Vec::new(),
            records: Vec::new(),
            mapping: None,
            options: ClassifyOptions::default(),
            rows: Vec::new(),
            accounts: Vec::new(),
            existing: Vec::new(),
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    /// Name of the loaded file (or archive entry)
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn mapping(&self) -> Option<&ColumnMapping> {
        self.mapping.as_ref()
    }

    pub fn rows(&self) -> &[ClassifiedTransaction] {
        &self.rows
    }

    pub fn accounts(&self) -> &[AccountPreview] {
        &self.accounts
    }

    /// Parse a delimited file; any earlier session data is discarded
    ///
    /// On failure the session is back in `idle`.
    pub fn load(&mut self, source: &str, bytes: &[u8]) -> Result<(), ImportError> {
        if self.state == ImportState::Importing {
            return Err(ImportError::invalid_state("load a file", self.state));
        }
        *self = Self::new();

        let parsed = parse_delimited(bytes)?;
        tracing::info!(source, rows = parsed.records.len(), "import file parsed");
        self.source = source.to_string();
        self.headers = parsed.headers;
        self.records = parsed.records;
        self.state = ImportState::Parsed;
        Ok(())
    }

    /// Best-guess mapping for the loaded headers
    pub fn suggested_mapping(&self) -> ColumnMapping {
        guess_mapping(&self.headers)
    }

    /// Accept a mapping (and session options) for classification
    ///
    /// Allowed from `parsed`, `mapped` and `previewed`; a rejected mapping
    /// leaves the session in `parsed`.
    pub fn confirm_mapping(
        &mut self,
        mapping: ColumnMapping,
        options: ClassifyOptions,
    ) -> Result<(), ImportError> {
        match self.state {
            ImportState::Parsed | ImportState::Mapped | ImportState::Previewed => {}
            state => return Err(ImportError::invalid_state("confirm a mapping", state)),
        }

        self.rows.clear();
        self.accounts.clear();
        if let Err(issues) = mapping.validate(&self.headers, options.primary_account.as_deref()) {
            self.mapping = None;
            self.state = ImportState::Parsed;
            return Err(ImportError::InvalidMapping(issues));
        }

        self.mapping = Some(mapping);
        self.options = options;
        self.state = ImportState::Mapped;
        Ok(())
    }

    /// Classify every row and diff implied accounts against `existing`
    ///
    /// Rows are also resolved against the preview's accounts, so a row that
    /// would fail to resolve on commit is already an error here. Pure
    /// computation; can be repeated from `previewed`.
    pub fn preview(
        &mut self,
        existing: Vec<Account>,
        categories: &[Category],
        tags: &[Tag],
    ) -> Result<ImportPreview, ImportError> {
        let mapping = match (self.state, &self.mapping) {
            (ImportState::Mapped | ImportState::Previewed, Some(mapping)) => mapping,
            (state, _) => return Err(ImportError::invalid_state("preview", state)),
        };

        self.rows = classify_all(&self.records, mapping, &self.options);
        let candidates = build_candidates(&self.rows, &existing);
        self.accounts = diff_for_preview(&candidates, &existing);
        check_writes(&mut self.rows, &AccountResolution::preview(&self.accounts));
        self.existing = existing;
        self.state = ImportState::Previewed;

        let counts = StatusCounts::of(&self.rows);
        tracing::info!(
            pending = counts.pending,
            errors = counts.error,
            skipped = counts.skipped,
            accounts = self.accounts.len(),
            "import previewed"
        );

        let (new_categories, new_tags) = self.missing_metadata(categories, tags);
        Ok(ImportPreview {
            rows: self.rows.clone(),
            accounts: self.accounts.clone(),
            counts,
            new_categories,
            new_tags,
        })
    }

    fn missing_metadata(&self, categories: &[Category], tags: &[Tag]) -> (Vec<String>, Vec<String>) {
        let known_categories: HashSet<String> = categories.iter().map(|c| c.name.to_lowercase()).collect();
        let known_tags: HashSet<String> = tags.iter().map(|t| t.name.to_lowercase()).collect();
        let (wanted_categories, wanted_tags) = self.wanted_metadata();

        let new_categories = wanted_categories
            .into_iter()
            .filter(|c| !known_categories.contains(&c.to_lowercase()))
            .collect();
        let new_tags = wanted_tags
            .into_iter()
            .filter(|t| !known_tags.contains(&t.to_lowercase()))
            .collect();
        (new_categories, new_tags)
    }

    /// Distinct category and tag names on pending, non-opening rows
    fn wanted_metadata(&self) -> (Vec<String>, Vec<String>) {
        let mut seen_categories = HashSet::new();
        let mut seen_tags = HashSet::new();
        let mut categories = Vec::new();
        let mut tags = Vec::new();
        for row in self.rows.iter().filter(|r| r.is_pending() && !r.is_opening_balance()) {
            if seen_categories.insert(row.category.to_lowercase()) {
                categories.push(row.category.clone());
            }
            for tag in &row.tags {
                if seen_tags.insert(tag.to_lowercase()) {
                    tags.push(tag.clone());
                }
            }
        }
        (categories, tags)
    }

    fn pending_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.is_pending() && !r.is_opening_balance())
            .count()
    }

    fn halt_pending(&mut self, reason: &str) {
        for row in self.rows.iter_mut().filter(|r| r.is_pending()) {
            row.fail(RowError::Halted(reason.to_string()));
        }
    }

    /// Commit the previewed import
    ///
    /// An account or metadata phase failure fails every pending row and
    /// returns the error; the session still ends in `done`. Row-level write
    /// failures are reported per row and never abort the batch.
    pub async fn run(
        &mut self,
        repository: Arc<dyn Repository>,
        options: &RunOptions,
    ) -> Result<ImportReport, ImportError> {
        if self.state != ImportState::Previewed {
            return Err(ImportError::invalid_state("import", self.state));
        }
        if self.pending_count() == 0 {
            return Err(ImportError::NothingToImport);
        }

        self.state = ImportState::Importing;
        let batch_id = Uuid::new_v4().to_string();
        tracing::info!(batch = %batch_id, rows = self.rows.len(), "import started");

        let result = self.run_phases(repository, options, &batch_id).await;
        self.state = ImportState::Done;
        result
    }

    async fn run_phases(
        &mut self,
        repository: Arc<dyn Repository>,
        options: &RunOptions,
        batch_id: &str,
    ) -> Result<ImportReport, ImportError> {
        // accounts
        let account_writes = self
            .accounts
            .iter()
            .filter(|a| a.action != AccountAction::NoChange)
            .count();
        options.emit(ImportProgress {
            phase: ImportPhase::Accounts,
            total: account_writes,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        });
        let resolution = match materialize_accounts(
            &self.accounts,
            &self.existing,
            MaterializeMode::Commit,
            Arc::clone(&repository),
            options.concurrency,
        )
        .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::error!(error = %e, "account phase failed, no transactions written");
                self.halt_pending("account reconciliation failed");
                return Err(e);
            }
        };
        options.emit(ImportProgress {
            phase: ImportPhase::Accounts,
            total: account_writes,
            processed: account_writes,
            succeeded: resolution.created + resolution.updated,
            failed: 0,
            skipped: 0,
        });

        // categories and tags
        let (categories, tags) = self.wanted_metadata();
        options.emit(ImportProgress {
            phase: ImportPhase::Metadata,
            total: categories.len() + tags.len(),
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        });
        let metadata = match MetadataService::new(Arc::clone(&repository))
            .ensure(&categories, &tags)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!(error = %e, "metadata phase failed, no transactions written");
                self.halt_pending("category/tag creation failed");
                return Err(e);
            }
        };
        for row in self.rows.iter_mut().filter(|r| r.is_pending() && !r.is_opening_balance()) {
            if metadata.category_failed(&row.category) {
                let category = row.category.clone();
                row.fail(RowError::CategoryUnavailable(category));
            } else if let Some(tag) = row.tags.iter().find(|t| metadata.tag_failed(t)).cloned() {
                row.fail(RowError::TagUnavailable(tag));
            }
        }

        // transactions
        let known: HashSet<String> = match repository.get_transactions().await {
            Ok(stored) => stored.iter().map(Transaction::calculate_fingerprint).collect(),
            Err(e) => {
                tracing::error!(error = %e, "could not load stored transactions, no transactions written");
                self.halt_pending("could not check for already imported rows");
                return Err(e.into());
            }
        };
        let plan = plan_writes(&mut self.rows, &resolution, batch_id);
        let (plan, duplicates) = skip_known(&mut self.rows, plan, &known);
        if duplicates > 0 {
            tracing::info!(duplicates, "skipping rows that were already imported");
        }
        let total = plan.len();
        let mut progress = ImportProgress {
            phase: ImportPhase::Transactions,
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        };
        options.emit(progress);
        let outcome = commit_writes(
            &mut self.rows,
            plan,
            Arc::clone(&repository),
            options.concurrency,
            &options.cancel,
            |event| {
                progress.processed += 1;
                match event {
                    RowEvent::Succeeded => progress.succeeded += 1,
                    RowEvent::Failed => progress.failed += 1,
                    RowEvent::Skipped => progress.skipped += 1,
                }
                options.emit(progress);
            },
        )
        .await;

        // balances
        options.emit(ImportProgress {
            phase: ImportPhase::Balances,
            total: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        });
        let balance_failures = apply_balances(repository.as_ref(), &outcome.written).await;

        let report = ImportReport {
            batch_id: batch_id.to_string(),
            counts: StatusCounts::of(&self.rows),
            accounts_created: resolution.created,
            accounts_updated: resolution.updated,
            categories_created: metadata.categories_created,
            tags_created: metadata.tags_created,
            duplicates,
            metadata_failures: metadata.failures(),
            balance_failures,
            cancelled: outcome.cancelled,
            rows: self
                .rows
                .iter()
                .map(|r| RowReport {
                    row: r.row,
                    kind: r.kind,
                    status: r.status,
                    message: r.error_message.clone(),
                })
                .collect(),
        };
        tracing::info!(
            batch = %report.batch_id,
            success = report.counts.success,
            errors = report.counts.error,
            skipped = report.counts.skipped,
            cancelled = report.cancelled,
            "import finished"
        );
        Ok(report)
    }
}
