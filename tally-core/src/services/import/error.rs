//! Import pipeline errors
//!
//! `ImportError` aborts an operation (file, mapping, state and phase
//! failures). `RowError` never aborts anything: it is rendered into the
//! offending row's message and the batch carries on.

use std::fmt;

use thiserror::Error;

use crate::domain::result::Error as StoreError;

use super::mapping::MappingIssue;
use super::session::ImportState;

/// One failed account create/update during reconciliation
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AccountWriteFailure {
    pub name: String,
    pub action: String,
    pub error: String,
}

impl fmt::Display for AccountWriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.action, self.name, self.error)
    }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that stop an import operation
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("The file is empty")]
    EmptyFile,

    #[error("Could not read column headers: {0}")]
    InvalidHeaders(String),

    #[error("Could not read file: {0}")]
    Unreadable(String),

    #[error("Archive contains no CSV file")]
    NoCsvInArchive,

    #[error("Column mapping is incomplete: {}", join_display(.0))]
    InvalidMapping(Vec<MappingIssue>),

    #[error("Cannot {action} while the import is {state}")]
    InvalidState {
        action: &'static str,
        state: ImportState,
    },

    #[error("There are no pending rows to import")]
    NothingToImport,

    #[error("Account reconciliation failed, no transactions were written: {}", join_display(.0))]
    AccountReconciliation(Vec<AccountWriteFailure>),

    #[error("Category/tag creation failed, no transactions were written: {0}")]
    MetadataPhase(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    pub(crate) fn invalid_state(action: &'static str, state: ImportState) -> Self {
        Self::InvalidState { action, state }
    }
}

/// Row-scoped failure; becomes the row's `error_message`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("missing date")]
    MissingDate,

    #[error("missing amount")]
    MissingAmount,

    #[error("unparsable {field} '{value}'")]
    UnparsableAmount { field: &'static str, value: String },

    #[error("both income ('{income}') and expense ('{expense}') are populated")]
    AmbiguousAmount { income: String, expense: String },

    #[error("missing currency")]
    MissingCurrency,

    #[error("unknown transaction type '{0}'")]
    UnknownType(String),

    #[error("{kind} has no {side} account")]
    MissingAccount {
        kind: &'static str,
        side: &'static str,
    },

    #[error("transfer from '{0}' to the same account")]
    SelfTransfer(String),

    #[error("account '{0}' could not be resolved")]
    UnresolvedAccount(String),

    #[error("category '{0}' could not be created")]
    CategoryUnavailable(String),

    #[error("tag '{0}' could not be created")]
    TagUnavailable(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("debit leg written but credit leg failed: {write}; rollback failed: {rollback}")]
    OneSidedTransfer { write: String, rollback: String },

    #[error("import halted: {0}")]
    Halted(String),
}
