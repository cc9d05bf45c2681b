//! Transaction materialization
//!
//! Turns pending rows into transaction writes once accounts are resolved.
//! A transfer becomes a debit leg and a credit leg that are written
//! together: if the credit leg fails the debit leg is deleted again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::domain::{ImportMetadata, Transaction};
use crate::ports::Repository;

use super::classify::{ClassifiedTransaction, ImportStatus, TransactionKind};
use super::error::RowError;
use super::reconcile::{AccountRef, AccountResolution};
use super::session::CancelFlag;

/// All transaction legs for one row
#[derive(Debug, Clone)]
pub struct PlannedWrite {
    /// Index into the session's row list
    pub index: usize,
    /// Written in order; a transfer has the debit leg first
    pub legs: Vec<Transaction>,
}

/// Row-level event while writing, for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEvent {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of the write phase
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Every leg that was stored
    pub written: Vec<Transaction>,
    pub cancelled: bool,
}

/// Whether a placeholder counts as resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Planning {
    Commit,
    DryRun,
}

fn resolve_id(resolution: &AccountResolution, name: &str, planning: Planning) -> Result<Uuid, RowError> {
    match (resolution.resolve(name), planning) {
        (Some(AccountRef::Persisted(id)), _) => Ok(id),
        (Some(AccountRef::Placeholder), Planning::DryRun) => Ok(Uuid::nil()),
        _ => Err(RowError::UnresolvedAccount(name.to_string())),
    }
}

fn leg(
    row: &ClassifiedTransaction,
    account_id: Uuid,
    amount: Decimal,
    currency: &str,
    date: NaiveDate,
    batch_id: &str,
) -> Transaction {
    let mut tx = Transaction::new(Uuid::new_v4(), account_id, amount, currency, date);
    tx.description = row.description.clone();
    tx.category = row.category.clone();
    tx.tags = row.tags.clone();
    let fingerprint = tx.calculate_fingerprint();
    tx.import = Some(ImportMetadata {
        batch_id: batch_id.to_string(),
        row: row.row,
        fingerprint,
        foreign_amount: row.foreign_amount,
        foreign_currency: row.foreign_currency.clone(),
    });
    tx
}

fn plan_row(
    row: &ClassifiedTransaction,
    resolution: &AccountResolution,
    planning: Planning,
    batch_id: &str,
) -> Result<Vec<Transaction>, RowError> {
    let date = row.date.ok_or(RowError::MissingDate)?;
    let amount = row.amount.ok_or(RowError::MissingAmount)?;

    match row.kind {
        Some(TransactionKind::Transfer) => {
            let source = row.source_name.as_deref().ok_or(RowError::MissingAccount {
                kind: "transfer",
                side: "source",
            })?;
            let destination = row.destination_name.as_deref().ok_or(RowError::MissingAccount {
                kind: "transfer",
                side: "destination",
            })?;
            let source_id = resolve_id(resolution, source, planning)?;
            let destination_id = resolve_id(resolution, destination, planning)?;

            let magnitude = amount.abs();
            let (credit_amount, credit_currency) = match (row.foreign_amount, &row.foreign_currency) {
                (Some(fa), Some(fc)) => (fa.abs(), fc.as_str()),
                _ => (magnitude, row.currency.as_str()),
            };
            Ok(vec![
                leg(row, source_id, -magnitude, &row.currency, date, batch_id),
                leg(row, destination_id, credit_amount, credit_currency, date, batch_id),
            ])
        }
        Some(TransactionKind::Withdrawal) | Some(TransactionKind::Deposit) => {
            let name = row.account.as_deref().ok_or(RowError::MissingAccount {
                kind: "transaction",
                side: "account",
            })?;
            let account_id = resolve_id(resolution, name, planning)?;
            Ok(vec![leg(row, account_id, amount, &row.currency, date, batch_id)])
        }
        Some(TransactionKind::OpeningBalance) | None => Ok(Vec::new()),
    }
}

/// Build the writes for every pending row
///
/// Opening balances and rows that are not pending are left alone. A row
/// whose account cannot be resolved to a stored id is failed here and never
/// falls back to another account.
pub fn plan_writes(
    rows: &mut [ClassifiedTransaction],
    resolution: &AccountResolution,
    batch_id: &str,
) -> Vec<PlannedWrite> {
    let mut plan = Vec::new();
    for (index, row) in rows.iter_mut().enumerate() {
        if !row.is_pending() || row.is_opening_balance() {
            continue;
        }
        match plan_row(row, resolution, Planning::Commit, batch_id) {
            Ok(legs) if !legs.is_empty() => plan.push(PlannedWrite { index, legs }),
            Ok(_) => {}
            Err(e) => row.fail(e),
        }
    }
    plan
}

/// Dry run of [`plan_writes`] against a preview resolution
///
/// Placeholders count as resolved. Rows that would fail planning on commit
/// are failed now; returns how many.
pub fn check_writes(rows: &mut [ClassifiedTransaction], resolution: &AccountResolution) -> usize {
    let mut failed = 0;
    for row in rows.iter_mut().filter(|r| r.is_pending() && !r.is_opening_balance()) {
        if let Err(e) = plan_row(row, resolution, Planning::DryRun, "") {
            row.fail(e);
            failed += 1;
        }
    }
    failed
}

/// Drop planned rows whose every leg is already stored
///
/// `known` holds fingerprints of transactions stored before this run, so
/// repeated rows inside one file are still written. Dropped rows are marked
/// skipped; returns the remaining plan and how many were dropped.
pub fn skip_known(
    rows: &mut [ClassifiedTransaction],
    plan: Vec<PlannedWrite>,
    known: &HashSet<String>,
) -> (Vec<PlannedWrite>, usize) {
    let mut duplicates = 0;
    let remaining = plan
        .into_iter()
        .filter(|write| {
            let stored = write.legs.iter().all(|leg| {
                leg.import
                    .as_ref()
                    .is_some_and(|meta| known.contains(&meta.fingerprint))
            });
            if stored {
                duplicates += 1;
                rows[write.index].skip("already imported");
            }
            !stored
        })
        .collect();
    (remaining, duplicates)
}

/// Store the legs of one row in order, undoing a half-written transfer
async fn write_unit(
    repository: Arc<dyn Repository>,
    row: usize,
    legs: Vec<Transaction>,
) -> Result<Vec<Transaction>, RowError> {
    let mut written: Vec<Transaction> = Vec::with_capacity(legs.len());
    for tx in legs {
        tracing::debug!(row, account = %tx.account_id, amount = %tx.amount, "writing transaction");
        if let Err(e) = repository.add_transaction(&tx).await {
            let write_error = e.to_string();
            let Some(first) = written.first() else {
                return Err(RowError::WriteFailed(write_error));
            };
            return match repository.delete_transaction(first.id).await {
                Ok(()) => {
                    tracing::warn!(row, error = %write_error, "credit leg failed, debit leg rolled back");
                    Err(RowError::WriteFailed(format!(
                        "credit leg failed ({}), debit leg rolled back",
                        write_error
                    )))
                }
                Err(rollback) => {
                    tracing::error!(
                        row,
                        error = %write_error,
                        rollback_error = %rollback,
                        transaction = %first.id,
                        "transfer left one-sided"
                    );
                    Err(RowError::OneSidedTransfer {
                        write: write_error,
                        rollback: rollback.to_string(),
                    })
                }
            };
        }
        written.push(tx);
    }
    Ok(written)
}

fn settle(
    rows: &mut [ClassifiedTransaction],
    outcome: &mut CommitOutcome,
    on_row: &mut impl FnMut(RowEvent),
    (index, result): (usize, Result<Vec<Transaction>, RowError>),
) {
    match result {
        Ok(legs) => {
            rows[index].succeed();
            outcome.written.extend(legs);
            on_row(RowEvent::Succeeded);
        }
        Err(e) => {
            rows[index].fail(e);
            on_row(RowEvent::Failed);
        }
    }
}

/// Execute planned writes with at most `concurrency` rows in flight
///
/// The cancel flag is checked before each row starts; rows not started
/// after cancellation are marked skipped. Row statuses are updated in place
/// and `on_row` is called as each row settles.
pub async fn commit_writes(
    rows: &mut [ClassifiedTransaction],
    plan: Vec<PlannedWrite>,
    repository: Arc<dyn Repository>,
    concurrency: usize,
    cancel: &CancelFlag,
    mut on_row: impl FnMut(RowEvent),
) -> CommitOutcome {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<(usize, Result<Vec<Transaction>, RowError>)> = JoinSet::new();
    let mut outcome = CommitOutcome::default();
    let mut started: Vec<usize> = Vec::new();

    for write in plan {
        while let Some(joined) = tasks.try_join_next() {
            if let Ok(done) = joined {
                settle(rows, &mut outcome, &mut on_row, done);
            }
        }

        let permit = Arc::clone(&permits).acquire_owned().await;
        if cancel.is_cancelled() {
            if !outcome.cancelled {
                tracing::info!(row = rows[write.index].row, "import cancelled");
            }
            outcome.cancelled = true;
            rows[write.index].skip("import cancelled before this row was written");
            on_row(RowEvent::Skipped);
            continue;
        }
        let Ok(permit) = permit else {
            rows[write.index].fail(RowError::Halted("write pool closed".to_string()));
            on_row(RowEvent::Failed);
            continue;
        };

        started.push(write.index);
        let repository = Arc::clone(&repository);
        let row_number = rows[write.index].row;
        tasks.spawn(async move {
            let _permit = permit;
            (write.index, write_unit(repository, row_number, write.legs).await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(done) => settle(rows, &mut outcome, &mut on_row, done),
            Err(e) => tracing::error!(error = %e, "transaction write task failed"),
        }
    }

    // a task that panicked leaves its row pending
    for index in started {
        if rows[index].status == ImportStatus::Pending {
            rows[index].fail(RowError::WriteFailed("write task did not complete".to_string()));
            on_row(RowEvent::Failed);
        }
    }

    outcome
}

/// Net change and latest date per account
fn balance_deltas(written: &[Transaction]) -> BTreeMap<Uuid, (Decimal, NaiveDate)> {
    let mut deltas: BTreeMap<Uuid, (Decimal, NaiveDate)> = BTreeMap::new();
    for tx in written {
        let entry = deltas.entry(tx.account_id).or_insert((Decimal::ZERO, tx.date));
        entry.0 += tx.amount;
        entry.1 = entry.1.max(tx.date);
    }
    deltas
}

/// Add each account's net change to its balance and advance `last_activity`
///
/// Returns one message per account that could not be updated.
pub async fn apply_balances(repository: &dyn Repository, written: &[Transaction]) -> Vec<String> {
    let mut failures = Vec::new();
    for (account_id, (delta, latest)) in balance_deltas(written) {
        let account = match repository.get_account_by_id(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                failures.push(format!("account {} no longer exists", account_id));
                continue;
            }
            Err(e) => {
                failures.push(format!("account {}: {}", account_id, e));
                continue;
            }
        };

        let mut updated = account.clone();
        updated.balance += delta;
        let activity = latest.and_time(NaiveTime::MIN).and_utc();
        updated.last_activity = Some(account.last_activity.map_or(activity, |prev| prev.max(activity)));
        updated.updated_at = Utc::now();

        match repository.update_account(&updated).await {
            Ok(()) => tracing::debug!(account = %updated.name, delta = %delta, "balance adjusted"),
            Err(e) => {
                tracing::warn!(account = %updated.name, error = %e, "balance update failed");
                failures.push(format!("balance of '{}': {}", updated.name, e));
            }
        }
    }
    failures
}
