//! Account inference and reconciliation
//!
//! Accounts are only discoverable by scanning the rows, but transactions can
//! only be written once their accounts exist. This module builds the set of
//! accounts a file implies, diffs it against what is already stored, and
//! (on commit) writes the creates/updates before anything else happens.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::domain::{Account, AccountCategory};
use crate::ports::Repository;

use super::classify::{ClassifiedTransaction, ImportStatus, TransactionKind};
use super::error::{AccountWriteFailure, ImportError};

/// Name fragments that mark an account as crypto
const CRYPTO_TOKENS: &[&str] = &[
    "crypto",
    "wallet",
    "binance",
    "coinbase",
    "kraken",
    "bitso",
    "mercado bitcoin",
    "foxbit",
    "bybit",
    "okx",
    "kucoin",
    "bitfinex",
    "gemini",
    "metamask",
    "ledger",
];

/// Where a candidate's balance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    OpeningBalanceRow,
    InitialBalanceColumn,
}

/// An account implied by the import file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountCandidate {
    /// First-seen spelling
    pub name: String,
    pub currency: String,
    pub opening_balance: Option<Decimal>,
    pub balance_source: Option<BalanceSource>,
    pub category: AccountCategory,
    /// Row that introduced the candidate
    pub first_seen: usize,
    /// Opening balances for this account overwritten by a later row
    pub superseded_balances: usize,
}

/// Candidates keyed by normalized account name
pub type CandidateMap = BTreeMap<String, AccountCandidate>;

/// Heuristic category from name and type tokens
pub fn infer_category(name: &str, type_hint: Option<&str>) -> AccountCategory {
    let haystack = format!("{} {}", name, type_hint.unwrap_or("")).to_lowercase();
    if CRYPTO_TOKENS.iter().any(|token| haystack.contains(token)) {
        AccountCategory::Crypto
    } else {
        AccountCategory::Asset
    }
}

fn category_for(
    key: &str,
    name: &str,
    type_hint: Option<&str>,
    existing: &HashMap<String, &Account>,
) -> AccountCategory {
    existing
        .get(key)
        .map(|a| a.category)
        .unwrap_or_else(|| infer_category(name, type_hint))
}

fn index_existing(existing: &[Account]) -> HashMap<String, &Account> {
    let mut index = HashMap::new();
    for account in existing {
        index.entry(account.key()).or_insert(account);
    }
    index
}

/// Scan classified rows once and collect the accounts they imply
///
/// Opening-balance rows are applied first and a later opening balance for
/// the same account replaces an earlier one. Ordinary rows only add accounts
/// that are not known yet and never touch a balance an opening-balance row
/// set; an `initial_balance` cell only fills a balance that is still empty.
pub fn build_candidates(rows: &[ClassifiedTransaction], existing: &[Account]) -> CandidateMap {
    let existing = index_existing(existing);
    let mut candidates = CandidateMap::new();

    for row in rows.iter().filter(|r| r.is_opening_balance() && r.status == ImportStatus::Skipped) {
        let (Some(name), Some(balance)) = (row.account.as_deref(), row.amount) else {
            continue;
        };
        let key = Account::normalize_name(name);
        let hints = row.asset_accounts();
        let hint = hints.first().and_then(|(_, h)| *h);

        match candidates.get_mut(&key) {
            Some(candidate) => {
                tracing::warn!(
                    account = %candidate.name,
                    row = row.row,
                    previous = ?candidate.opening_balance,
                    balance = %balance,
                    "duplicate opening balance, keeping the later row"
                );
                candidate.opening_balance = Some(balance);
                candidate.balance_source = Some(BalanceSource::OpeningBalanceRow);
                candidate.currency = row.currency.clone();
                candidate.superseded_balances += 1;
            }
            None => {
                let category = category_for(&key, name, hint, &existing);
                candidates.insert(
                    key,
                    AccountCandidate {
                        name: name.to_string(),
                        currency: row.currency.clone(),
                        opening_balance: Some(balance),
                        balance_source: Some(BalanceSource::OpeningBalanceRow),
                        category,
                        first_seen: row.row,
                        superseded_balances: 0,
                    },
                );
            }
        }
    }

    for row in rows.iter().filter(|r| r.is_pending()) {
        let single_account = matches!(
            row.kind,
            Some(TransactionKind::Withdrawal) | Some(TransactionKind::Deposit)
        );
        for (name, hint) in row.asset_accounts() {
            let key = Account::normalize_name(name);
            let fallback = if single_account { row.initial_balance } else { None };

            match candidates.get_mut(&key) {
                Some(candidate) => {
                    if candidate.opening_balance.is_none() {
                        if let Some(balance) = fallback {
                            candidate.opening_balance = Some(balance);
                            candidate.balance_source = Some(BalanceSource::InitialBalanceColumn);
                        }
                    }
                }
                None => {
                    let category = category_for(&key, name, hint, &existing);
                    // the credit side of a cross-currency transfer holds the foreign currency
                    let currency = match (&row.foreign_currency, row.destination_name.as_deref()) {
                        (Some(foreign), Some(destination))
                            if row.kind == Some(TransactionKind::Transfer)
                                && Account::normalize_name(destination) == key =>
                        {
                            foreign.clone()
                        }
                        _ => row.currency.clone(),
                    };
                    candidates.insert(
                        key,
                        AccountCandidate {
                            name: name.to_string(),
                            currency,
                            opening_balance: fallback,
                            balance_source: fallback.map(|_| BalanceSource::InitialBalanceColumn),
                            category,
                            first_seen: row.row,
                            superseded_balances: 0,
                        },
                    );
                }
            }
        }
    }

    candidates
}

/// What reconciliation will do with one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountAction {
    Create,
    Update,
    NoChange,
}

impl fmt::Display for AccountAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountAction::Create => "create",
            AccountAction::Update => "update",
            AccountAction::NoChange => "no change",
        };
        f.write_str(s)
    }
}

/// One line of the account preview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountPreview {
    pub name: String,
    pub currency: String,
    /// Balance the account will have before this file's transactions
    pub balance: Decimal,
    pub category: AccountCategory,
    pub action: AccountAction,
    pub existing_id: Option<Uuid>,
    pub superseded_balances: usize,
}

impl AccountPreview {
    pub fn key(&self) -> String {
        Account::normalize_name(&self.name)
    }
}

/// Diff candidates against stored accounts
///
/// Candidates come first in the order the file introduced them, followed by
/// stored accounts the file does not mention (always `NoChange`).
pub fn diff_for_preview(candidates: &CandidateMap, existing: &[Account]) -> Vec<AccountPreview> {
    let index = index_existing(existing);

    let mut ordered: Vec<(&String, &AccountCandidate)> = candidates.iter().collect();
    ordered.sort_by_key(|(_, c)| c.first_seen);

    let mut previews: Vec<AccountPreview> = ordered
        .into_iter()
        .map(|(key, candidate)| match index.get(key.as_str()) {
            None => AccountPreview {
                name: candidate.name.clone(),
                currency: candidate.currency.clone(),
                balance: candidate.opening_balance.unwrap_or(Decimal::ZERO),
                category: candidate.category,
                action: AccountAction::Create,
                existing_id: None,
                superseded_balances: candidate.superseded_balances,
            },
            Some(account) => {
                let balance = candidate.opening_balance.unwrap_or(account.balance);
                let changed = candidate.currency != account.currency || balance != account.balance;
                AccountPreview {
                    name: account.name.clone(),
                    currency: candidate.currency.clone(),
                    balance,
                    category: account.category,
                    action: if changed {
                        AccountAction::Update
                    } else {
                        AccountAction::NoChange
                    },
                    existing_id: Some(account.id),
                    superseded_balances: candidate.superseded_balances,
                }
            }
        })
        .collect();

    previews.extend(
        existing
            .iter()
            .filter(|a| !candidates.contains_key(&a.key()))
            .map(|account| AccountPreview {
                name: account.name.clone(),
                currency: account.currency.clone(),
                balance: account.balance,
                category: account.category,
                action: AccountAction::NoChange,
                existing_id: Some(account.id),
                superseded_balances: 0,
            }),
    );

    previews
}

/// Whether reconciliation writes anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeMode {
    Preview,
    Commit,
}

/// Resolved target of an account name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRef {
    Persisted(Uuid),
    /// Would be created on commit; has no id yet
    Placeholder,
}

/// Normalized account name -> account, for one import run
#[derive(Debug, Clone, Default)]
pub struct AccountResolution {
    ids: HashMap<String, AccountRef>,
    pub created: usize,
    pub updated: usize,
}

impl AccountResolution {
    /// Resolution of a preview without writing anything
    ///
    /// Stored accounts resolve to their ids, accounts the import would
    /// create to `Placeholder`.
    pub fn preview(preview: &[AccountPreview]) -> Self {
        let ids = preview
            .iter()
            .map(|entry| {
                let target = match entry.existing_id {
                    Some(id) => AccountRef::Persisted(id),
                    None => AccountRef::Placeholder,
                };
                (entry.key(), target)
            })
            .collect();
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn resolve(&self, name: &str) -> Option<AccountRef> {
        self.ids.get(&Account::normalize_name(name)).copied()
    }

    /// Persisted id for a name, `None` for unknown names and placeholders
    pub fn persisted_id(&self, name: &str) -> Option<Uuid> {
        match self.resolve(name) {
            Some(AccountRef::Persisted(id)) => Some(id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

enum AccountWrite {
    Created(String, Uuid),
    Updated(String, Uuid),
}

/// Turn the account preview into a name -> id resolution
///
/// `Preview` never touches the repository. `Commit` runs every create and
/// update with at most `concurrency` writes in flight, waits for all of them,
/// and fails with every collected error if any write failed.
pub async fn materialize_accounts(
    preview: &[AccountPreview],
    existing: &[Account],
    mode: MaterializeMode,
    repository: Arc<dyn Repository>,
    concurrency: usize,
) -> Result<AccountResolution, ImportError> {
    if mode == MaterializeMode::Preview {
        return Ok(AccountResolution::preview(preview));
    }

    let mut resolution = AccountResolution::default();

    let existing_by_id: HashMap<Uuid, &Account> = existing.iter().map(|a| (a.id, a)).collect();
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<Result<AccountWrite, AccountWriteFailure>> = JoinSet::new();

    for entry in preview {
        match (entry.action, entry.existing_id) {
            (AccountAction::NoChange, Some(id)) => {
                resolution.ids.insert(entry.key(), AccountRef::Persisted(id));
            }
            (AccountAction::Create, _) | (AccountAction::NoChange, None) => {
                let mut account = Account::new(Uuid::new_v4(), entry.name.clone(), &entry.currency);
                account.balance = entry.balance;
                account.category = entry.category;
                let repository = Arc::clone(&repository);
                let permits = Arc::clone(&permits);
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    tracing::debug!(account = %account.name, "creating account");
                    match repository.add_account(&account).await {
                        Ok(()) => Ok(AccountWrite::Created(account.key(), account.id)),
                        Err(e) => Err(AccountWriteFailure {
                            name: account.name,
                            action: "create".to_string(),
                            error: e.to_string(),
                        }),
                    }
                });
            }
            (AccountAction::Update, Some(id)) => {
                let Some(current) = existing_by_id.get(&id) else {
                    return Err(ImportError::AccountReconciliation(vec![AccountWriteFailure {
                        name: entry.name.clone(),
                        action: "update".to_string(),
                        error: "account is no longer stored".to_string(),
                    }]));
                };
                let mut account = (*current).clone();
                account.currency = Account::normalize_currency(&entry.currency);
                account.balance = entry.balance;
                account.updated_at = Utc::now();
                let repository = Arc::clone(&repository);
                let permits = Arc::clone(&permits);
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    tracing::debug!(account = %account.name, "updating account");
                    match repository.update_account(&account).await {
                        Ok(()) => Ok(AccountWrite::Updated(account.key(), account.id)),
                        Err(e) => Err(AccountWriteFailure {
                            name: account.name,
                            action: "update".to_string(),
                            error: e.to_string(),
                        }),
                    }
                });
            }
            (AccountAction::Update, None) => {
                return Err(ImportError::AccountReconciliation(vec![AccountWriteFailure {
                    name: entry.name.clone(),
                    action: "update".to_string(),
                    error: "no stored account to update".to_string(),
                }]));
            }
        }
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(AccountWrite::Created(key, id))) => {
                resolution.created += 1;
                resolution.ids.insert(key, AccountRef::Persisted(id));
            }
            Ok(Ok(AccountWrite::Updated(key, id))) => {
                resolution.updated += 1;
                resolution.ids.insert(key, AccountRef::Persisted(id));
            }
            Ok(Err(failure)) => {
                tracing::error!(account = %failure.name, action = %failure.action, error = %failure.error, "account write failed");
                failures.push(failure);
            }
            Err(e) => failures.push(AccountWriteFailure {
                name: String::new(),
                action: "write".to_string(),
                error: e.to_string(),
            }),
        }
    }

    if !failures.is_empty() {
        failures.sort_by(|a, b| a.name.cmp(&b.name));
        return Err(ImportError::AccountReconciliation(failures));
    }

    tracing::info!(
        created = resolution.created,
        updated = resolution.updated,
        "accounts reconciled"
    );
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::json_store::JsonStore;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn row(n: usize, kind: TransactionKind) -> ClassifiedTransaction {
        ClassifiedTransaction {
            row: n,
            kind: Some(kind),
            date: NaiveDate::from_ymd_opt(2024, 1, 1),
            amount: Some(Decimal::ONE),
            currency: "BRL".to_string(),
            description: String::new(),
            category: "Uncategorized".to_string(),
            tags: Vec::new(),
            notes: None,
            source_name: None,
            destination_name: None,
            source_type: None,
            destination_type: None,
            account: None,
            foreign_amount: None,
            foreign_currency: None,
            initial_balance: None,
            status: ImportStatus::Pending,
            error_message: None,
        }
    }

    fn opening(n: usize, name: &str, amount: &str) -> ClassifiedTransaction {
        let mut r = row(n, TransactionKind::OpeningBalance);
        r.account = Some(name.to_string());
        r.destination_name = Some(name.to_string());
        r.destination_type = Some("asset account".to_string());
        r.amount = Some(dec(amount));
        r.skip("opening balance");
        r
    }

    fn withdrawal(n: usize, name: &str) -> ClassifiedTransaction {
        let mut r = row(n, TransactionKind::Withdrawal);
        r.source_name = Some(name.to_string());
        r.account = Some(name.to_string());
        r.amount = Some(dec("-5"));
        r
    }

    #[test]
    fn test_opening_balance_candidate() {
        let candidates = build_candidates(&[opening(1, "Nubank", "1500.00")], &[]);
        let c = &candidates["nubank"];
        assert_eq!(c.name, "Nubank");
        assert_eq!(c.currency, "BRL");
        assert_eq!(c.opening_balance, Some(dec("1500.00")));
        assert_eq!(c.category, AccountCategory::Asset);

        let preview = diff_for_preview(&candidates, &[]);
        assert_eq!(preview[0].action, AccountAction::Create);
        assert_eq!(preview[0].balance, dec("1500.00"));
    }

    #[test]
    fn test_duplicate_opening_balance_last_wins() {
        let rows = [opening(1, "Nubank", "10"), opening(2, "NUBANK", "20")];
        let candidates = build_candidates(&rows, &[]);
        assert_eq!(candidates.len(), 1);
        let c = &candidates["nubank"];
        assert_eq!(c.opening_balance, Some(dec("20")));
        assert_eq!(c.name, "Nubank");
        assert_eq!(c.superseded_balances, 1);
    }

    #[test]
    fn test_pass_two_never_overrides_opening_balance() {
        // the withdrawal comes first in the file
        let mut w = withdrawal(1, "Nubank");
        w.currency = "USD".to_string();
        w.initial_balance = Some(dec("999"));
        let rows = [w, opening(2, "Nubank", "100")];
        let candidates = build_candidates(&rows, &[]);
        let c = &candidates["nubank"];
        assert_eq!(c.opening_balance, Some(dec("100")));
        assert_eq!(c.currency, "BRL");
        assert_eq!(c.balance_source, Some(BalanceSource::OpeningBalanceRow));
    }

    #[test]
    fn test_initial_balance_column_fills_empty_balance() {
        let mut w = withdrawal(1, "Itau");
        w.initial_balance = Some(dec("42"));
        let candidates = build_candidates(&[w], &[]);
        assert_eq!(candidates["itau"].opening_balance, Some(dec("42")));
        assert_eq!(
            candidates["itau"].balance_source,
            Some(BalanceSource::InitialBalanceColumn)
        );
    }

    #[test]
    fn test_error_rows_and_non_asset_sides_ignored() {
        let mut bad = withdrawal(1, "Ghost");
        bad.fail(super::super::error::RowError::MissingDate);

        let mut t = row(2, TransactionKind::Transfer);
        t.source_name = Some("Nubank".to_string());
        t.destination_name = Some("Supermarket".to_string());
        t.destination_type = Some("Expense account".to_string());

        let candidates = build_candidates(&[bad, t], &[]);
        assert_eq!(candidates.keys().collect::<Vec<_>>(), vec!["nubank"]);
    }

    #[test]
    fn test_crypto_inference_and_existing_category_wins() {
        assert_eq!(infer_category("Binance", None), AccountCategory::Crypto);
        assert_eq!(infer_category("Cold", Some("Crypto Wallet")), AccountCategory::Crypto);
        assert_eq!(infer_category("Checking", None), AccountCategory::Asset);

        let mut stored = Account::new(Uuid::new_v4(), "My Wallet", "BTC");
        stored.category = AccountCategory::Liability;
        let candidates = build_candidates(&[withdrawal(1, "my wallet")], &[stored]);
        assert_eq!(candidates["my wallet"].category, AccountCategory::Liability);
    }

    #[test]
    fn test_build_is_idempotent() {
        let existing = vec![Account::new(Uuid::new_v4(), "Nubank", "BRL")];
        let rows = vec![
            opening(1, "Binance", "3"),
            withdrawal(2, "Nubank"),
            opening(3, "Binance", "4"),
            withdrawal(4, "Inter"),
        ];
        assert_eq!(build_candidates(&rows, &existing), build_candidates(&rows, &existing));
    }

    #[test]
    fn test_diff_actions_and_order() {
        let mut nubank = Account::new(Uuid::new_v4(), "Nubank", "BRL");
        nubank.balance = dec("100");
        let untouched = Account::new(Uuid::new_v4(), "Savings", "EUR");
        let itau = Account::new(Uuid::new_v4(), "Itau", "BRL");
        let existing = vec![nubank.clone(), untouched.clone(), itau.clone()];

        let rows = vec![
            withdrawal(1, "Inter"),
            withdrawal(2, "nubank"),
            opening(3, "Itau", "50"),
        ];
        let candidates = build_candidates(&rows, &existing);
        let preview = diff_for_preview(&candidates, &existing);

        let summary: Vec<(&str, AccountAction)> =
            preview.iter().map(|p| (p.name.as_str(), p.action)).collect();
        assert_eq!(
            summary,
            vec![
                ("Inter", AccountAction::Create),
                ("Nubank", AccountAction::NoChange),
                ("Itau", AccountAction::Update),
                ("Savings", AccountAction::NoChange),
            ]
        );
        assert_eq!(preview[1].balance, dec("100"));
        assert_eq!(preview[2].balance, dec("50"));
    }

    #[tokio::test]
    async fn test_preview_mode_uses_placeholders() {
        let store: Arc<dyn Repository> = Arc::new(JsonStore::in_memory());
        let existing = vec![Account::new(Uuid::new_v4(), "Nubank", "BRL")];
        let candidates = build_candidates(&[withdrawal(1, "Nubank"), withdrawal(2, "New")], &existing);
        let preview = diff_for_preview(&candidates, &existing);

        let resolution =
            materialize_accounts(&preview, &existing, MaterializeMode::Preview, store.clone(), 2)
                .await
                .unwrap();
        assert_eq!(resolution.resolve("NUBANK"), Some(AccountRef::Persisted(existing[0].id)));
        assert_eq!(resolution.resolve("new"), Some(AccountRef::Placeholder));
        assert_eq!(resolution.persisted_id("new"), None);
        assert!(store.get_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_mode_writes_accounts() {
        let store: Arc<dyn Repository> = Arc::new(JsonStore::in_memory());
        let nubank = Account::new(Uuid::new_v4(), "Nubank", "BRL");
        store.add_account(&nubank).await.unwrap();
        let existing = vec![nubank.clone()];

        let rows = vec![opening(1, "Nubank", "75"), withdrawal(2, "Wallet"), withdrawal(3, "Inter")];
        let preview = diff_for_preview(&build_candidates(&rows, &existing), &existing);
        let resolution =
            materialize_accounts(&preview, &existing, MaterializeMode::Commit, store.clone(), 1)
                .await
                .unwrap();

        assert_eq!(resolution.created, 2);
        assert_eq!(resolution.updated, 1);
        assert_eq!(resolution.persisted_id("nubank"), Some(nubank.id));

        let stored = store.get_accounts().await.unwrap();
        assert_eq!(stored.len(), 3);
        let wallet_id = resolution.persisted_id("Wallet").unwrap();
        let wallet = stored.iter().find(|a| a.id == wallet_id).unwrap();
        assert_eq!(wallet.category, AccountCategory::Crypto);
        let updated = stored.iter().find(|a| a.id == nubank.id).unwrap();
        assert_eq!(updated.balance, dec("75"));
    }
}
