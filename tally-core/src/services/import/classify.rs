//! Row classification: raw CSV record -> typed, validated transaction row

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Account, Transaction, UNCATEGORIZED};

use super::error::RowError;
use super::mapping::{CanonicalField, ColumnMapping};
use super::normalize::{parse_amount, parse_date};
use super::reader::RawRecord;

/// What a row represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Withdrawal,
    Deposit,
    Transfer,
    OpeningBalance,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Transfer => "transfer",
            TransactionKind::OpeningBalance => "opening balance",
        }
    }

    /// Recognize a type column value; `Ok(None)` for a blank value
    fn parse(raw: Option<&str>) -> Result<Option<Self>, RowError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match raw.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "withdrawal" | "expense" | "debit" => Ok(Some(TransactionKind::Withdrawal)),
            "deposit" | "income" | "credit" => Ok(Some(TransactionKind::Deposit)),
            "transfer" => Ok(Some(TransactionKind::Transfer)),
            "opening balance" | "opening_balance" | "openingbalance" => {
                Ok(Some(TransactionKind::OpeningBalance))
            }
            _ => Err(RowError::UnknownType(raw.trim().to_string())),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-row progress through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Success,
    Error,
    Skipped,
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Success => "success",
            ImportStatus::Error => "error",
            ImportStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A row after classification
///
/// `status == Pending` guarantees `amount`, `date` and a non-empty
/// `currency`, plus the account names the kind needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedTransaction {
    /// 1-based data row in the source file
    pub row: usize,
    pub kind: Option<TransactionKind>,
    pub date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub source_name: Option<String>,
    pub destination_name: Option<String>,
    pub source_type: Option<String>,
    pub destination_type: Option<String>,
    /// Asset account of a withdrawal, deposit or opening balance
    pub account: Option<String>,
    pub foreign_amount: Option<Decimal>,
    pub foreign_currency: Option<String>,
    /// Fallback balance from an `initial_balance` column
    pub initial_balance: Option<Decimal>,
    pub status: ImportStatus,
    pub error_message: Option<String>,
}

impl ClassifiedTransaction {
    fn new(row: usize) -> Self {
        Self {
            row,
            kind: None,
            date: None,
            amount: None,
            currency: String::new(),
            description: String::new(),
            category: UNCATEGORIZED.to_string(),
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

    /// Mark the row as failed
    pub fn fail(&mut self, error: RowError) {
        tracing::warn!(row = self.row, error = %error, "row rejected");
        self.status = ImportStatus::Error;
        self.error_message = Some(error.to_string());
    }

    pub fn skip(&mut self, message: impl Into<String>) {
        self.status = ImportStatus::Skipped;
        self.error_message = Some(message.into());
    }

    pub fn succeed(&mut self) {
        self.status = ImportStatus::Success;
        self.error_message = None;
    }

    fn failed(mut self, error: RowError) -> Self {
        self.fail(error);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ImportStatus::Pending
    }

    pub fn is_opening_balance(&self) -> bool {
        self.kind == Some(TransactionKind::OpeningBalance)
    }

    /// Asset accounts this row touches, with the type hint of their side
    ///
    /// Transfer sides explicitly typed as expense or revenue accounts are
    /// left out.
    pub fn asset_accounts(&self) -> Vec<(&str, Option<&str>)> {
        match self.kind {
            Some(TransactionKind::Transfer) => [
                (self.source_name.as_deref(), self.source_type.as_deref()),
                (self.destination_name.as_deref(), self.destination_type.as_deref()),
            ]
            .into_iter()
            .filter_map(|(name, hint)| match name {
                Some(name) if !hint.is_some_and(is_non_asset_hint) => Some((name, hint)),
                _ => None,
            })
            .collect(),
            Some(_) => self
                .account
                .as_deref()
                .map(|name| (name, self.type_hint_for(name)))
                .into_iter()
                .collect(),
            None => Vec::new(),
        }
    }

    fn type_hint_for(&self, name: &str) -> Option<&str> {
        let key = Account::normalize_name(name);
        if self.source_name.as_deref().map(Account::normalize_name) == Some(key.clone()) {
            self.source_type.as_deref()
        } else if self.destination_name.as_deref().map(Account::normalize_name) == Some(key) {
            self.destination_type.as_deref()
        } else {
            None
        }
    }
}

/// Session-level inputs the file itself may not carry
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    /// Account to use when a row names none
    pub primary_account: Option<String>,
    /// Currency to use when a row has none
    pub default_currency: Option<String>,
}

static OPENING_BALANCE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:opening balance for|initial balance for|saldo inicial (?:para|de|da|do))\s+(.+?)\s*$")
        .expect("valid regex")
});

const ASSET_HINTS: &[&str] = &[
    "asset account",
    "asset",
    "default account",
    "cash account",
    "savings account",
];
const EXPENSE_HINTS: &[&str] = &["expense account", "expense"];
const REVENUE_HINTS: &[&str] = &["revenue account", "revenue"];
const OTHER_NON_ASSET_HINTS: &[&str] = &["initial balance account", "reconciliation account"];

fn hint_in(hint: &str, list: &[&str]) -> bool {
    let hint = hint.trim().to_lowercase();
    list.contains(&hint.as_str())
}

pub fn is_asset_hint(hint: &str) -> bool {
    hint_in(hint, ASSET_HINTS)
}

fn is_non_asset_hint(hint: &str) -> bool {
    hint_in(hint, EXPENSE_HINTS) || hint_in(hint, REVENUE_HINTS) || hint_in(hint, OTHER_NON_ASSET_HINTS)
}

/// Account name embedded in an opening-balance description
pub fn opening_balance_account(description: &str) -> Option<String> {
    OPENING_BALANCE_PHRASE
        .captures(description)
        .map(|c| c[1].to_string())
}

/// Split a tag cell on `,` or `;`
fn split_tags(raw: &str) -> Vec<String> {
    let parts: Vec<&str> = raw.split([',', ';']).collect();
    Transaction::normalize_tags(&parts)
}

fn amount_field(
    raw: Option<&str>,
    field: &'static str,
) -> Result<Option<Decimal>, RowError> {
    match raw {
        None => Ok(None),
        Some(value) => parse_amount(value)
            .map(Some)
            .ok_or_else(|| RowError::UnparsableAmount {
                field,
                value: value.to_string(),
            }),
    }
}

/// Signed amount from either the `amount` column or the income/expense pair
fn read_amount(get: &impl Fn(CanonicalField) -> Option<String>) -> Result<Decimal, RowError> {
    if let Some(amount) = amount_field(get(CanonicalField::Amount).as_deref(), "amount")? {
        return Ok(amount);
    }

    let income_raw = get(CanonicalField::AmountIncome);
    let expense_raw = get(CanonicalField::AmountExpense);
    let income = amount_field(income_raw.as_deref(), "amount_income")?;
    let expense = amount_field(expense_raw.as_deref(), "amount_expense")?;

    match (income, expense) {
        (Some(i), Some(e)) if !i.is_zero() && !e.is_zero() => Err(RowError::AmbiguousAmount {
            income: income_raw.unwrap_or_default(),
            expense: expense_raw.unwrap_or_default(),
        }),
        (Some(i), Some(_)) if !i.is_zero() => Ok(i.abs()),
        (Some(_), Some(e)) => Ok(-e.abs()),
        (Some(i), None) => Ok(i.abs()),
        (None, Some(e)) => Ok(-e.abs()),
        (None, None) => Err(RowError::MissingAmount),
    }
}

fn same_account(a: &str, b: &str) -> bool {
    Account::normalize_name(a) == Account::normalize_name(b)
}

/// Interpret one raw record under a mapping
///
/// Never fails: problems end up in the row's status and message.
pub fn classify(
    record: &RawRecord,
    mapping: &ColumnMapping,
    options: &ClassifyOptions,
) -> ClassifiedTransaction {
    let mut tx = ClassifiedTransaction::new(record.row);

    let get = |field: CanonicalField| -> Option<String> {
        mapping
            .get(field)
            .and_then(|header| record.get(header))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    tx.description = get(CanonicalField::Description).unwrap_or_default();
    tx.notes = get(CanonicalField::Notes);
    if let Some(category) = get(CanonicalField::Category) {
        tx.category = category;
    }
    if let Some(tags) = get(CanonicalField::Tags) {
        tx.tags = split_tags(&tags);
    }
    tx.source_name = get(CanonicalField::SourceName);
    tx.destination_name = get(CanonicalField::DestinationName);
    tx.source_type = get(CanonicalField::SourceType);
    tx.destination_type = get(CanonicalField::DestinationType);
    tx.currency = get(CanonicalField::CurrencyCode)
        .or_else(|| options.default_currency.clone())
        .map(|c| Account::normalize_currency(&c))
        .unwrap_or_default();

    if let Some(raw) = get(CanonicalField::InitialBalance) {
        match parse_amount(&raw) {
            Some(balance) => tx.initial_balance = Some(balance),
            None => tracing::warn!(row = tx.row, field = "initial_balance", value = %raw, "ignoring unparsable initial balance"),
        }
    }

    let explicit_kind = match TransactionKind::parse(get(CanonicalField::TransactionType).as_deref()) {
        Ok(kind) => kind,
        Err(e) => return tx.failed(e),
    };

    let date = match get(CanonicalField::Date) {
        Some(raw) => parse_date(&raw),
        None => return tx.failed(RowError::MissingDate),
    };
    tx.date = Some(date);

    let amount = match read_amount(&get) {
        Ok(amount) => amount,
        Err(RowError::MissingAmount) if tx.initial_balance.is_some() => {
            tx.initial_balance.unwrap_or_default()
        }
        Err(e) => return tx.failed(e),
    };

    if tx.currency.is_empty() {
        tx.amount = Some(amount);
        return tx.failed(RowError::MissingCurrency);
    }

    // the phrase wins over any other type column value
    let is_opening = explicit_kind == Some(TransactionKind::OpeningBalance)
        || opening_balance_account(&tx.description).is_some();
    if is_opening {
        return classify_opening_balance(tx, amount, get(CanonicalField::Account), options);
    }

    let account_column = get(CanonicalField::Account);
    let kind = explicit_kind.unwrap_or_else(|| infer_kind(&tx, amount));
    tx.kind = Some(kind);

    match kind {
        TransactionKind::Transfer => {
            tx.amount = Some(amount.abs());
            let (source, destination) = match (&tx.source_name, &tx.destination_name) {
                (Some(s), Some(d)) => (s.clone(), d.clone()),
                (None, _) => {
                    return tx.failed(RowError::MissingAccount {
                        kind: "transfer",
                        side: "source",
                    })
                }
                (_, None) => {
                    return tx.failed(RowError::MissingAccount {
                        kind: "transfer",
                        side: "destination",
                    })
                }
            };
            let both_asset = tx.source_type.as_deref().is_some_and(is_asset_hint)
                && tx.destination_type.as_deref().is_some_and(is_asset_hint);
            if both_asset && same_account(&source, &destination) {
                return tx.failed(RowError::SelfTransfer(source));
            }

            let foreign_amount = match amount_field(get(CanonicalField::ForeignAmount).as_deref(), "foreign_amount") {
                Ok(v) => v,
                Err(e) => return tx.failed(e),
            };
            let foreign_currency = get(CanonicalField::ForeignCurrencyCode)
                .map(|c| Account::normalize_currency(&c));
            if let (Some(fa), Some(fc)) = (foreign_amount, foreign_currency) {
                tx.foreign_amount = Some(fa.abs());
                tx.foreign_currency = Some(fc);
            }
        }
        _ => {
            let (side_name, side) = if kind == TransactionKind::Withdrawal {
                (tx.source_name.clone(), "source")
            } else {
                (tx.destination_name.clone(), "destination")
            };
            let Some(account) = side_name
                .or(account_column)
                .or_else(|| options.primary_account.clone())
            else {
                return tx.failed(RowError::MissingAccount {
                    kind: kind.as_str(),
                    side,
                });
            };
            tx.account = Some(account);
            tx.amount = Some(if kind == TransactionKind::Withdrawal {
                -amount.abs()
            } else {
                amount.abs()
            });
        }
    }

    tx
}

/// Kind of an untyped, non-opening-balance row
///
/// Without any account name the sign decides.
fn infer_kind(tx: &ClassifiedTransaction, amount: Decimal) -> TransactionKind {
    match (&tx.source_name, &tx.destination_name) {
        (Some(_), Some(_)) => {
            if tx.destination_type.as_deref().is_some_and(|t| hint_in(t, EXPENSE_HINTS)) {
                TransactionKind::Withdrawal
            } else if tx.source_type.as_deref().is_some_and(|t| hint_in(t, REVENUE_HINTS)) {
                TransactionKind::Deposit
            } else {
                TransactionKind::Transfer
            }
        }
        (Some(_), None) => TransactionKind::Withdrawal,
        (None, Some(_)) => TransactionKind::Deposit,
        (None, None) if amount.is_sign_negative() && !amount.is_zero() => TransactionKind::Withdrawal,
        (None, None) => TransactionKind::Deposit,
    }
}

fn classify_opening_balance(
    mut tx: ClassifiedTransaction,
    amount: Decimal,
    account_column: Option<String>,
    options: &ClassifyOptions,
) -> ClassifiedTransaction {
    tx.kind = Some(TransactionKind::OpeningBalance);

    let dest_asset = tx.destination_type.as_deref().is_some_and(is_asset_hint);
    let source_asset = tx.source_type.as_deref().is_some_and(is_asset_hint);

    // (name, taken from the source side)
    let picked: Option<(String, bool)> = if dest_asset && tx.destination_name.is_some() {
        tx.destination_name.clone().map(|n| (n, false))
    } else if source_asset && tx.source_name.is_some() {
        tx.source_name.clone().map(|n| (n, true))
    } else if let Some(name) = opening_balance_account(&tx.description) {
        Some((name, false))
    } else if let Some(name) = tx.destination_name.clone() {
        Some((name, false))
    } else if let Some(name) = tx.source_name.clone() {
        Some((name, true))
    } else {
        account_column
            .or_else(|| options.primary_account.clone())
            .map(|n| (n, false))
    };

    let Some((account, from_source)) = picked else {
        return tx.failed(RowError::MissingAccount {
            kind: "opening balance",
            side: "asset",
        });
    };

    let balance = if from_source && amount.is_sign_positive() && !amount.is_zero() {
        -amount
    } else {
        amount
    };

    tx.amount = Some(balance);
    let message = format!(
        "opening balance {} {} goes to account '{}'",
        balance, tx.currency, account
    );
    tx.account = Some(account);
    tx.skip(message);
    tx
}

/// Classify every record of a file
pub fn classify_all(
    records: &[RawRecord],
    mapping: &ColumnMapping,
    options: &ClassifyOptions,
) -> Vec<ClassifiedTransaction> {
    records
        .iter()
        .map(|record| classify(record, mapping, options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::str::FromStr;

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let fields: HashMap<String, Option<String>> = pairs
            .iter()
            .map(|(k, v)| {
                let value = if v.is_empty() { None } else { Some(v.to_string()) };
                (k.to_string(), value)
            })
            .collect();
        RawRecord { row: 7, fields }
    }

    fn identity_mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
        let mut mapping = ColumnMapping::new();
        for (header, _) in pairs {
            let field = match *header {
                "type" => CanonicalField::TransactionType,
                other => CanonicalField::from_key(other).unwrap(),
            };
            mapping.set(field, *header);
        }
        mapping
    }

    fn run(pairs: &[(&str, &str)]) -> ClassifiedTransaction {
        classify(&record(pairs), &identity_mapping(pairs), &ClassifyOptions::default())
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_opening_balance_from_asset_destination() {
        let tx = run(&[
            ("type", "opening balance"),
            ("date", "2024-01-01"),
            ("destination_name", "Nubank"),
            ("destination_type", "asset account"),
            ("amount", "1500,00"),
            ("currency_code", "brl"),
        ]);
        assert_eq!(tx.kind, Some(TransactionKind::OpeningBalance));
        assert_eq!(tx.status, ImportStatus::Skipped);
        assert_eq!(tx.account.as_deref(), Some("Nubank"));
        assert_eq!(tx.amount, Some(dec("1500.00")));
        assert_eq!(tx.currency, "BRL");
        assert!(tx.error_message.unwrap().contains("Nubank"));
    }

    #[test]
    fn test_opening_balance_from_phrase() {
        let tx = run(&[
            ("date", "01/01/2024"),
            ("description", "Saldo inicial para Conta Corrente"),
            ("amount", "250"),
            ("currency_code", "BRL"),
        ]);
        assert_eq!(tx.kind, Some(TransactionKind::OpeningBalance));
        assert_eq!(tx.account.as_deref(), Some("Conta Corrente"));
    }

    #[test]
    fn test_opening_phrase_overrides_type_column() {
        let tx = run(&[
            ("type", "deposit"),
            ("date", "2024-01-01"),
            ("destination_name", "Nubank"),
            ("destination_type", "asset account"),
            ("description", "Saldo inicial para Nubank"),
            ("amount", "1500,00"),
            ("currency_code", "BRL"),
        ]);
        assert_eq!(tx.kind, Some(TransactionKind::OpeningBalance));
        assert_eq!(tx.status, ImportStatus::Skipped);
        assert_eq!(tx.account.as_deref(), Some("Nubank"));
        assert_eq!(tx.amount, Some(dec("1500.00")));
    }

    #[test]
    fn test_opening_balance_on_asset_source_is_negated() {
        let tx = run(&[
            ("type", "opening balance"),
            ("date", "2024-01-01"),
            ("source_name", "Card"),
            ("source_type", "asset account"),
            ("destination_name", "Initial balance for Card"),
            ("destination_type", "initial balance account"),
            ("amount", "300"),
            ("currency_code", "USD"),
        ]);
        assert_eq!(tx.account.as_deref(), Some("Card"));
        assert_eq!(tx.amount, Some(dec("-300")));
    }

    #[test]
    fn test_withdrawal_forces_negative() {
        let tx = run(&[
            ("type", "withdrawal"),
            ("date", "2024-02-01"),
            ("source_name", "Nubank"),
            ("amount", "50.00"),
            ("currency_code", "BRL"),
        ]);
        assert!(tx.is_pending());
        assert_eq!(tx.kind, Some(TransactionKind::Withdrawal));
        assert_eq!(tx.account.as_deref(), Some("Nubank"));
        assert_eq!(tx.amount, Some(dec("-50.00")));
    }

    #[test]
    fn test_deposit_forces_positive() {
        let tx = run(&[
            ("type", "Deposit"),
            ("date", "2024-02-01"),
            ("destination_name", "Nubank"),
            ("amount", "-50.00"),
            ("currency_code", "BRL"),
        ]);
        assert_eq!(tx.kind, Some(TransactionKind::Deposit));
        assert_eq!(tx.amount, Some(dec("50.00")));
    }

    #[test]
    fn test_untyped_two_names_is_transfer_with_absolute_amount() {
        let tx = run(&[
            ("date", "2024-02-01"),
            ("source_name", "Nubank"),
            ("destination_name", "Binance"),
            ("amount", "-100"),
            ("currency_code", "BRL"),
            ("foreign_amount", "-18.50"),
            ("foreign_currency_code", "usdt"),
        ]);
        assert_eq!(tx.kind, Some(TransactionKind::Transfer));
        assert_eq!(tx.amount, Some(dec("100")));
        assert_eq!(tx.foreign_amount, Some(dec("18.50")));
        assert_eq!(tx.foreign_currency.as_deref(), Some("USDT"));
        assert_eq!(tx.asset_accounts().len(), 2);
    }

    #[test]
    fn test_untyped_expense_destination_is_withdrawal() {
        let tx = run(&[
            ("date", "2024-02-01"),
            ("source_name", "Nubank"),
            ("source_type", "Asset account"),
            ("destination_name", "Padaria"),
            ("destination_type", "Expense account"),
            ("amount", "12"),
            ("currency_code", "BRL"),
        ]);
        assert_eq!(tx.kind, Some(TransactionKind::Withdrawal));
        assert_eq!(tx.account.as_deref(), Some("Nubank"));
        assert_eq!(tx.asset_accounts(), vec![("Nubank", Some("Asset account"))]);
    }

    #[test]
    fn test_self_transfer_between_assets_is_error() {
        let tx = run(&[
            ("type", "transfer"),
            ("date", "2024-02-01"),
            ("source_name", "A"),
            ("source_type", "asset account"),
            ("destination_name", " a "),
            ("destination_type", "asset account"),
            ("amount", "10"),
            ("currency_code", "USD"),
        ]);
        assert_eq!(tx.status, ImportStatus::Error);
        assert!(tx.error_message.unwrap().contains("same account"));
    }

    #[test]
    fn test_transfer_missing_destination() {
        let tx = run(&[
            ("type", "transfer"),
            ("date", "2024-02-01"),
            ("source_name", "A"),
            ("amount", "10"),
            ("currency_code", "USD"),
        ]);
        assert_eq!(tx.status, ImportStatus::Error);
        assert!(tx.error_message.unwrap().contains("destination"));
    }

    #[test]
    fn test_unparsable_amount_is_error() {
        let tx = run(&[
            ("date", "2024-02-01"),
            ("account", "Nubank"),
            ("amount", "abc"),
            ("currency_code", "BRL"),
        ]);
        assert_eq!(tx.status, ImportStatus::Error);
        assert_eq!(tx.error_message.as_deref(), Some("unparsable amount 'abc'"));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let tx = run(&[
            ("type", "reconciliation"),
            ("date", "2024-02-01"),
            ("account", "Nubank"),
            ("amount", "1"),
            ("currency_code", "BRL"),
        ]);
        assert_eq!(tx.status, ImportStatus::Error);
        assert!(tx.error_message.unwrap().contains("reconciliation"));
    }

    #[test]
    fn test_missing_date_and_currency() {
        let tx = run(&[("account", "X"), ("amount", "1"), ("currency_code", "BRL")]);
        assert_eq!(tx.error_message.as_deref(), Some("missing date"));

        let tx = run(&[("date", "2024-01-01"), ("account", "X"), ("amount", "1")]);
        assert_eq!(tx.error_message.as_deref(), Some("missing currency"));
    }

    #[test]
    fn test_default_currency_and_primary_account() {
        let pairs = [("date", "2024-01-01"), ("amount", "-9,90")];
        let options = ClassifyOptions {
            primary_account: Some("Checking".to_string()),
            default_currency: Some("eur".to_string()),
        };
        let tx = classify(&record(&pairs), &identity_mapping(&pairs), &options);
        assert!(tx.is_pending());
        assert_eq!(tx.kind, Some(TransactionKind::Withdrawal));
        assert_eq!(tx.account.as_deref(), Some("Checking"));
        assert_eq!(tx.currency, "EUR");
        assert_eq!(tx.amount, Some(dec("-9.90")));
    }

    #[test]
    fn test_income_expense_columns() {
        let base = [("date", "2024-01-01"), ("account", "X"), ("currency_code", "USD")];

        let mut pairs = base.to_vec();
        pairs.extend([("amount_income", ""), ("amount_expense", "20")]);
        let tx = run(&pairs);
        assert_eq!(tx.kind, Some(TransactionKind::Withdrawal));
        assert_eq!(tx.amount, Some(dec("-20")));

        let mut pairs = base.to_vec();
        pairs.extend([("amount_income", "30"), ("amount_expense", "0")]);
        let tx = run(&pairs);
        assert_eq!(tx.kind, Some(TransactionKind::Deposit));
        assert_eq!(tx.amount, Some(dec("30")));

        let mut pairs = base.to_vec();
        pairs.extend([("amount_income", "30"), ("amount_expense", "20")]);
        let tx = run(&pairs);
        assert_eq!(tx.status, ImportStatus::Error);
        assert!(tx.error_message.unwrap().contains("both income"));
    }

    #[test]
    fn test_category_default_and_tags() {
        let tx = run(&[
            ("date", "2024-01-01"),
            ("account", "X"),
            ("amount", "1"),
            ("currency_code", "USD"),
            ("tags", "food; Food,,travel"),
        ]);
        assert_eq!(tx.category, UNCATEGORIZED);
        assert_eq!(tx.tags, vec!["food".to_string(), "travel".to_string()]);
    }

    #[test]
    fn test_pending_rows_have_amount_and_currency() {
        let rows = [
            vec![("date", "2024-01-01"), ("account", "X"), ("amount", "1"), ("currency_code", "USD")],
            vec![("date", "2024-01-01"), ("account", "X"), ("amount", "x"), ("currency_code", "USD")],
            vec![("date", "2024-01-01"), ("account", "X"), ("amount", "1")],
            vec![("date", "bogus"), ("source_name", "A"), ("destination_name", "B"), ("amount", "2"), ("currency_code", "EUR")],
        ];
        for pairs in rows {
            let tx = run(&pairs);
            if tx.is_pending() {
                assert!(tx.amount.is_some());
                assert!(!tx.currency.is_empty());
                assert!(tx.date.is_some());
            }
        }
    }
}
