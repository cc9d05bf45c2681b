//! Column mapping between CSV headers and canonical import fields

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fields the import pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Date,
    Amount,
    AmountIncome,
    AmountExpense,
    Description,
    SourceName,
    DestinationName,
    SourceType,
    DestinationType,
    Category,
    CurrencyCode,
    ForeignCurrencyCode,
    ForeignAmount,
    Tags,
    Notes,
    TransactionType,
    #[serde(alias = "initialBalance")]
    InitialBalance,
    Account,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 18] = [
        CanonicalField::Date,
        CanonicalField::Amount,
        CanonicalField::AmountIncome,
        CanonicalField::AmountExpense,
        CanonicalField::Description,
        CanonicalField::SourceName,
        CanonicalField::DestinationName,
        CanonicalField::SourceType,
        CanonicalField::DestinationType,
        CanonicalField::Category,
        CanonicalField::CurrencyCode,
        CanonicalField::ForeignCurrencyCode,
        CanonicalField::ForeignAmount,
        CanonicalField::Tags,
        CanonicalField::Notes,
        CanonicalField::TransactionType,
        CanonicalField::InitialBalance,
        CanonicalField::Account,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            CanonicalField::Date => "date",
            CanonicalField::Amount => "amount",
            CanonicalField::AmountIncome => "amount_income",
            CanonicalField::AmountExpense => "amount_expense",
            CanonicalField::Description => "description",
            CanonicalField::SourceName => "source_name",
            CanonicalField::DestinationName => "destination_name",
            CanonicalField::SourceType => "source_type",
            CanonicalField::DestinationType => "destination_type",
            CanonicalField::Category => "category",
            CanonicalField::CurrencyCode => "currency_code",
            CanonicalField::ForeignCurrencyCode => "foreign_currency_code",
            CanonicalField::ForeignAmount => "foreign_amount",
            CanonicalField::Tags => "tags",
            CanonicalField::Notes => "notes",
            CanonicalField::TransactionType => "transaction_type",
            CanonicalField::InitialBalance => "initial_balance",
            CanonicalField::Account => "account",
        }
    }

    /// Parse a field key as typed by a user (`--map currency_code=Moeda`)
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase();
        if key == "initialbalance" {
            return Some(CanonicalField::InitialBalance);
        }
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Header spellings recognized for this field (compared lowercase)
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::Date => &["date", "transaction_date", "transaction date", "booking_date", "data"],
            CanonicalField::Amount => &["amount", "value", "valor"],
            CanonicalField::AmountIncome => &["amount_income", "income", "credit"],
            CanonicalField::AmountExpense => &["amount_expense", "expense", "debit"],
            CanonicalField::Description => &["description", "memo", "payee", "descricao", "descrição"],
            CanonicalField::SourceName => &["source_name", "source", "source_account"],
            CanonicalField::DestinationName => &["destination_name", "destination", "destination_account"],
            CanonicalField::SourceType => &["source_type"],
            CanonicalField::DestinationType => &["destination_type"],
            CanonicalField::Category => &["category", "category_name", "categoria"],
            CanonicalField::CurrencyCode => &["currency_code", "currency", "moeda"],
            CanonicalField::ForeignCurrencyCode => &["foreign_currency_code", "foreign_currency"],
            CanonicalField::ForeignAmount => &["foreign_amount"],
            CanonicalField::Tags => &["tags", "labels"],
            CanonicalField::Notes => &["notes", "note", "comment"],
            CanonicalField::TransactionType => &["type", "transaction_type"],
            CanonicalField::InitialBalance => &["initial_balance", "initialbalance", "opening_balance"],
            CanonicalField::Account => &["account", "account_name", "conta"],
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Canonical field -> originating CSV header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    columns: BTreeMap<CanonicalField, String>,
}

/// Why a mapping cannot be used yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MappingIssue {
    Missing(&'static str),
    UnknownHeader { field: CanonicalField, header: String },
}

impl fmt::Display for MappingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingIssue::Missing(what) => write!(f, "{} must be mapped", what),
            MappingIssue::UnknownHeader { field, header } => {
                write!(f, "{} is mapped to '{}' which is not a column", field, header)
            }
        }
    }
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn set(&mut self, field: CanonicalField, header: impl Into<String>) {
        self.columns.insert(field, header.into());
    }

    pub fn with(mut self, field: CanonicalField, header: impl Into<String>) -> Self {
        self.set(field, header);
        self
    }

    pub fn clear(&mut self, field: CanonicalField) {
        self.columns.remove(&field);
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.columns.iter().map(|(f, h)| (*f, h.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check the mapping is complete enough to classify rows
    ///
    /// Needs a date, an amount (or income and expense), and an account
    /// reference: a single account column, a source+destination pair, or a
    /// primary account chosen outside the file. All issues are reported.
    pub fn validate(&self, headers: &[String], primary_account: Option<&str>) -> Result<(), Vec<MappingIssue>> {
        let known: HashSet<&str> = headers.iter().map(String::as_str).collect();
        let mut issues: Vec<MappingIssue> = self
            .columns
            .iter()
            .filter(|(_, header)| !known.contains(header.as_str()))
            .map(|(field, header)| MappingIssue::UnknownHeader {
                field: *field,
                header: header.clone(),
            })
            .collect();

        if !self.is_mapped(CanonicalField::Date) {
            issues.push(MappingIssue::Missing("date"));
        }

        let split_amount = self.is_mapped(CanonicalField::AmountIncome)
            && self.is_mapped(CanonicalField::AmountExpense);
        if !self.is_mapped(CanonicalField::Amount) && !split_amount {
            issues.push(MappingIssue::Missing("amount (or amount_income and amount_expense)"));
        }

        let pair = self.is_mapped(CanonicalField::SourceName)
            && self.is_mapped(CanonicalField::DestinationName);
        let has_primary = primary_account.is_some_and(|p| !p.trim().is_empty());
        if !self.is_mapped(CanonicalField::Account) && !pair && !has_primary {
            issues.push(MappingIssue::Missing(
                "account (or source_name and destination_name)",
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// Best-guess mapping from headers by exact, case-insensitive alias match
///
/// Each header feeds at most one field; no partial matching is attempted.
pub fn guess_mapping(headers: &[String]) -> ColumnMapping {
    let mut mapping = ColumnMapping::new();
    let mut taken: HashSet<usize> = HashSet::new();

    for field in CanonicalField::ALL {
        let aliases = field.aliases();
        let found = aliases.iter().find_map(|alias| {
            headers.iter().enumerate().find(|(i, h)| {
                !taken.contains(i) && h.trim().to_lowercase() == *alias
            })
        });
        if let Some((i, header)) = found {
            taken.insert(i);
            mapping.set(field, header.clone());
        }
    }

    mapping
}
