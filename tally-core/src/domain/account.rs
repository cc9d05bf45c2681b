//! Account domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Balance classification used for grouping and net worth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountCategory {
    Asset,
    Crypto,
    Liability,
}

impl AccountCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountCategory::Asset => "asset",
            AccountCategory::Crypto => "crypto",
            AccountCategory::Liability => "liability",
        }
    }
}

impl fmt::Display for AccountCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asset" => Ok(AccountCategory::Asset),
            "crypto" => Ok(AccountCategory::Crypto),
            "liability" => Ok(AccountCategory::Liability),
            other => Err(format!("unknown account category '{}'", other)),
        }
    }
}

/// A financial account owned by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    /// ISO 4217-ish currency code, normalized to uppercase
    pub currency: String,
    pub balance: Decimal,
    pub category: AccountCategory,
    /// Free-form type label ("checking", "savings", "wallet", ...)
    pub account_type: Option<String>,
    pub provider_name: Option<String>,
    pub is_active: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub include_in_net_worth: bool,
    /// Document id in the `groups` collection
    pub group_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active asset account with a zero balance
    pub fn new(id: Uuid, name: impl Into<String>, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            currency: Self::normalize_currency(currency),
            balance: Decimal::ZERO,
            category: AccountCategory::Asset,
            account_type: None,
            provider_name: None,
            is_active: true,
            last_activity: None,
            include_in_net_worth: true,
            group_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Normalize currency code to uppercase
    pub fn normalize_currency(currency: &str) -> String {
        currency.trim().to_uppercase()
    }

    /// Normalize an account name for case-insensitive matching
    ///
    /// Trims, collapses inner whitespace and lowercases.
    pub fn normalize_name(name: &str) -> String {
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Normalized key of this account's name
    pub fn key(&self) -> String {
        Self::normalize_name(&self.name)
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty");
        }
        if self.currency.trim().is_empty() {
            return Err("currency cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalization() {
        assert_eq!(Account::normalize_currency("usd"), "USD");
        assert_eq!(Account::normalize_currency(" eur "), "EUR");
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(Account::normalize_name("  Nubank  "), "nubank");
        assert_eq!(Account::normalize_name("Main   Checking"), "main checking");
        assert_eq!(
            Account::normalize_name("MAIN checking"),
            Account::normalize_name("main Checking")
        );
    }

    #[test]
    fn test_account_validation() {
        let mut account = Account::new(Uuid::new_v4(), "Test Account", "usd");
        assert!(account.validate().is_ok());
        assert_eq!(account.currency, "USD");

        account.name = "".to_string();
        assert!(account.validate().is_err());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Crypto".parse::<AccountCategory>(), Ok(AccountCategory::Crypto));
        assert!("bogus".parse::<AccountCategory>().is_err());
        assert_eq!(AccountCategory::Asset.to_string(), "asset");
    }
}
