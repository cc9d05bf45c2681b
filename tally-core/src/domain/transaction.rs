//! Transaction domain model

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Original import data kept on a committed transaction for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportMetadata {
    /// Which import batch this transaction belongs to
    pub batch_id: String,
    /// 1-based data row in the source file
    pub row: usize,
    pub fingerprint: String,
    pub foreign_amount: Option<Decimal>,
    pub foreign_currency: Option<String>,
}

/// A single financial transaction belonging to an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub date: NaiveDate,
    /// Signed amount in `currency`; negative leaves the account
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub import: Option<ImportMetadata>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction with required fields
    pub fn new(
        id: Uuid,
        account_id: Uuid,
        amount: Decimal,
        currency: &str,
        date: NaiveDate,
    ) -> Self {
        Self {
            id,
            account_id,
            date,
            amount,
            currency: currency.trim().to_uppercase(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            import: None,
            created_at: Utc::now(),
        }
    }

    /// Calculate fingerprint hash for re-import detection
    ///
    /// Uses account_id, date, amount (with sign) and lowercased description.
    pub fn calculate_fingerprint(&self) -> String {
        // treat -0 as 0
        let amount = if self.amount.is_zero() {
            Decimal::ZERO
        } else {
            self.amount
        };
        let input = format!(
            "{}|{}|{:.2}|{}",
            self.account_id,
            self.date.format("%Y-%m-%d"),
            amount,
            self.description.trim().to_lowercase()
        );

        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..8])
    }

    /// Normalize tags: trim whitespace, remove empty, deduplicate case-insensitively
    ///
    /// The first spelling of a tag wins and order is preserved.
    pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for tag in tags {
            let trimmed = tag.as_ref().trim();
            if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
                result.push(trimmed.to_string());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(amount: Decimal) -> Transaction {
        let account_id = Uuid::parse_str("12345678-1234-1234-1234-123456789abc").unwrap();
        let mut tx = Transaction::new(
            Uuid::new_v4(),
            account_id,
            amount,
            "brl",
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        );
        tx.description = "ACME STORE".to_string();
        tx
    }

    #[test]
    fn test_fingerprint_generation() {
        let tx = sample(Decimal::new(-5000, 2));
        let fp = tx.calculate_fingerprint();
        assert_eq!(fp.len(), 16);
        assert_eq!(tx.currency, "BRL");
    }

    #[test]
    fn test_fingerprint_ignores_id_and_case() {
        let a = sample(Decimal::new(-5000, 2));
        let mut b = sample(Decimal::new(-5000, 2));
        b.description = "acme store".to_string();
        assert_eq!(a.calculate_fingerprint(), b.calculate_fingerprint());

        let c = sample(Decimal::new(5000, 2));
        assert_ne!(a.calculate_fingerprint(), c.calculate_fingerprint());
    }

    #[test]
    fn test_tag_normalization() {
        let tags = vec![
            "food".to_string(),
            "  groceries ".to_string(),
            "Food".to_string(), // duplicate, different case
            "".to_string(),     // empty
        ];
        let normalized = Transaction::normalize_tags(&tags);
        assert_eq!(normalized, vec!["food", "groceries"]);
    }
}
