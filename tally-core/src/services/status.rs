//! Status service - account balances and net worth

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::currency::convert;
use crate::domain::result::Result;
use crate::domain::{AccountCategory, RateTable};
use crate::ports::Repository;

/// Status service for account summaries
pub struct StatusService {
    repository: Arc<dyn Repository>,
}

impl StatusService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Summarize accounts and net worth in `target_currency`
    ///
    /// Accounts excluded from net worth, inactive, or without a rate for
    /// their currency are listed but left out of the total.
    pub async fn summary(&self, target_currency: &str, rates: &RateTable) -> Result<StatusSummary> {
        let target = target_currency.trim().to_uppercase();
        let (mut accounts, transactions) =
            tokio::try_join!(self.repository.get_accounts(), self.repository.get_transactions())?;
        accounts.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        let mut net_worth = Decimal::ZERO;
        let mut unconverted = Vec::new();
        let mut rows = Vec::with_capacity(accounts.len());

        for account in accounts {
            let converted = convert(account.balance, &account.currency, &target, rates);
            let counted = account.include_in_net_worth && account.is_active;
            match (counted, converted) {
                (true, Some(value)) => {
                    net_worth += match account.category {
                        AccountCategory::Liability => -value.abs(),
                        _ => value,
                    };
                }
                (true, None) => unconverted.push(account.name.clone()),
                (false, _) => {}
            }
            rows.push(AccountSummary {
                id: account.id.to_string(),
                transaction_count: transactions.iter().filter(|t| t.account_id == account.id).count(),
                name: account.name,
                category: account.category,
                currency: account.currency,
                balance: account.balance,
                converted_balance: converted,
                included: counted && converted.is_some(),
            });
        }

        Ok(StatusSummary {
            target_currency: target,
            total_accounts: rows.len(),
            total_transactions: transactions.len(),
            net_worth,
            unconverted,
            accounts: rows,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub target_currency: String,
    pub total_accounts: usize,
    pub total_transactions: usize,
    pub net_worth: Decimal,
    /// Counted accounts with no rate into the target currency
    pub unconverted: Vec<String>,
    pub accounts: Vec<AccountSummary>,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    pub category: AccountCategory,
    pub currency: String,
    pub balance: Decimal,
    pub converted_balance: Option<Decimal>,
    pub included: bool,
    pub transaction_count: usize,
}
