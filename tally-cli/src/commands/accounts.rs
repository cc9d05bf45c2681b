//! Accounts command - balances and net worth

use anyhow::Result;
use colored::Colorize;

use super::get_context;
use crate::output::{create_table, format_amount, warning};
use tally_core::RateTable;

pub async fn run(currency: Option<String>, json: bool) -> Result<()> {
    let ctx = get_context()?;

    let rates = ctx.config.rates.clone().unwrap_or_default();
    let target = currency
        .or_else(|| (!rates.base_currency.is_empty()).then(|| rates.base_currency.clone()))
        .or_else(|| ctx.config.default_currency.clone())
        .unwrap_or_else(|| "USD".to_string());
    let rates = if rates.base_currency.is_empty() {
        RateTable::new(&target)
    } else {
        rates
    };

    let summary = ctx.status_service.summary(&target, &rates).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.accounts.is_empty() {
        println!("No accounts yet. Import a file with `tally import <file>`.");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Account", "Category", "Balance", "Transactions", "Net worth"]);
    for account in &summary.accounts {
        let counted = match (account.included, account.converted_balance) {
            (true, Some(value)) => format_amount(value, &summary.target_currency),
            (false, Some(_)) => "excluded".to_string(),
            (_, None) => "no rate".to_string(),
        };
        table.add_row(vec![
            account.name.clone(),
            account.category.to_string(),
            format_amount(account.balance, &account.currency),
            account.transaction_count.to_string(),
            counted,
        ]);
    }
    println!("{}", table);
    println!();
    println!(
        "{} {}",
        "Net worth:".bold(),
        format_amount(summary.net_worth, &summary.target_currency)
    );

    if !summary.unconverted.is_empty() {
        warning(&format!(
            "Not counted (no {} rate): {}",
            summary.target_currency,
            summary.unconverted.join(", ")
        ));
    }

    Ok(())
}
