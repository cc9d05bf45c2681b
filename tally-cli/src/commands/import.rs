//! Import command - import transactions from CSV/ZIP ledger exports

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};

use super::backup::{confirm_restore, print_restore};
use super::get_context;
use crate::output::{create_table, format_amount, info, success, warning};
use tally_core::config::ImportProfile;
use tally_core::services::import::{
    AccountAction, CanonicalField, ClassifyOptions, ColumnMapping, ImportError, ImportPreview,
    ImportProgress, ImportReport, ImportStatus, RunOptions,
};
use tally_core::services::OpenedImport;
use tally_core::TallyContext;

/// Rows with errors shown in the preview before "... and N more"
const SHOWN_ERRORS: usize = 10;

#[derive(Args)]
pub struct ImportArgs {
    /// Path to a CSV/TSV file or ZIP archive
    pub file: Option<PathBuf>,
    /// Preview without importing
    #[arg(long)]
    pub preview: bool,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
    /// Use a saved import profile
    #[arg(long)]
    pub profile: Option<String>,
    /// Save the mapping and options as a profile
    #[arg(long)]
    pub save_profile: Option<String>,
    /// List saved profiles
    #[arg(long)]
    pub list_profiles: bool,
    /// Override a column mapping, e.g. --map amount=Valor
    #[arg(long = "map", value_name = "FIELD=HEADER")]
    pub map: Vec<String>,
    /// Account for rows that name none
    #[arg(long)]
    pub account: Option<String>,
    /// Currency for rows that carry none
    #[arg(long)]
    pub currency: Option<String>,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ImportArgs) -> Result<()> {
    let ctx = get_context()?;

    if args.list_profiles {
        return list_profiles(&ctx, args.json);
    }

    let file = args.file.as_ref().context("File path required for import")?;
    let mut session = match ctx.import_service.open(file)? {
        OpenedImport::Session(session) => session,
        OpenedImport::Backup(bytes) => {
            if !args.json {
                info("This file is a full backup, not a ledger export.");
            }
            if !args.yes && !args.json && !confirm_restore(file)? {
                println!("Cancelled.");
                return Ok(());
            }
            let summary = ctx.backup_service.restore_bytes(&bytes, args.yes).await?;
            return print_restore(&summary, args.json);
        }
    };

    let profile = args
        .profile
        .as_deref()
        .map(|name| ctx.import_service.get_profile(name))
        .transpose()?;

    let mut mapping = match &profile {
        Some(profile) => profile.column_mapping.clone(),
        None => session.suggested_mapping(),
    };
    for entry in &args.map {
        apply_override(&mut mapping, entry)?;
    }

    let options = ClassifyOptions {
        primary_account: args
            .account
            .clone()
            .or_else(|| profile.as_ref().and_then(|p| p.primary_account.clone())),
        default_currency: args
            .currency
            .clone()
            .or_else(|| profile.as_ref().and_then(|p| p.default_currency.clone()))
            .or_else(|| ctx.config.default_currency.clone()),
    };

    if !args.json {
        match &args.profile {
            Some(name) => info(&format!("Using profile '{}'", name)),
            None => info("Auto-detected columns:"),
        }
        print_mapping(&mapping);
    }

    match session.confirm_mapping(mapping.clone(), options.clone()) {
        Ok(()) => {}
        Err(ImportError::InvalidMapping(issues)) => {
            for issue in &issues {
                warning(&format!("  {}", issue));
            }
            anyhow::bail!("Column mapping is incomplete; fix it with --map FIELD=HEADER");
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(name) = &args.save_profile {
        ctx.import_service.save_profile(
            name,
            ImportProfile {
                column_mapping: mapping,
                primary_account: options.primary_account,
                default_currency: options.default_currency,
            },
        )?;
        if !args.json {
            success(&format!("Profile '{}' saved", name));
        }
    }

    let preview = ctx.import_service.preview(&mut session).await?;

    if args.preview {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&preview)?);
        } else {
            warning("PREVIEW MODE - No changes applied");
            print_preview(&preview);
        }
        return Ok(());
    }

    if !args.json {
        print_preview(&preview);
    }

    if preview.counts.pending == 0 {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&preview)?);
        } else {
            warning("Nothing to import.");
        }
        return Ok(());
    }

    if !args.yes && !args.json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Import {} row(s)?", preview.counts.pending))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let mut run_options = ctx.import_service.run_options()?;
    let bar = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(
        ProgressStyle::with_template("{msg:>22} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    let progress_bar = bar.clone();
    run_options.progress = Some(std::sync::Arc::new(move |p: ImportProgress| {
        progress_bar.set_message(p.phase.to_string());
        progress_bar.set_length(p.total as u64);
        progress_bar.set_position(p.processed as u64);
    }));
    watch_ctrl_c(&run_options);

    let result = ctx.import_service.run(&mut session, &run_options).await;
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(e) => {
            if args.json {
                let rows: Vec<_> = session
                    .rows()
                    .iter()
                    .map(|r| serde_json::json!({"row": r.row, "status": r.status, "message": r.error_message}))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({"error": e.to_string(), "rows": rows}))?
                );
            }
            Err(e.into())
        }
    }
}

/// Cancel the run on Ctrl-C; rows not yet started are skipped
fn watch_ctrl_c(options: &RunOptions) {
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancellation requested");
            cancel.cancel();
        }
    });
}

fn apply_override(mapping: &mut ColumnMapping, entry: &str) -> Result<()> {
    let (field, header) = entry
        .split_once('=')
        .with_context(|| format!("Expected FIELD=HEADER, got '{}'", entry))?;
    let field = CanonicalField::from_key(field.trim()).with_context(|| {
        let known: Vec<&str> = CanonicalField::ALL.iter().map(|f| f.key()).collect();
        format!("Unknown field '{}'; expected one of {}", field.trim(), known.join(", "))
    })?;
    let header = header.trim();
    if header.is_empty() {
        mapping.clear(field);
    } else {
        mapping.set(field, header);
    }
    Ok(())
}

fn list_profiles(ctx: &TallyContext, json: bool) -> Result<()> {
    let profiles = ctx.import_service.list_profiles()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }
    if profiles.is_empty() {
        println!("No saved profiles.");
        return Ok(());
    }
    println!("Saved import profiles:");
    for (name, profile) in &profiles {
        println!();
        println!("  {}", name.green());
        for (field, header) in profile.column_mapping.iter() {
            println!("    {}: {}", field, header);
        }
        if let Some(account) = &profile.primary_account {
            println!("    Account: {}", account);
        }
        if let Some(currency) = &profile.default_currency {
            println!("    Currency: {}", currency);
        }
    }
    Ok(())
}

fn print_mapping(mapping: &ColumnMapping) {
    if mapping.is_empty() {
        println!("  (no columns recognized)");
    }
    for (field, header) in mapping.iter() {
        println!("  {:<18} {}", field.to_string(), header);
    }
    println!();
}

fn print_preview(preview: &ImportPreview) {
    if !preview.accounts.is_empty() {
        println!("{}", "Accounts".bold());
        let mut table = create_table();
        table.set_header(vec!["Account", "Action", "Category", "Opening balance"]);
        for account in &preview.accounts {
            let action = match account.action {
                AccountAction::Create => "create".green().to_string(),
                AccountAction::Update => "update".yellow().to_string(),
                AccountAction::NoChange => "unchanged".dimmed().to_string(),
            };
            table.add_row(vec![
                account.name.clone(),
                action,
                account.category.to_string(),
                format_amount(account.balance, &account.currency),
            ]);
        }
        println!("{}", table);
        for account in preview.accounts.iter().filter(|a| a.superseded_balances > 0) {
            warning(&format!(
                "{}: {} earlier opening balance(s) ignored, the last one wins",
                account.name, account.superseded_balances
            ));
        }
        println!();
    }

    if !preview.new_categories.is_empty() {
        println!("New categories: {}", preview.new_categories.join(", "));
    }
    if !preview.new_tags.is_empty() {
        println!("New tags: {}", preview.new_tags.join(", "));
    }

    let counts = preview.counts;
    println!(
        "Rows: {} to import, {} skipped, {} with errors",
        counts.pending.to_string().green(),
        counts.skipped,
        counts.error.to_string().red()
    );

    let errors: Vec<_> = preview
        .rows
        .iter()
        .filter(|r| r.status == ImportStatus::Error)
        .collect();
    for row in errors.iter().take(SHOWN_ERRORS) {
        println!(
            "  row {}: {}",
            row.row,
            row.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    if errors.len() > SHOWN_ERRORS {
        println!("  ... and {} more", errors.len() - SHOWN_ERRORS);
    }
    println!();
}

fn print_report(report: &ImportReport) {
    if report.cancelled {
        warning("Import cancelled");
    } else {
        success("Import complete");
    }
    println!();
    println!("  Imported: {}", report.counts.success);
    println!("  Skipped: {}", report.counts.skipped);
    if report.duplicates > 0 {
        println!("    already imported: {}", report.duplicates);
    }
    println!("  Errors: {}", report.counts.error);
    println!(
        "  Accounts: {} created, {} updated",
        report.accounts_created, report.accounts_updated
    );
    if report.categories_created + report.tags_created > 0 {
        println!(
            "  Categories/tags created: {}/{}",
            report.categories_created, report.tags_created
        );
    }
    for failure in report.metadata_failures.iter().chain(&report.balance_failures) {
        warning(&format!("  {}", failure));
    }

    let failed: Vec<_> = report
        .rows
        .iter()
        .filter(|r| r.status == ImportStatus::Error)
        .collect();
    for row in failed.iter().take(SHOWN_ERRORS) {
        println!(
            "  row {}: {}",
            row.row,
            row.message.as_deref().unwrap_or("unknown error")
        );
    }
    if failed.len() > SHOWN_ERRORS {
        println!("  ... and {} more", failed.len() - SHOWN_ERRORS);
    }
    println!("  Batch: {}", report.batch_id.dimmed());
}
