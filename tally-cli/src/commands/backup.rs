//! Backup command - export and restore full archives

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use super::get_context;
use crate::output::create_table;
use tally_core::services::RestoreSummary;

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Write every collection into a ZIP archive
    Export {
        /// Archive path to create
        path: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore a ZIP archive into the store
    Restore {
        /// Archive path to read
        path: PathBuf,
        /// Restore even if the store already has data, skipping confirmation
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: BackupCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        BackupCommands::Export { path, json } => {
            let summary = ctx.backup_service.export(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", "Backup exported".green());
                println!("  Path: {}", path.display());
                for (collection, count) in &summary.counts {
                    println!("  {}: {}", collection, count);
                }
            }
        }
        BackupCommands::Restore { path, force, json } => {
            if !force && !json && !confirm_restore(&path)? {
                println!("Cancelled.");
                return Ok(());
            }
            let summary = ctx.backup_service.restore(&path, force).await?;
            print_restore(&summary, json)?;
        }
    }

    Ok(())
}

pub fn confirm_restore(path: &Path) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(format!("Restore backup '{}'?", path.display()))
        .default(false)
        .interact()?)
}

pub fn print_restore(summary: &RestoreSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{}", "Backup restored".green());
    let mut table = create_table();
    table.set_header(vec!["Collection", "Restored"]);
    for (collection, count) in &summary.restored {
        table.add_row(vec![collection.clone(), count.to_string()]);
    }
    println!("{}", table);
    if summary.dangling_references > 0 {
        println!("  Cleared {} dangling reference(s)", summary.dangling_references);
    }
    if summary.orphaned_transactions > 0 {
        println!(
            "  Dropped {} transaction(s) whose account was not in the archive",
            summary.orphaned_transactions
        );
    }
    Ok(())
}
