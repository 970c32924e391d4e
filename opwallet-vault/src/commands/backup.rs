//! Duplication backup commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::fs;
use std::path::PathBuf;

use opwallet_vault::duplication::resolve_conflict;
use opwallet_vault::{DuplicationDetector, VaultConfig};

use super::{print_error, print_success, print_warning, prompt_confirm, prompt_password, unlock_vault, write_private_file};

#[derive(Subcommand)]
pub enum BackupAction {
    /// Back up every keyring before resolving conflicts
    Create,

    /// Write the stored backup to a file (ciphertext only)
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Load a backup file as the stored backup
    Import {
        /// Backup file path
        file: PathBuf,
    },

    /// Replace all keyrings with the backed-up ones
    Restore {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Keep one keyring of a conflict; duplicates are removed, distinct
    /// wallets only lose the shared quantum key
    Resolve {
        /// Conflict id as printed by 'detect'
        conflict: String,

        /// Keyring index to keep
        #[arg(long)]
        keep: usize,
    },

    /// Delete the stored backup
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Run the backup command
pub async fn run(config: &VaultConfig, action: BackupAction) -> Result<()> {
    let (vault, password) = unlock_vault(config).await?;
    let backup = vault.backup(config);

    match action {
        BackupAction::Create => {
            let snapshot = vault.service.snapshot().await?;
            let conflicts = DuplicationDetector::new().detect(&snapshot);
            let created = backup.create_backup(&vault.service, &password, &conflicts).await?;
            print_success(&format!(
                "Backed up {} keyring(s) ({} conflict(s))",
                created.keyrings.len(),
                created.conflicts.len()
            ));
        }
        BackupAction::Export { output } => {
            if output.exists() && !prompt_confirm("Output file exists. Overwrite?")? {
                println!("Aborted.");
                return Ok(());
            }
            let content = backup.export_backup_to_file(&password).await?;
            write_private_file(&output, &content)?;
            print_success(&format!("Backup saved to: {}", output.display()));
        }
        BackupAction::Import { file } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_password = prompt_password("Enter the backup's password (empty for vault password): ")?;
            let file_password = if file_password.is_empty() { password } else { file_password };

            let imported = backup.import_backup_from_file(&content, &file_password).await?;
            print_success(&format!(
                "Imported backup of {} keyring(s) from {}",
                imported.keyrings.len(),
                imported.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        BackupAction::Restore { yes } => {
            if !backup.has_backup().await? {
                print_error("No backup found.");
                return Ok(());
            }
            print_warning("Restoring replaces every keyring in the vault.");
            if !yes && !prompt_confirm("Restore from backup?")? {
                println!("Aborted.");
                return Ok(());
            }

            // An imported backup keeps the password it was exported under
            let backup_password =
                prompt_password("Enter the backup's password (empty for vault password): ")?;
            let backup_password = if backup_password.is_empty() { password } else { backup_password };

            let report = backup.restore_from_backup(&vault.service, &backup_password).await?;
            print_success(&format!("Restored {} keyring(s)", report.restored));
            for error in &report.errors {
                print_error(error);
            }
        }
        BackupAction::Resolve { conflict, keep } => {
            let snapshot = vault.service.snapshot().await?;
            let conflicts = DuplicationDetector::new().detect(&snapshot);
            let Some(conflict) = conflicts.iter().find(|c| c.conflict_id == conflict) else {
                bail!("No conflict with id {}", conflict);
            };

            let report = resolve_conflict(&vault.service, &backup, conflict, keep, &password).await?;
            print_success(&format!("Kept keyring {}", keep));
            if !report.removed.is_empty() {
                println!("  Removed duplicates: {:?}", report.removed);
            }
            if !report.quantum_reset.is_empty() {
                println!("  Quantum key reset on: {:?}", report.quantum_reset);
            }
        }
        BackupAction::Clear { yes } => {
            if !yes && !prompt_confirm("Delete the duplication backup?")? {
                println!("Aborted.");
                return Ok(());
            }
            backup.clear_backup().await?;
            print_success("Backup cleared");
        }
    }

    Ok(())
}
