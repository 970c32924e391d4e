//! Keyring removal command

use anyhow::Result;

use opwallet_vault::VaultConfig;

use super::accounts::print_keyring;
use super::{print_success, print_warning, prompt_confirm, unlock_vault};

/// Run the remove command
pub async fn run(config: &VaultConfig, keyring: usize, yes: bool) -> Result<()> {
    let (vault, _password) = unlock_vault(config).await?;
    let snapshot = vault.service.keyring(keyring).await?;

    print_keyring(&snapshot);
    print_warning("Removing a keyring deletes its keys from the vault.");
    if !yes && !prompt_confirm("Remove this keyring?")? {
        println!("Aborted.");
        return Ok(());
    }

    vault.service.remove_keyring(keyring).await?;
    print_success(&format!("Removed keyring {}", keyring));
    Ok(())
}
