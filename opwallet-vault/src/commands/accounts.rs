//! Account listing and derivation

use anyhow::Result;

use opwallet_vault::service::KeyringSnapshot;
use opwallet_vault::VaultConfig;

use super::{print_success, unlock_vault};

/// Print one keyring with its accounts
pub fn print_keyring(keyring: &KeyringSnapshot) {
    println!(
        "[{}] {} ({}, {})",
        keyring.index,
        keyring.alias,
        keyring.keyring_type.name(),
        keyring.address_type
    );
    if let Some(fingerprint) = &keyring.quantum_fingerprint {
        println!("    quantum key: {}", fingerprint);
    }
    if keyring.accounts.is_empty() {
        println!("    (no accounts)");
    }
    for account in &keyring.accounts {
        println!("    {:>3}  {}  {}", account.index, account.address, account.alias);
        println!("         {}", account.pubkey);
    }
}

/// Run the accounts command
pub async fn run(config: &VaultConfig) -> Result<()> {
    let (vault, _password) = unlock_vault(config).await?;
    let snapshot = vault.service.snapshot().await?;

    println!();
    println!("Network: {}", snapshot.network);
    if snapshot.keyrings.is_empty() {
        println!("No keyrings. Add one with 'opwallet-vault import'.");
        return Ok(());
    }

    let current = vault.service.current_keyring_index().await;
    for keyring in &snapshot.keyrings {
        println!();
        if keyring.index == current {
            print!("* ");
        }
        print_keyring(keyring);
    }
    Ok(())
}

/// Run the add-account command
pub async fn add(config: &VaultConfig, keyring: usize) -> Result<()> {
    let (vault, _password) = unlock_vault(config).await?;
    let account = vault.service.add_new_account(keyring).await?;

    print_success(&format!("Added account {} to keyring {}", account.index, keyring));
    println!("  address: {}", account.address);
    println!("  pubkey:  {}", account.pubkey);
    Ok(())
}
