//! Secret export command

use anyhow::{bail, Result};

use opwallet_vault::VaultConfig;

use super::{print_warning, prompt_confirm, unlock_vault};

/// Run the export-key command
///
/// Unlocking prompts for the password, which is the re-verification
/// required before any secret leaves the vault.
pub async fn run(config: &VaultConfig, pubkey: Option<String>, mnemonic: Option<usize>) -> Result<()> {
    if pubkey.is_none() && mnemonic.is_none() {
        bail!("Pass --pubkey <hex> or --mnemonic <keyring>");
    }

    let (vault, _password) = unlock_vault(config).await?;

    println!();
    print_warning("IMPORTANT: Anyone with this secret controls the funds!");
    if !prompt_confirm("Display the secret on screen?")? {
        println!("Aborted.");
        return Ok(());
    }
    println!();

    if let Some(pubkey) = pubkey {
        let private_key = vault.service.export_account(&pubkey).await?;
        println!("{}", private_key.as_str());
    }

    if let Some(index) = mnemonic {
        let (phrase, passphrase) = vault.service.export_mnemonic(index).await?;
        for (i, word) in phrase.split_whitespace().enumerate() {
            println!("  {:2}. {}", i + 1, word);
        }
        if !passphrase.is_empty() {
            println!();
            println!("  passphrase: {}", passphrase.as_str());
        }
    }

    println!();
    Ok(())
}
