//! Vault creation and password change

use anyhow::Result;

use opwallet_vault::VaultConfig;

use super::{open_vault, print_error, print_success, print_warning, prompt_new_password, prompt_password};

/// Run the init command
pub async fn run(config: &VaultConfig) -> Result<()> {
    let vault = open_vault(config).await?;
    if vault.service.is_booted().await? {
        print_error(&format!(
            "Vault already exists at {}",
            config.vault_path().display()
        ));
        return Ok(());
    }

    println!("Creating a new vault at {}", config.vault_path().display());
    let password = prompt_new_password()?;

    vault.service.boot(&password).await?;
    vault.service.persist_all_keyrings().await?;

    println!();
    print_success("Vault created.");
    println!("Add a wallet with 'opwallet-vault import'.");
    print_warning("There is no way to recover a forgotten password.");
    Ok(())
}

/// Run the change-password command
pub async fn change_password(config: &VaultConfig) -> Result<()> {
    let vault = open_vault(config).await?;
    if !vault.service.is_booted().await? {
        print_error("No vault found. Run 'opwallet-vault init' first.");
        return Ok(());
    }

    let old_password = prompt_password("Enter current password: ")?;
    vault.service.verify_password(&old_password).await?;

    let new_password = prompt_new_password()?;
    vault
        .service
        .change_password(&old_password, &new_password)
        .await?;

    print_success("Password changed.");
    print_warning("Existing duplication backups still use the old password.");
    Ok(())
}
