//! CLI Commands
//!
//! Implementation of all vault CLI commands.

pub mod accounts;
pub mod backup;
pub mod detect;
pub mod export;
pub mod import;
pub mod init;
pub mod network;
pub mod quantum;
pub mod remove;

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroizing;

use opwallet_vault::{
    DuplicationBackup, Encryptor, FileStore, KeyValueStore, KeyringService, PasswordCipher,
    ServiceOptions, VaultConfig,
};

/// Minimum length of a new vault password
pub const MIN_PASSWORD_LEN: usize = 8;

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = rpassword::read_password()?;
    Ok(Zeroizing::new(password))
}

/// Prompt for a new password twice and check they agree
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    let password = prompt_password("Enter new password: ")?;
    if password.len() < MIN_PASSWORD_LEN {
        bail!("Password must be at least {} characters", MIN_PASSWORD_LEN);
    }

    let confirm = prompt_password("Confirm password: ")?;
    if *password != *confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// Write a file only the current user can read
pub fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(())
}

/// The vault service and its collaborators, opened from a config
pub struct Vault {
    pub service: KeyringService,
    pub store: Arc<dyn KeyValueStore>,
    pub cipher: Arc<dyn Encryptor>,
}

impl Vault {
    pub fn backup(&self, config: &VaultConfig) -> DuplicationBackup {
        DuplicationBackup::with_storage_key(
            self.store.clone(),
            self.cipher.clone(),
            config.backup_storage_key.clone(),
        )
    }
}

/// Open the vault file named by `config`, still locked.
pub async fn open_vault(config: &VaultConfig) -> Result<Vault> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create directory {}", config.data_dir.display()))?;

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.vault_path()));
    let cipher: Arc<dyn Encryptor> = Arc::new(PasswordCipher::new(config.cipher.params()));
    let options = ServiceOptions {
        network: config.network,
        security_level: config.security_level,
    };

    let service = KeyringService::open(store.clone(), cipher.clone(), options).await?;
    Ok(Vault {
        service,
        store,
        cipher,
    })
}

/// Open the vault and unlock it with a prompted password.
///
/// Keyrings that could not be restored are reported as warnings; their data
/// stays in the vault.
pub async fn unlock_vault(config: &VaultConfig) -> Result<(Vault, Zeroizing<String>)> {
    let vault = open_vault(config).await?;
    if !vault.service.is_booted().await? {
        bail!("No vault found. Run 'opwallet-vault init' first.");
    }

    let password = prompt_password("Enter vault password: ")?;
    let report = vault.service.submit_password(&password).await?;
    for failure in &report.failures {
        print_warning(&format!(
            "Keyring {} could not be restored: {}",
            failure.index, failure.reason
        ));
    }

    Ok((vault, password))
}
