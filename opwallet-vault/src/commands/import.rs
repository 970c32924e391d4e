//! Wallet import command

use anyhow::Result;
use zeroize::Zeroizing;

use opwallet_vault::keyring::validate_mnemonic;
use opwallet_vault::{AddressType, VaultConfig, VaultError};

use super::accounts::print_keyring;
use super::{print_error, print_success, print_warning, prompt_confirm, prompt_password, unlock_vault};

pub struct ImportOptions {
    pub mnemonic: bool,
    pub private_key: bool,
    pub address_type: Option<AddressType>,
    pub quantum_key: bool,
    pub accounts: u32,
}

/// Run the import command
pub async fn run(config: &VaultConfig, options: ImportOptions) -> Result<()> {
    let (vault, _password) = unlock_vault(config).await?;
    let address_type = options.address_type.unwrap_or(config.default_address_type);

    let result = if options.private_key {
        let private_key = prompt_password("Enter private key (hex or WIF): ")?;
        let quantum_key = if options.quantum_key {
            Some(prompt_password("Enter ML-DSA seed (hex): ")?)
        } else {
            None
        };
        vault
            .service
            .import_private_key(
                &private_key,
                address_type,
                quantum_key.as_ref().map(|k| k.as_str()),
            )
            .await
    } else {
        let mnemonic = read_or_generate_mnemonic(&vault.service)?;
        let passphrase = prompt_password("Enter BIP-39 passphrase (optional): ")?;
        vault
            .service
            .create_keyring_with_mnemonics(&mnemonic, &passphrase, address_type, options.accounts)
            .await
    };

    let index = match result {
        Ok(index) => index,
        Err(VaultError::DuplicateWallet { index }) => {
            print_error(&format!("This wallet is already in the vault (keyring {})", index));
            return Ok(());
        }
        Err(VaultError::DuplicateQuantumKey { index, fingerprint }) => {
            print_error(&format!(
                "Quantum key {} is already used by keyring {}",
                fingerprint, index
            ));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    print_success(&format!("Imported keyring {}", index));
    print_keyring(&vault.service.keyring(index).await?);
    Ok(())
}

fn read_or_generate_mnemonic(service: &opwallet_vault::KeyringService) -> Result<Zeroizing<String>> {
    let mnemonic = prompt_password("Enter mnemonic (leave empty to generate one): ")?;
    if !mnemonic.trim().is_empty() {
        validate_mnemonic(&mnemonic)?;
        return Ok(mnemonic);
    }

    let generated = service.generate_mnemonic(12)?;
    println!();
    print_warning("IMPORTANT: Write down your recovery phrase and keep it secret!");
    println!();
    for (i, word) in generated.split_whitespace().enumerate() {
        println!("  {:2}. {}", i + 1, word);
    }
    println!();

    if !prompt_confirm("Have you written down your recovery phrase?")? {
        anyhow::bail!("Aborted: recovery phrase not confirmed");
    }
    Ok(generated)
}
