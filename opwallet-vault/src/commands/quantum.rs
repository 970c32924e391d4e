//! Quantum key management

use anyhow::Result;
use clap::Subcommand;

use opwallet_vault::{VaultConfig, VaultError};

use super::{print_error, print_success, print_warning, prompt_confirm, prompt_password, unlock_vault};

#[derive(Subcommand)]
pub enum QuantumAction {
    /// Show the quantum public key hash of a keyring
    Show { keyring: usize },

    /// Replace a single-key keyring's quantum key with a fresh one
    Generate { keyring: usize },

    /// Import an ML-DSA seed into a single-key keyring (prompted)
    Import { keyring: usize },

    /// Remove a single-key keyring's quantum key
    Clear {
        keyring: usize,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Display the ML-DSA seed of a keyring
    Export { keyring: usize },
}

/// Run the quantum command
pub async fn run(config: &VaultConfig, action: QuantumAction) -> Result<()> {
    let (vault, _password) = unlock_vault(config).await?;
    let service = &vault.service;

    let result = match action {
        QuantumAction::Show { keyring } => {
            match service.quantum_public_key(keyring).await? {
                Some(public_key) => {
                    println!("level: {}", public_key.level());
                    println!("hash:  {}", public_key.hash());
                }
                None => println!("Keyring {} has no quantum key", keyring),
            }
            Ok(())
        }
        QuantumAction::Generate { keyring } => service
            .generate_fresh_quantum_key(keyring)
            .await
            .map(|pk| print_success(&format!("New quantum key {}", pk.hash()))),
        QuantumAction::Import { keyring } => {
            let seed = prompt_password("Enter ML-DSA seed (hex): ")?;
            service
                .import_quantum_key(keyring, &seed)
                .await
                .map(|pk| print_success(&format!("Imported quantum key {}", pk.hash())))
        }
        QuantumAction::Clear { keyring, yes } => {
            print_warning("Funds locked to this quantum key need it to be spent.");
            if !yes && !prompt_confirm("Remove the quantum key?")? {
                println!("Aborted.");
                return Ok(());
            }
            service.clear_quantum_key(keyring).await.map(|had_key| {
                if had_key {
                    print_success("Quantum key removed");
                } else {
                    println!("Keyring {} had no quantum key", keyring);
                }
            })
        }
        QuantumAction::Export { keyring } => {
            print_warning("IMPORTANT: Anyone with this seed can sign with the quantum key!");
            if !prompt_confirm("Display the seed on screen?")? {
                println!("Aborted.");
                return Ok(());
            }
            service
                .export_quantum_private_key(keyring)
                .await
                .map(|seed| println!("{}", seed.as_str()))
        }
    };

    match result {
        Err(VaultError::DuplicateQuantumKey { index, fingerprint }) => {
            print_error(&format!(
                "Quantum key {} is already used by keyring {}; nothing was changed",
                fingerprint, index
            ));
            Ok(())
        }
        other => Ok(other?),
    }
}
