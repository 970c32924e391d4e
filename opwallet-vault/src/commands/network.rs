//! Network display and switch

use anyhow::{anyhow, Result};

use opwallet_vault::{Network, VaultConfig, VaultError};

use super::{open_vault, print_error, print_success, unlock_vault};

/// Run the network command
pub async fn run(config: &VaultConfig, network: Option<String>) -> Result<()> {
    let Some(network) = network else {
        let vault = open_vault(config).await?;
        println!("{}", vault.service.network().await);
        return Ok(());
    };

    let network: Network = network.parse().map_err(|e: String| anyhow!(e))?;
    let (vault, _password) = unlock_vault(config).await?;

    match vault.service.update_keyrings_network(network).await {
        Ok(()) => {
            print_success(&format!("Switched to {}", network));
            Ok(())
        }
        Err(VaultError::NetworkSwitch { index, reason }) => {
            print_error(&format!(
                "Keyring {} cannot be used on {}: {}. Nothing was changed.",
                index, network, reason
            ));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
