//! Duplicate detection command

use anyhow::{Context, Result};
use std::sync::Arc;

use opwallet_vault::duplication::{ConflictType, DuplicationReport};
use opwallet_vault::{DuplicationDetector, JsonRpcChainQuery, VaultConfig};

use super::{print_success, print_warning, unlock_vault};

/// Run the detect command
pub async fn run(config: &VaultConfig, on_chain: bool) -> Result<()> {
    let (vault, _password) = unlock_vault(config).await?;
    let snapshot = vault.service.snapshot().await?;

    let detector = match (&config.rpc_url, on_chain) {
        (Some(url), true) => {
            let chain = JsonRpcChainQuery::new(url.as_str(), config.rpc_timeout())
                .context("Failed to create RPC client")?;
            DuplicationDetector::with_chain_query(Arc::new(chain))
        }
        (None, true) => {
            print_warning("No rpc_url configured; skipping on-chain checks.");
            DuplicationDetector::new()
        }
        _ => DuplicationDetector::new(),
    };

    let report = detector.detect_with_on_chain(&snapshot).await;
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &DuplicationReport) {
    if !report.has_conflicts() {
        print_success("No duplicate wallets or quantum keys found.");
    }

    for conflict in &report.conflicts {
        println!();
        let kind = match conflict.conflict_type {
            ConflictType::WalletDuplicate => "Duplicate wallet",
            ConflictType::MldsaDuplicate => "Shared quantum key",
        };
        println!("{} [{}]", kind, conflict.conflict_id);
        println!("  {}", conflict.description);
        for wallet in &conflict.wallets {
            let chain = match (&wallet.on_chain_linked_mldsa_hash, wallet.is_on_chain_match) {
                (Some(_), true) => "  (linked on chain)",
                (Some(_), false) => "  (chain links another key)",
                (None, _) => "",
            };
            println!(
                "  [{}] {} {}{}",
                wallet.keyring_index, wallet.alias, wallet.address, chain
            );
        }
    }

    for link in report.mismatched_linkage() {
        println!();
        print_warning(&format!(
            "Keyring {} account {}: the chain links {} to a different quantum key",
            link.keyring_index,
            link.account_index + 1,
            link.pubkey
        ));
    }

    if report.has_conflicts() {
        println!();
        println!("Create a backup with 'opwallet-vault backup create' before resolving.");
    }
}
