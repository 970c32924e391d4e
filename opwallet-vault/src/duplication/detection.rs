//! Duplicate wallet and quantum key detection
//!
//! Read-only analysis of a [`VaultSnapshot`]. Keyrings are grouped by wallet
//! fingerprint and by quantum fingerprint; any group with more than one
//! keyring is a conflict. For HD keyrings the quantum fingerprint covers
//! the first active account only.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{ConflictType, DuplicateWalletInfo, DuplicationConflict, DuplicationReport, OnChainLinkage};
use crate::chain::ChainQuery;
use crate::service::{KeyringSnapshot, VaultSnapshot};

#[derive(Default)]
pub struct DuplicationDetector {
    chain: Option<Arc<dyn ChainQuery>>,
}

fn wallet_info(keyring: &KeyringSnapshot) -> DuplicateWalletInfo {
    let first = keyring.accounts.first();
    DuplicateWalletInfo {
        keyring_index: keyring.index,
        pubkey: first.map(|a| a.pubkey.clone()).unwrap_or_default(),
        address: first.map(|a| a.address.clone()).unwrap_or_default(),
        private_key_hash: keyring.wallet_fingerprint.clone().unwrap_or_default(),
        mldsa_public_key_hash: keyring.quantum_fingerprint.clone(),
        on_chain_linked_mldsa_hash: None,
        is_on_chain_match: false,
        alias: keyring.alias.clone(),
    }
}

/// Conflicts of one kind, ordered by the lowest keyring index in each group.
fn group_conflicts<'a, F>(snapshot: &'a VaultSnapshot, conflict_type: ConflictType, key: F) -> Vec<DuplicationConflict>
where
    F: Fn(&'a KeyringSnapshot) -> Option<&'a str>,
{
    let mut groups: BTreeMap<&str, Vec<&KeyringSnapshot>> = BTreeMap::new();
    for keyring in &snapshot.keyrings {
        if let Some(fingerprint) = key(keyring) {
            groups.entry(fingerprint).or_default().push(keyring);
        }
    }

    let mut conflicts: Vec<DuplicationConflict> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(fingerprint, members)| {
            let indexes: Vec<String> = members.iter().map(|k| k.index.to_string()).collect();
            let description = match conflict_type {
                ConflictType::WalletDuplicate => {
                    format!("Keyrings {} hold the same wallet", indexes.join(", "))
                }
                ConflictType::MldsaDuplicate => {
                    format!("Keyrings {} share one quantum key", indexes.join(", "))
                }
            };
            DuplicationConflict {
                conflict_type,
                conflict_id: conflict_type.conflict_id(fingerprint),
                description,
                wallets: members.into_iter().map(wallet_info).collect(),
            }
        })
        .collect();

    conflicts.sort_by_key(|c| c.wallets.first().map(|w| w.keyring_index));
    conflicts
}

impl DuplicationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain_query(chain: Arc<dyn ChainQuery>) -> Self {
        Self { chain: Some(chain) }
    }

    /// Wallet duplicates first, then quantum key duplicates.
    pub fn detect(&self, snapshot: &VaultSnapshot) -> Vec<DuplicationConflict> {
        let mut conflicts = group_conflicts(snapshot, ConflictType::WalletDuplicate, |k| {
            k.wallet_fingerprint.as_deref()
        });
        conflicts.extend(group_conflicts(snapshot, ConflictType::MldsaDuplicate, |k| {
            k.quantum_fingerprint.as_deref()
        }));

        debug!("Duplicate detection found {} conflict(s)", conflicts.len());
        conflicts
    }

    /// Compare every account's quantum key with the one linked on chain to
    /// its public key. Query failures count as "no linkage".
    pub async fn verify_on_chain_linkage(&self, snapshot: &VaultSnapshot) -> Vec<OnChainLinkage> {
        let Some(chain) = &self.chain else {
            return Vec::new();
        };

        let mut linkage = Vec::new();
        for keyring in &snapshot.keyrings {
            for account in &keyring.accounts {
                let on_chain = match chain.get_public_key_linkage(&account.pubkey).await {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!(
                            "Linkage query for keyring {} account {} failed: {}",
                            keyring.index, account.index, e
                        );
                        None
                    }
                };

                let matches = match &on_chain {
                    Some(hash) => account.quantum_public_key_hash.as_deref() == Some(hash.as_str()),
                    None => true,
                };
                linkage.push(OnChainLinkage {
                    keyring_index: keyring.index,
                    account_index: account.index,
                    pubkey: account.pubkey.clone(),
                    local_mldsa_hash: account.quantum_public_key_hash.clone(),
                    on_chain_mldsa_hash: on_chain,
                    matches,
                });
            }
        }
        linkage
    }

    /// [`detect`](Self::detect) plus on-chain linkage for every wallet in a
    /// conflict.
    pub async fn detect_with_on_chain(&self, snapshot: &VaultSnapshot) -> DuplicationReport {
        let mut conflicts = self.detect(snapshot);
        let linkage = self.verify_on_chain_linkage(snapshot).await;

        for wallet in conflicts.iter_mut().flat_map(|c| c.wallets.iter_mut()) {
            let link = linkage
                .iter()
                .find(|l| l.keyring_index == wallet.keyring_index && l.pubkey == wallet.pubkey);
            if let Some(link) = link {
                wallet.on_chain_linked_mldsa_hash = link.on_chain_mldsa_hash.clone();
                wallet.is_on_chain_match = link.on_chain_mldsa_hash.is_some() && link.matches;
            }
        }

        DuplicationReport { conflicts, linkage }
    }
}
