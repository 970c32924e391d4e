//! Duplication conflict and backup types
//!
//! Conflicts and reports carry one-way fingerprints only. [`Backup`] is the
//! exception: it holds the persisted keyring entries and is only ever
//! stored encrypted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::address::AddressType;
use crate::keyring::KeyringType;
use crate::service::KeyringSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Same mnemonic or private key imported more than once
    WalletDuplicate,
    /// Same ML-DSA key used by more than one wallet
    MldsaDuplicate,
}

impl ConflictType {
    fn id_prefix(&self) -> &'static str {
        match self {
            ConflictType::WalletDuplicate => "wallet",
            ConflictType::MldsaDuplicate => "mldsa",
        }
    }

    /// Stable identifier for the conflict over `fingerprint`
    pub fn conflict_id(&self, fingerprint: &str) -> String {
        let short = &fingerprint[..fingerprint.len().min(16)];
        format!("{}-{}", self.id_prefix(), short)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateWalletInfo {
    pub keyring_index: usize,
    /// First account's public key
    pub pubkey: String,
    pub address: String,
    /// Wallet fingerprint; never the key itself
    pub private_key_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mldsa_public_key_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_chain_linked_mldsa_hash: Option<String>,
    #[serde(default)]
    pub is_on_chain_match: bool,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationConflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub conflict_id: String,
    pub description: String,
    /// Ordered by keyring index
    pub wallets: Vec<DuplicateWalletInfo>,
}

impl DuplicationConflict {
    pub fn keyring_indexes(&self) -> Vec<usize> {
        self.wallets.iter().map(|w| w.keyring_index).collect()
    }
}

/// Local versus on-chain ML-DSA key for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainLinkage {
    pub keyring_index: usize,
    pub account_index: u32,
    pub pubkey: String,
    pub local_mldsa_hash: Option<String>,
    pub on_chain_mldsa_hash: Option<String>,
    /// True when the chain has no record or agrees with the local key
    pub matches: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationReport {
    pub conflicts: Vec<DuplicationConflict>,
    pub linkage: Vec<OnChainLinkage>,
}

impl DuplicationReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Keyrings whose local quantum key disagrees with the chain
    pub fn mismatched_linkage(&self) -> impl Iterator<Item = &OnChainLinkage> {
        self.linkage.iter().filter(|l| !l.matches)
    }
}

/// Derived account data kept beside a backed-up keyring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupAccount {
    pub pubkey: String,
    pub address: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantum_public_key_hash: Option<String>,
}

/// One keyring as it was persisted when the backup was taken, with the
/// accounts it derived at that time
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupKeyringData {
    pub index: usize,
    pub keyring_type: KeyringType,
    pub address_type: AddressType,
    pub alias: String,
    #[serde(default)]
    pub accounts: Vec<BackupAccount>,
    /// `{type, data, addressType}`; contains secrets
    pub entry: Value,
}

impl BackupKeyringData {
    pub fn new(snapshot: &KeyringSnapshot, entry: Value) -> Self {
        Self {
            index: snapshot.index,
            keyring_type: snapshot.keyring_type,
            address_type: snapshot.address_type,
            alias: snapshot.alias.clone(),
            accounts: snapshot
                .accounts
                .iter()
                .map(|account| BackupAccount {
                    pubkey: account.pubkey.clone(),
                    address: account.address.clone(),
                    index: account.index,
                    quantum_public_key_hash: account.quantum_public_key_hash.clone(),
                })
                .collect(),
            entry,
        }
    }
}

impl fmt::Debug for BackupKeyringData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupKeyringData")
            .field("index", &self.index)
            .field("keyring_type", &self.keyring_type)
            .field("address_type", &self.address_type)
            .field("alias", &self.alias)
            .field("accounts", &self.accounts)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub keyrings: Vec<BackupKeyringData>,
    #[serde(default)]
    pub conflicts: Vec<DuplicationConflict>,
}

/// Outcome of a backup restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub errors: Vec<String>,
}

/// What [`resolve_conflicts`](super::resolve_conflicts) changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Duplicates of a kept wallet, highest index first
    pub removed: Vec<usize>,
    /// Distinct wallets whose shared quantum key was cleared or replaced
    pub quantum_reset: Vec<usize>,
}

/// Which keyring survives a conflict
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    pub conflict: DuplicationConflict,
    pub keep_index: usize,
}
