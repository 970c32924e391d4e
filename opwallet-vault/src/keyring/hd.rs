//! HD keyring
//!
//! One BIP-39 mnemonic (plus optional passphrase) yields, for every active
//! account index, a secp256k1 keypair on the BIP-44 style path
//! `m/purpose'/coin'/0'/0/index` and an ML-DSA keypair derived from the
//! same seed on an independent HKDF path. The ML-DSA derivation ignores
//! purpose and network, so an account keeps its quantum key when the
//! address type or network changes.
//!
//! Security: the mnemonic and passphrase live in `Zeroizing<String>`
//! wrappers, and the mnemonic's pages are locked with mlock()/VirtualLock()
//! for as long as the keyring exists.

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use opw_crypto_pq::{derive_account_keypair, MlDsaKeyPair, MlDsaPublicKey, SecurityLevel};
use opw_crypto_secp256k1::{derivation_path, Secp256k1Keypair, HARDENED};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

use super::{AccountKey, KeySource};
use crate::address::AddressType;
use crate::error::{Result, VaultError};
use crate::network::Network;
use crate::secmem::{lock_string, LockedRegion};

/// Persisted form of an HD keyring.
///
/// `hdPath` and `numberOfAccounts` are read from older vaults and never
/// written back.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HdKeyringData {
    mnemonic: Zeroizing<String>,
    #[serde(default)]
    passphrase: Zeroizing<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purpose: Option<u32>,
    #[serde(default, skip_serializing)]
    hd_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network: Option<Network>,
    #[serde(default)]
    security_level: SecurityLevel,
    #[serde(default)]
    active_indexes: Vec<u32>,
    #[serde(default, skip_serializing)]
    number_of_accounts: Option<u32>,
}

#[derive(Clone)]
struct HdAccount {
    index: u32,
    keypair: Secp256k1Keypair,
    quantum: MlDsaKeyPair,
}

pub struct HdKeyring {
    /// Must be dropped before `mnemonic`; fields drop in declaration order.
    _mnemonic_lock: Option<LockedRegion>,
    mnemonic: Zeroizing<String>,
    passphrase: Zeroizing<String>,
    seed: Zeroizing<Vec<u8>>,
    purpose: u32,
    network: Network,
    security_level: SecurityLevel,
    /// Sorted by index
    accounts: Vec<HdAccount>,
}

impl Clone for HdKeyring {
    fn clone(&self) -> Self {
        let mnemonic = self.mnemonic.clone();
        // SAFETY: the cloned phrase is owned by the new keyring and outlives the lock
        let lock = unsafe { lock_string(&mnemonic) };
        Self {
            _mnemonic_lock: Some(lock),
            mnemonic,
            passphrase: self.passphrase.clone(),
            seed: self.seed.clone(),
            purpose: self.purpose,
            network: self.network,
            security_level: self.security_level,
            accounts: self.accounts.clone(),
        }
    }
}

impl fmt::Debug for HdKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKeyring")
            .field("purpose", &self.purpose)
            .field("network", &self.network)
            .field("security_level", &self.security_level)
            .field("active_indexes", &self.active_indexes())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh English mnemonic of 12, 15, 18, 21 or 24 words.
pub fn generate_mnemonic(words: usize) -> Result<Zeroizing<String>> {
    let mnemonic_type = MnemonicType::for_word_count(words)
        .map_err(|_| VaultError::UnsupportedOperation(format!("{} word mnemonics", words)))?;
    let mnemonic = Mnemonic::new(mnemonic_type, Language::English);
    Ok(Zeroizing::new(mnemonic.phrase().to_string()))
}

/// Check a phrase against the BIP-39 English wordlist and checksum.
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    Mnemonic::validate(&normalize_phrase(phrase), Language::English)
        .map_err(|_| VaultError::InvalidMnemonic)
}

fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(
        phrase
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Purpose component of a legacy `m/84'/0'/0'/0` path
fn purpose_from_hd_path(path: &str) -> Option<u32> {
    path.split('/')
        .nth(1)
        .and_then(|c| c.trim_end_matches(['\'', 'h']).parse().ok())
}

impl HdKeyring {
    /// Create a keyring with no active accounts.
    pub fn new(
        phrase: &str,
        passphrase: &str,
        purpose: u32,
        network: Network,
        security_level: SecurityLevel,
    ) -> Result<Self> {
        let phrase = normalize_phrase(phrase);
        let mnemonic =
            Mnemonic::from_phrase(&phrase, Language::English).map_err(|_| VaultError::InvalidMnemonic)?;
        let seed = Seed::new(&mnemonic, passphrase);

        let mnemonic = Zeroizing::new(mnemonic.phrase().to_string());
        // SAFETY: the phrase is owned by Self and outlives the lock
        let lock = unsafe { lock_string(&mnemonic) };

        Ok(Self {
            _mnemonic_lock: Some(lock),
            mnemonic,
            passphrase: Zeroizing::new(passphrase.to_string()),
            seed: Zeroizing::new(seed.as_bytes().to_vec()),
            purpose,
            network,
            security_level,
            accounts: Vec::new(),
        })
    }

    /// Create a keyring with the given accounts active.
    pub fn with_accounts(
        phrase: &str,
        passphrase: &str,
        purpose: u32,
        network: Network,
        security_level: SecurityLevel,
        active_indexes: &[u32],
    ) -> Result<Self> {
        let mut keyring = Self::new(phrase, passphrase, purpose, network, security_level)?;
        keyring.activate_accounts(active_indexes)?;
        Ok(keyring)
    }

    /// Rebuild from persisted data.
    ///
    /// The purpose falls back to a legacy `hdPath`, then to the address
    /// type. The network is always the vault's current one.
    pub fn restore(data: &Value, address_type: AddressType, network: Network) -> Result<Self> {
        let data = HdKeyringData::deserialize(data)
            .map_err(|e| VaultError::Deserialization(format!("HD keyring: {}", e)))?;

        let purpose = data
            .purpose
            .or_else(|| data.hd_path.as_deref().and_then(purpose_from_hd_path))
            .unwrap_or_else(|| address_type.purpose());

        let active_indexes = match data.number_of_accounts {
            Some(n) if data.active_indexes.is_empty() => (0..n).collect(),
            _ => data.active_indexes.clone(),
        };

        Self::with_accounts(
            &data.mnemonic,
            &data.passphrase,
            purpose,
            network,
            data.security_level,
            &active_indexes,
        )
    }

    pub fn serialize(&self) -> Result<Value> {
        let data = HdKeyringData {
            mnemonic: self.mnemonic.clone(),
            passphrase: self.passphrase.clone(),
            purpose: Some(self.purpose),
            hd_path: None,
            network: Some(self.network),
            security_level: self.security_level,
            active_indexes: self.active_indexes(),
            number_of_accounts: None,
        };
        Ok(serde_json::to_value(&data)?)
    }

    /// Same mnemonic re-derived for another purpose or network.
    pub fn rederive(&self, purpose: u32, network: Network) -> Result<Self> {
        Self::with_accounts(
            &self.mnemonic,
            &self.passphrase,
            purpose,
            network,
            self.security_level,
            &self.active_indexes(),
        )
    }

    fn derive(&self, index: u32) -> Result<HdAccount> {
        if index >= HARDENED {
            return Err(VaultError::InvalidKey(format!("account index {} out of range", index)));
        }

        let path = derivation_path(self.purpose, self.network.coin_type(), index);
        let keypair = Secp256k1Keypair::from_seed(&self.seed, &path)?;
        let quantum = derive_account_keypair(&self.seed, self.security_level, index);

        Ok(HdAccount {
            index,
            keypair,
            quantum,
        })
    }

    /// Append `count` accounts after the highest active index.
    pub fn add_accounts(&mut self, count: u32) -> Result<Vec<AccountKey>> {
        let start = self.accounts.last().map(|a| a.index + 1).unwrap_or(0);
        let indexes: Vec<u32> = (start..start.saturating_add(count)).collect();
        self.activate_accounts(&indexes)
    }

    /// Activate specific (possibly sparse) indexes. Already active indexes
    /// are skipped; the newly activated accounts are returned.
    pub fn activate_accounts(&mut self, indexes: &[u32]) -> Result<Vec<AccountKey>> {
        let mut added = Vec::new();

        for &index in indexes {
            if self.accounts.iter().any(|a| a.index == index) {
                continue;
            }
            let account = self.derive(index)?;
            added.push(account_key(&account));
            let position = self.accounts.partition_point(|a| a.index < index);
            self.accounts.insert(position, account);
        }

        if !added.is_empty() {
            debug!("Activated {} HD account(s)", added.len());
        }
        Ok(added)
    }

    pub fn accounts(&self) -> Vec<AccountKey> {
        self.accounts.iter().map(account_key).collect()
    }

    pub fn active_indexes(&self) -> Vec<u32> {
        self.accounts.iter().map(|a| a.index).collect()
    }

    pub fn purpose(&self) -> u32 {
        self.purpose
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The recovery phrase (be careful with secret material!)
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// SHA-256 of `mnemonic|passphrase`
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mnemonic.as_bytes());
        hasher.update(b"|");
        hasher.update(self.passphrase.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Keyring-level quantum key: the first active account's.
    pub fn quantum_public_key(&self) -> Option<&MlDsaPublicKey> {
        self.accounts.first().map(|a| a.quantum.public_key())
    }

    pub fn export_quantum_private_key(&self) -> Result<Zeroizing<String>> {
        self.accounts
            .first()
            .map(|a| Zeroizing::new(a.quantum.secret_key().to_hex()))
            .ok_or_else(|| VaultError::UnsupportedOperation("keyring has no accounts".into()))
    }
}

fn account_key(account: &HdAccount) -> AccountKey {
    AccountKey {
        index: account.index,
        public_key: account.keypair.public_key_compressed(),
        quantum_public_key: Some(account.quantum.public_key().clone()),
    }
}

impl KeySource for HdKeyring {
    fn keypair_for(&self, public_key: &str) -> Option<&Secp256k1Keypair> {
        self.accounts
            .iter()
            .find(|a| super::matches_public_key(&a.keypair, public_key))
            .map(|a| &a.keypair)
    }

    fn quantum_keypair_for(&self, public_key: &str) -> Option<&MlDsaKeyPair> {
        self.accounts
            .iter()
            .find(|a| super::matches_public_key(&a.keypair, public_key))
            .map(|a| &a.quantum)
    }
}
