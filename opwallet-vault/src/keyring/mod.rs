//! Keyrings
//!
//! A keyring is one unit of key material in the vault. The set of variants
//! is closed: [`Keyring`] dispatches with exhaustive matches, and the empty
//! variant refuses every operation that needs secrets.

mod empty;
mod hd;
mod simple;

pub use empty::EmptyKeyring;
pub use hd::{generate_mnemonic, validate_mnemonic, HdKeyring};
pub use simple::SimpleKeyring;

use opw_crypto_pq::{MlDsaKeyPair, MlDsaPublicKey};
use opw_crypto_secp256k1::Secp256k1Keypair;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::address::AddressType;
use crate::error::{Result, VaultError};
use crate::network::Network;

/// SIGHASH_ALL, appended to ECDSA input signatures by default
const SIGHASH_ALL: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyringType {
    #[serde(rename = "HdKeyring", alias = "HD Key Tree")]
    Hd,
    #[serde(rename = "SimpleKeyring", alias = "Simple Key Pair")]
    Simple,
    #[serde(rename = "Empty")]
    Empty,
}

impl KeyringType {
    pub fn name(&self) -> &'static str {
        match self {
            KeyringType::Hd => "HdKeyring",
            KeyringType::Simple => "SimpleKeyring",
            KeyringType::Empty => "Empty",
        }
    }
}

/// One persisted keyring: `{type, data, addressType}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedVaultEntry {
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    pub data: Value,
    #[serde(rename = "addressType", default)]
    pub address_type: AddressType,
}

/// Public view of a keyring account
#[derive(Debug, Clone)]
pub struct AccountKey {
    pub index: u32,
    /// Compressed secp256k1 public key
    pub public_key: [u8; 33],
    pub quantum_public_key: Option<MlDsaPublicKey>,
}

impl AccountKey {
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    #[default]
    Ecdsa,
    Schnorr,
}

/// An input awaiting a signature, identified by its precomputed sighash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputToSign {
    pub index: usize,
    /// Compressed (or, for taproot, x-only) public key expected to sign
    pub public_key: String,
    /// 32-byte sighash, hex
    pub sighash: String,
    #[serde(default)]
    pub sighash_type: Option<u8>,
    /// Sign with BIP-340 Schnorr
    #[serde(default)]
    pub taproot: bool,
    /// Sign taproot inputs with the untweaked internal key
    #[serde(default)]
    pub disable_tweak: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub inputs: Vec<InputToSign>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInput {
    pub index: usize,
    pub public_key: String,
    /// Hex; DER plus sighash byte for ECDSA, 64 or 65 bytes for Schnorr
    pub signature: String,
}

/// Lookup of signing keys by account public key
pub(crate) trait KeySource {
    fn keypair_for(&self, public_key: &str) -> Option<&Secp256k1Keypair>;

    fn quantum_keypair_for(&self, public_key: &str) -> Option<&MlDsaKeyPair>;
}

/// Match a hex key against the compressed or x-only form of `keypair`.
pub(crate) fn matches_public_key(keypair: &Secp256k1Keypair, public_key: &str) -> bool {
    let public_key = public_key.trim().to_ascii_lowercase();
    match public_key.len() {
        66 => hex::encode(keypair.public_key_compressed()) == public_key,
        64 => hex::encode(keypair.x_only_public_key()) == public_key,
        _ => false,
    }
}

fn parse_hash(hash_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hash_hex.trim().trim_start_matches("0x"))
        .map_err(|_| VaultError::Signing("data is not valid hex".into()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::Signing(format!("expected 32 bytes, got {}", bytes.len())))
}

fn sign_input(keypair: &Secp256k1Keypair, input: &InputToSign) -> Result<String> {
    let sighash = parse_hash(&input.sighash)?;

    if input.taproot {
        let mut signature = if input.disable_tweak {
            keypair.sign_schnorr(&sighash)?.to_vec()
        } else {
            keypair.taproot_tweaked()?.sign_schnorr(&sighash)?.to_vec()
        };
        // SIGHASH_DEFAULT is implied by a bare 64-byte signature
        if let Some(sighash_type) = input.sighash_type.filter(|t| *t != 0x00) {
            signature.push(sighash_type);
        }
        Ok(hex::encode(signature))
    } else {
        let mut signature = keypair.sign_ecdsa_der(&sighash)?;
        signature.push(input.sighash_type.unwrap_or(SIGHASH_ALL));
        Ok(hex::encode(signature))
    }
}

#[derive(Debug, Clone)]
pub enum Keyring {
    Hd(HdKeyring),
    Simple(SimpleKeyring),
    Empty(EmptyKeyring),
}

impl Keyring {
    pub fn keyring_type(&self) -> KeyringType {
        match self {
            Keyring::Hd(_) => KeyringType::Hd,
            Keyring::Simple(_) => KeyringType::Simple,
            Keyring::Empty(_) => KeyringType::Empty,
        }
    }

    /// Rebuild a keyring from its persisted entry under `network`.
    pub fn restore(entry: &SavedVaultEntry, network: Network) -> Result<Self> {
        match entry.keyring_type {
            KeyringType::Hd => Ok(Keyring::Hd(HdKeyring::restore(
                &entry.data,
                entry.address_type,
                network,
            )?)),
            KeyringType::Simple => Ok(Keyring::Simple(SimpleKeyring::restore(&entry.data, network)?)),
            KeyringType::Empty => Ok(Keyring::Empty(EmptyKeyring::restore(&entry.data))),
        }
    }

    pub fn serialize(&self) -> Result<Value> {
        match self {
            Keyring::Hd(k) => k.serialize(),
            Keyring::Simple(k) => k.serialize(),
            Keyring::Empty(k) => k.serialize(),
        }
    }

    /// The persisted vault entry for this keyring.
    ///
    /// Empty keyrings standing in for a failed entry return that entry as it
    /// was read.
    pub fn to_entry(&self, address_type: AddressType) -> Result<Value> {
        if let Keyring::Empty(empty) = self {
            if let Some(raw) = empty.preserved_entry() {
                return Ok(raw.clone());
            }
        }

        let entry = SavedVaultEntry {
            keyring_type: self.keyring_type(),
            data: self.serialize()?,
            address_type,
        };
        Ok(serde_json::to_value(entry)?)
    }

    fn key_source(&self) -> Result<&dyn KeySource> {
        match self {
            Keyring::Hd(k) => Ok(k as &dyn KeySource),
            Keyring::Simple(k) => Ok(k as &dyn KeySource),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    pub fn accounts(&self) -> Vec<AccountKey> {
        match self {
            Keyring::Hd(k) => k.accounts(),
            Keyring::Simple(k) => k.accounts(),
            Keyring::Empty(_) => Vec::new(),
        }
    }

    pub fn public_keys(&self) -> Vec<String> {
        self.accounts().iter().map(AccountKey::public_key_hex).collect()
    }

    pub fn contains_public_key(&self, public_key: &str) -> bool {
        self.key_source()
            .map(|source| source.keypair_for(public_key).is_some())
            .unwrap_or(false)
    }

    pub fn add_accounts(&mut self, count: u32) -> Result<Vec<AccountKey>> {
        match self {
            Keyring::Hd(k) => k.add_accounts(count),
            Keyring::Simple(_) => Err(unsupported("simple keyrings hold a single account")),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    pub fn activate_accounts(&mut self, indexes: &[u32]) -> Result<Vec<AccountKey>> {
        match self {
            Keyring::Hd(k) => k.activate_accounts(indexes),
            Keyring::Simple(_) => Err(unsupported("simple keyrings hold a single account")),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    /// Sign every input whose public key belongs to this keyring.
    ///
    /// Inputs for foreign keys are skipped.
    pub fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<Vec<SignedInput>> {
        let source = self.key_source()?;
        let mut signed = Vec::new();

        for input in &tx.inputs {
            let Some(keypair) = source.keypair_for(&input.public_key) else {
                continue;
            };
            signed.push(SignedInput {
                index: input.index,
                public_key: input.public_key.clone(),
                signature: sign_input(keypair, input)?,
            });
        }

        Ok(signed)
    }

    /// BIP-137 message signature, base64.
    pub fn sign_message(&self, public_key: &str, message: &[u8]) -> Result<String> {
        let keypair = self.keypair_for(public_key)?;
        Ok(keypair.sign_message(message))
    }

    /// Sign a raw 32-byte hash; returns the 64-byte signature as hex.
    pub fn sign_data(&self, public_key: &str, data_hex: &str, scheme: SignatureScheme) -> Result<String> {
        let keypair = self.keypair_for(public_key)?;
        let hash = parse_hash(data_hex)?;
        let signature = match scheme {
            SignatureScheme::Ecdsa => keypair.sign_ecdsa(&hash)?,
            SignatureScheme::Schnorr => keypair.sign_schnorr(&hash)?,
        };
        Ok(hex::encode(signature))
    }

    /// ML-DSA signature by the quantum key of the given account, hex.
    pub fn sign_mldsa(&self, public_key: &str, message: &[u8]) -> Result<String> {
        let source = self.key_source()?;
        if source.keypair_for(public_key).is_none() {
            return Err(VaultError::AccountNotFound(public_key.to_string()));
        }
        let quantum = source
            .quantum_keypair_for(public_key)
            .ok_or_else(|| unsupported("account has no quantum key"))?;
        Ok(quantum.sign(message)?.to_hex())
    }

    /// Raw private key hex of an account (be careful with secret material!)
    pub fn export_account(&self, public_key: &str) -> Result<Zeroizing<String>> {
        Ok(self.keypair_for(public_key)?.private_key_hex())
    }

    fn keypair_for(&self, public_key: &str) -> Result<&Secp256k1Keypair> {
        self.key_source()?
            .keypair_for(public_key)
            .ok_or_else(|| VaultError::AccountNotFound(public_key.to_string()))
    }

    pub fn has_quantum_key(&self) -> bool {
        self.quantum_public_key().is_some()
    }

    /// Keyring-level quantum key; for HD keyrings the first account's.
    pub fn quantum_public_key(&self) -> Option<&MlDsaPublicKey> {
        match self {
            Keyring::Hd(k) => k.quantum_public_key(),
            Keyring::Simple(k) => k.quantum_public_key(),
            Keyring::Empty(_) => None,
        }
    }

    pub fn quantum_public_key_hash(&self) -> Option<String> {
        self.quantum_public_key().map(MlDsaPublicKey::hash)
    }

    pub fn import_quantum_key(&mut self, secret_hex: &str) -> Result<MlDsaPublicKey> {
        match self {
            Keyring::Simple(k) => k.import_quantum_key(secret_hex),
            Keyring::Hd(_) => Err(unsupported("HD quantum keys are derived from the mnemonic")),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    pub fn generate_fresh_quantum_key(&mut self) -> Result<MlDsaPublicKey> {
        match self {
            Keyring::Simple(k) => Ok(k.generate_fresh_quantum_key()),
            Keyring::Hd(_) => Err(unsupported("HD quantum keys are derived from the mnemonic")),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    pub fn clear_quantum_key(&mut self) -> Result<bool> {
        match self {
            Keyring::Simple(k) => Ok(k.clear_quantum_key()),
            Keyring::Hd(_) => Err(unsupported("HD quantum keys are derived from the mnemonic")),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    pub fn export_quantum_private_key(&self) -> Result<Zeroizing<String>> {
        match self {
            Keyring::Hd(k) => k.export_quantum_private_key(),
            Keyring::Simple(k) => k.export_quantum_private_key(),
            Keyring::Empty(_) => Err(unsupported("empty keyring holds no keys")),
        }
    }

    /// One-way fingerprint of the keyring's secret material
    pub fn wallet_fingerprint(&self) -> Option<String> {
        match self {
            Keyring::Hd(k) => Some(k.fingerprint()),
            Keyring::Simple(k) => Some(k.fingerprint()),
            Keyring::Empty(_) => None,
        }
    }
}

fn unsupported(reason: &str) -> VaultError {
    VaultError::UnsupportedOperation(reason.to_string())
}
