//! Single-key keyring
//!
//! Holds exactly one secp256k1 key and, optionally, one ML-DSA key. The
//! quantum key is never derived from the classical key: it is either
//! imported or generated fresh.

use opw_crypto_pq::{MlDsaKeyPair, MlDsaPublicKey, MlDsaSecretKey, SecurityLevel};
use opw_crypto_secp256k1::Secp256k1Keypair;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use super::{AccountKey, KeySource};
use crate::error::{Result, VaultError};
use crate::network::Network;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimpleKeyringData {
    /// Hex; older vaults may hold WIF
    private_key: Zeroizing<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quantum_private_key: Option<Zeroizing<String>>,
    #[serde(default)]
    security_level: SecurityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network: Option<Network>,
}

#[derive(Clone)]
pub struct SimpleKeyring {
    keypair: Secp256k1Keypair,
    quantum: Option<MlDsaKeyPair>,
    security_level: SecurityLevel,
    network: Network,
}

impl fmt::Debug for SimpleKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleKeyring")
            .field("public_key", &hex::encode(self.keypair.public_key_compressed()))
            .field("has_quantum_key", &self.quantum.is_some())
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Parse a hex (optionally `0x`-prefixed) or WIF private key.
///
/// With `expected` set, WIF keys must carry that network's version byte.
/// Persisted keys are read without the check since the secret itself is
/// network-independent.
fn parse_private_key(input: &str, expected: Option<Network>) -> Result<Secp256k1Keypair> {
    let trimmed = input.trim();
    let bare = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    if bare.len() == 64 && bare.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(Secp256k1Keypair::from_hex(bare)?);
    }

    let (keypair, info) = Secp256k1Keypair::from_wif(trimmed)?;
    if let Some(network) = expected {
        if info.version != network.wif_version() {
            return Err(VaultError::InvalidKey(format!(
                "WIF key does not belong to {}",
                network
            )));
        }
    }
    Ok(keypair)
}

impl SimpleKeyring {
    pub fn from_private_key(
        private_key: &str,
        network: Network,
        security_level: SecurityLevel,
    ) -> Result<Self> {
        let keypair = parse_private_key(private_key, Some(network))?;
        Ok(Self::with_keypair(keypair, network, security_level))
    }

    fn with_keypair(
        keypair: Secp256k1Keypair,
        network: Network,
        security_level: SecurityLevel,
    ) -> Self {
        Self {
            keypair,
            quantum: None,
            security_level,
            network,
        }
    }

    /// Rebuild from persisted data (object form or the legacy array of hex keys).
    pub fn restore(data: &Value, network: Network) -> Result<Self> {
        if let Some(keys) = data.as_array() {
            let first = keys
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| VaultError::Deserialization("simple keyring has no key".into()))?;
            if keys.len() > 1 {
                tracing::warn!("Legacy simple keyring holds {} keys, keeping the first", keys.len());
            }
            let keypair = parse_private_key(first, None)?;
            return Ok(Self::with_keypair(keypair, network, SecurityLevel::default()));
        }

        let data = SimpleKeyringData::deserialize(data)
            .map_err(|e| VaultError::Deserialization(format!("simple keyring: {}", e)))?;

        let keypair = parse_private_key(&data.private_key, None)?;
        let mut keyring = Self::with_keypair(keypair, network, data.security_level);
        if let Some(quantum_key) = &data.quantum_private_key {
            keyring.import_quantum_key(quantum_key)?;
        }
        Ok(keyring)
    }

    pub fn serialize(&self) -> Result<Value> {
        let data = SimpleKeyringData {
            private_key: self.keypair.private_key_hex(),
            quantum_private_key: self
                .quantum
                .as_ref()
                .map(|q| Zeroizing::new(q.secret_key().to_hex())),
            security_level: self.security_level,
            network: Some(self.network),
        };
        Ok(serde_json::to_value(&data)?)
    }

    pub fn public_key(&self) -> [u8; 33] {
        self.keypair.public_key_compressed()
    }

    pub fn accounts(&self) -> Vec<AccountKey> {
        vec![AccountKey {
            index: 0,
            public_key: self.keypair.public_key_compressed(),
            quantum_public_key: self.quantum.as_ref().map(|q| q.public_key().clone()),
        }]
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// SHA-256 of the lowercase private key hex
    pub fn fingerprint(&self) -> String {
        let private_key = self.keypair.private_key_hex();
        hex::encode(Sha256::digest(private_key.as_bytes()))
    }

    pub fn private_key_hex(&self) -> Zeroizing<String> {
        self.keypair.private_key_hex()
    }

    pub fn quantum_public_key(&self) -> Option<&MlDsaPublicKey> {
        self.quantum.as_ref().map(|q| q.public_key())
    }

    /// Replace the quantum key with an imported 32-byte seed (hex).
    pub fn import_quantum_key(&mut self, secret_hex: &str) -> Result<MlDsaPublicKey> {
        let secret = MlDsaSecretKey::from_hex(secret_hex)?;
        let keypair = MlDsaKeyPair::from_secret_key(self.security_level, secret);
        let public_key = keypair.public_key().clone();
        self.quantum = Some(keypair);
        Ok(public_key)
    }

    pub fn generate_fresh_quantum_key(&mut self) -> MlDsaPublicKey {
        let keypair = MlDsaKeyPair::generate(self.security_level);
        let public_key = keypair.public_key().clone();
        self.quantum = Some(keypair);
        public_key
    }

    /// Returns whether a key was present.
    pub fn clear_quantum_key(&mut self) -> bool {
        self.quantum.take().is_some()
    }

    pub fn export_quantum_private_key(&self) -> Result<Zeroizing<String>> {
        self.quantum
            .as_ref()
            .map(|q| Zeroizing::new(q.secret_key().to_hex()))
            .ok_or_else(|| VaultError::UnsupportedOperation("keyring has no quantum key".into()))
    }
}

impl KeySource for SimpleKeyring {
    fn keypair_for(&self, public_key: &str) -> Option<&Secp256k1Keypair> {
        super::matches_public_key(&self.keypair, public_key).then_some(&self.keypair)
    }

    fn quantum_keypair_for(&self, public_key: &str) -> Option<&MlDsaKeyPair> {
        if super::matches_public_key(&self.keypair, public_key) {
            self.quantum.as_ref()
        } else {
            None
        }
    }
}
