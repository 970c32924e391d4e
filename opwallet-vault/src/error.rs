//! Vault error taxonomy
//!
//! Errors never carry secret material. Messages name keyring indexes,
//! public keys and fingerprints only.

use thiserror::Error;

use crate::chain::ChainError;
use crate::cipher::CipherError;
use crate::storage::StorageError;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("incorrect password")]
    IncorrectPassword,

    #[error("no vault found, boot the vault first")]
    NoVault,

    #[error("vault is locked")]
    Locked,

    #[error("wallet already exists (keyring {index})")]
    DuplicateWallet { index: usize },

    #[error("quantum key {fingerprint} is already used by keyring {index}")]
    DuplicateQuantumKey { index: usize, fingerprint: String },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("failed to deserialize keyring: {0}")]
    Deserialization(String),

    #[error("invalid backup format: {0}")]
    InvalidBackupFormat(String),

    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("no duplication backup found")]
    NoBackup,

    #[error("keyring {0} not found")]
    KeyringNotFound(usize),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid mnemonic")]
    InvalidMnemonic,

    #[error("address derivation failed: {0}")]
    Address(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("network switch failed at keyring {index}: {reason}")]
    NetworkSwitch { index: usize, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<CipherError> for VaultError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Decryption | CipherError::Format(_) => VaultError::Decryption,
            other => VaultError::Encryption(other.to_string()),
        }
    }
}

impl From<opw_crypto_secp256k1::Error> for VaultError {
    fn from(err: opw_crypto_secp256k1::Error) -> Self {
        use opw_crypto_secp256k1::Error as KeyError;
        match err {
            KeyError::InvalidMnemonic => VaultError::InvalidMnemonic,
            KeyError::SigningError(msg) => VaultError::Signing(msg),
            other => VaultError::InvalidKey(other.to_string()),
        }
    }
}

impl From<opw_crypto_pq::PqError> for VaultError {
    fn from(err: opw_crypto_pq::PqError) -> Self {
        use opw_crypto_pq::PqError;
        match &err {
            PqError::SigningFailed => VaultError::Signing(err.to_string()),
            _ => VaultError::InvalidKey(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Deserialization(err.to_string())
    }
}
