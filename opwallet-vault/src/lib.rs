//! OP Wallet Credential Vault
//!
//! The encrypted keyring store behind the OP Wallet extension. It holds
//! mnemonics and private keys (secp256k1 and ML-DSA), derives accounts for
//! each address type, signs, detects wallets or quantum keys imported more
//! than once, and keeps encrypted backups for conflict resolution.
//!
//! ## Security Model
//!
//! - Every persisted secret is encrypted under the user's password
//!   (Argon2id + ChaCha20-Poly1305)
//! - Locking drops the password and all key material from memory
//! - Errors, logs and duplication reports carry fingerprints, never secrets
//! - Mutations are checked before anything changes and persisted before
//!   they become visible

pub mod address;
pub mod chain;
pub mod cipher;
pub mod config;
pub mod duplication;
pub mod error;
pub mod events;
pub mod keyring;
pub mod migration;
pub mod network;
pub mod preferences;
pub mod secmem;
pub mod service;
pub mod storage;

pub use address::AddressType;
pub use chain::{ChainQuery, JsonRpcChainQuery};
pub use cipher::{CipherParams, Encryptor, PasswordCipher};
pub use config::VaultConfig;
pub use duplication::{DuplicationBackup, DuplicationDetector};
pub use error::{Result, VaultError};
pub use events::VaultEvent;
pub use keyring::{Keyring, KeyringType};
pub use network::Network;
pub use service::{Account, KeyringService, ServiceOptions, UnlockReport, VaultSnapshot};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
