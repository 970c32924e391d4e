//! Post-Quantum Signature Primitives for the OP Wallet vault
//!
//! This crate wraps the NIST-standardized ML-DSA signature scheme (FIPS 204)
//! for use by wallet keyrings:
//!
//! - Keypairs are created from a 32-byte seed, either random (imported or
//!   freshly generated single-key wallets) or derived from a BIP-39 seed per
//!   account index (HD wallets).
//! - Public keys are fingerprinted with SHA-256; the fingerprint is what the
//!   chain records when a classical key is linked to an ML-DSA key, and what
//!   the vault compares to detect reused quantum keys.
//!
//! # Example
//!
//! ```rust
//! use opw_crypto_pq::{derive_account_keypair, MlDsaKeyPair, SecurityLevel};
//!
//! let keypair = MlDsaKeyPair::from_seed(SecurityLevel::Mldsa65, &[0u8; 32]);
//! let signature = keypair.sign(b"transaction data").unwrap();
//! assert!(keypair.public_key().verify(b"transaction data", &signature).is_ok());
//!
//! let account0 = derive_account_keypair(b"bip39 seed bytes", SecurityLevel::Mldsa65, 0);
//! assert_eq!(account0.public_key().hash().len(), 64);
//! ```

mod derive;
mod error;
mod sig;

pub use derive::{derive_account_keypair, derive_account_secret_key};
pub use error::PqError;
pub use sig::{
    public_key_hash, MlDsaKeyPair, MlDsaPublicKey, MlDsaSecretKey, MlDsaSignature,
    SecurityLevel, ML_DSA_44_PUBLIC_KEY_BYTES, ML_DSA_44_SIGNATURE_BYTES,
    ML_DSA_65_PUBLIC_KEY_BYTES, ML_DSA_65_SIGNATURE_BYTES, ML_DSA_87_PUBLIC_KEY_BYTES,
    ML_DSA_87_SIGNATURE_BYTES, ML_DSA_SEED_BYTES,
};

/// Domain separator for ML-DSA account key derivation
pub const OPWALLET_MLDSA_DOMAIN: &[u8] = b"opwallet-mldsa-v1";
