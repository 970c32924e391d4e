//! Key Derivation for Post-Quantum Keys
//!
//! HD keyrings derive one ML-DSA keypair per active account index from the
//! same BIP-39 seed that produces the classical keys. The classical and
//! post-quantum paths are independent:
//!
//! ```text
//! bip39 seed
//!    │
//!    ├── BIP-32 m/purpose'/coin'/0'/0/i ──► secp256k1 keypair
//!    │
//!    └── HKDF(salt="opwallet-mldsa-v1", info="mldsa/<level>/<i>") ──► ML-DSA keypair
//! ```
//!
//! Uniqueness across indexes of one seed follows from the index being part of
//! the HKDF info. Uniqueness across different seeds is not structural and has
//! to be checked by the vault.

use crate::{MlDsaKeyPair, MlDsaSecretKey, SecurityLevel, OPWALLET_MLDSA_DOMAIN};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Derive the ML-DSA secret key for an account index
pub fn derive_account_secret_key(
    bip39_seed: &[u8],
    level: SecurityLevel,
    index: u32,
) -> MlDsaSecretKey {
    let hk = Hkdf::<Sha256>::new(Some(OPWALLET_MLDSA_DOMAIN), bip39_seed);

    let mut seed = [0u8; 32];
    let info = format!("mldsa/{}/{}", level.name(), index);
    hk.expand(info.as_bytes(), &mut seed)
        .expect("32 bytes is valid for HKDF-SHA256");

    let secret_key = MlDsaSecretKey::from_bytes(&seed).expect("seed is 32 bytes");
    seed.zeroize();
    secret_key
}

/// Derive the ML-DSA keypair for an account index
pub fn derive_account_keypair(bip39_seed: &[u8], level: SecurityLevel, index: u32) -> MlDsaKeyPair {
    MlDsaKeyPair::from_secret_key(level, derive_account_secret_key(bip39_seed, level, index))
}
