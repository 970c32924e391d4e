//! ML-DSA (Dilithium) Digital Signatures
//!
//! ML-DSA is a lattice-based digital signature scheme standardized by NIST
//! in FIPS 204. All three parameter sets are supported; ML-DSA-65 is the
//! wallet default.
//!
//! # Key representation
//!
//! Secret keys are held as the 32-byte FIPS 204 seed (`xi`). The expanded
//! signing key is recomputed from the seed whenever it is needed, so the only
//! secret that is ever stored, exported or backed up is 32 bytes long.

use crate::error::PqError;
use ml_dsa::{
    EncodedSignature, EncodedVerifyingKey, KeyGen, MlDsa44, MlDsa65, MlDsa87, MlDsaParams,
    Signature, VerifyingKey, B32,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an ML-DSA seed in bytes
pub const ML_DSA_SEED_BYTES: usize = 32;

/// ML-DSA-44 public key size in bytes
pub const ML_DSA_44_PUBLIC_KEY_BYTES: usize = 1312;
/// ML-DSA-65 public key size in bytes
pub const ML_DSA_65_PUBLIC_KEY_BYTES: usize = 1952;
/// ML-DSA-87 public key size in bytes
pub const ML_DSA_87_PUBLIC_KEY_BYTES: usize = 2592;

/// ML-DSA-44 signature size in bytes
pub const ML_DSA_44_SIGNATURE_BYTES: usize = 2420;
/// ML-DSA-65 signature size in bytes
pub const ML_DSA_65_SIGNATURE_BYTES: usize = 3309;
/// ML-DSA-87 signature size in bytes
pub const ML_DSA_87_SIGNATURE_BYTES: usize = 4627;

/// ML-DSA parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityLevel {
    #[serde(rename = "MLDSA44")]
    Mldsa44,
    #[default]
    #[serde(rename = "MLDSA65")]
    Mldsa65,
    #[serde(rename = "MLDSA87")]
    Mldsa87,
}

impl SecurityLevel {
    /// Canonical name, as used in serialized keyrings
    pub fn name(&self) -> &'static str {
        match self {
            SecurityLevel::Mldsa44 => "MLDSA44",
            SecurityLevel::Mldsa65 => "MLDSA65",
            SecurityLevel::Mldsa87 => "MLDSA87",
        }
    }

    /// Encoded public key length for this parameter set
    pub fn public_key_len(&self) -> usize {
        match self {
            SecurityLevel::Mldsa44 => ML_DSA_44_PUBLIC_KEY_BYTES,
            SecurityLevel::Mldsa65 => ML_DSA_65_PUBLIC_KEY_BYTES,
            SecurityLevel::Mldsa87 => ML_DSA_87_PUBLIC_KEY_BYTES,
        }
    }

    /// Encoded signature length for this parameter set
    pub fn signature_len(&self) -> usize {
        match self {
            SecurityLevel::Mldsa44 => ML_DSA_44_SIGNATURE_BYTES,
            SecurityLevel::Mldsa65 => ML_DSA_65_SIGNATURE_BYTES,
            SecurityLevel::Mldsa87 => ML_DSA_87_SIGNATURE_BYTES,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = PqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "MLDSA44" | "LEVEL2" => Ok(SecurityLevel::Mldsa44),
            "MLDSA65" | "LEVEL3" => Ok(SecurityLevel::Mldsa65),
            "MLDSA87" | "LEVEL5" => Ok(SecurityLevel::Mldsa87),
            _ => Err(PqError::UnknownSecurityLevel(s.to_string())),
        }
    }
}

/// SHA-256 fingerprint of an encoded ML-DSA public key, hex encoded.
///
/// This is the same hash that the chain records when a classical key is
/// linked to an ML-DSA key.
pub fn public_key_hash(public_key: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key))
}

/// ML-DSA public key for signature verification
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MlDsaPublicKey {
    level: SecurityLevel,
    bytes: Vec<u8>,
}

impl MlDsaPublicKey {
    /// Create from raw bytes
    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self, PqError> {
        if bytes.len() != level.public_key_len() {
            return Err(PqError::InvalidPublicKey(format!(
                "expected {} bytes for {}, got {}",
                level.public_key_len(),
                level,
                bytes.len()
            )));
        }
        Ok(Self {
            level,
            bytes: bytes.to_vec(),
        })
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parameter set this key belongs to
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Hex encoding of the raw bytes
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// SHA-256 fingerprint of this key
    pub fn hash(&self) -> String {
        public_key_hash(&self.bytes)
    }

    /// Verify a signature on a message
    pub fn verify(&self, message: &[u8], signature: &MlDsaSignature) -> Result<(), PqError> {
        if signature.level != self.level {
            return Err(PqError::InvalidSignature(format!(
                "{} signature checked against {} key",
                signature.level, self.level
            )));
        }
        match self.level {
            SecurityLevel::Mldsa44 => verify_with::<MlDsa44>(&self.bytes, message, &signature.bytes),
            SecurityLevel::Mldsa65 => verify_with::<MlDsa65>(&self.bytes, message, &signature.bytes),
            SecurityLevel::Mldsa87 => verify_with::<MlDsa87>(&self.bytes, message, &signature.bytes),
        }
    }
}

impl fmt::Debug for MlDsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MlDsaPublicKey({}, {:02x?}...)", self.level, &self.bytes[..8])
    }
}

/// ML-DSA secret key, held as the 32-byte keygen seed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MlDsaSecretKey {
    seed: [u8; ML_DSA_SEED_BYTES],
}

impl MlDsaSecretKey {
    /// Create from raw seed bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PqError> {
        if bytes.len() != ML_DSA_SEED_BYTES {
            return Err(PqError::InvalidSecretKey(format!(
                "expected {} byte seed, got {}",
                ML_DSA_SEED_BYTES,
                bytes.len()
            )));
        }
        let mut seed = [0u8; ML_DSA_SEED_BYTES];
        seed.copy_from_slice(bytes);
        Ok(Self { seed })
    }

    /// Parse a hex encoded seed (an optional `0x` prefix is accepted)
    pub fn from_hex(hex_str: &str) -> Result<Self, PqError> {
        let trimmed = hex_str.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = hex::decode(trimmed)
            .map_err(|_| PqError::InvalidSecretKey("not valid hex".into()))?;
        let result = Self::from_bytes(&bytes);
        bytes.zeroize();
        result
    }

    /// Get the raw bytes (be careful with secret material!)
    pub fn as_bytes(&self) -> &[u8; ML_DSA_SEED_BYTES] {
        &self.seed
    }

    /// Hex encoding of the seed (be careful with secret material!)
    pub fn to_hex(&self) -> String {
        hex::encode(self.seed)
    }

    fn as_b32(&self) -> B32 {
        B32::from(self.seed)
    }
}

impl fmt::Debug for MlDsaSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MlDsaSecretKey([REDACTED])")
    }
}

/// ML-DSA detached signature
#[derive(Clone, PartialEq, Eq)]
pub struct MlDsaSignature {
    level: SecurityLevel,
    bytes: Vec<u8>,
}

impl MlDsaSignature {
    /// Create from raw bytes
    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self, PqError> {
        if bytes.len() != level.signature_len() {
            return Err(PqError::InvalidSignature(format!(
                "expected {} bytes for {}, got {}",
                level.signature_len(),
                level,
                bytes.len()
            )));
        }
        Ok(Self {
            level,
            bytes: bytes.to_vec(),
        })
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parameter set that produced this signature
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Hex encoding of the raw bytes
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for MlDsaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MlDsaSignature({}, {:02x?}...)", self.level, &self.bytes[..8])
    }
}

/// ML-DSA keypair for signing and verification
#[derive(Clone)]
pub struct MlDsaKeyPair {
    public_key: MlDsaPublicKey,
    secret_key: MlDsaSecretKey,
}

impl MlDsaKeyPair {
    /// Generate a new random keypair
    pub fn generate(level: SecurityLevel) -> Self {
        let mut seed = [0u8; ML_DSA_SEED_BYTES];
        OsRng.fill_bytes(&mut seed);
        let keypair = Self::from_seed(level, &seed);
        seed.zeroize();
        keypair
    }

    /// Generate a keypair deterministically from a 32-byte seed
    pub fn from_seed(level: SecurityLevel, seed: &[u8; ML_DSA_SEED_BYTES]) -> Self {
        Self::from_secret_key(
            level,
            MlDsaSecretKey {
                seed: *seed,
            },
        )
    }

    /// Rebuild the keypair belonging to a secret key
    pub fn from_secret_key(level: SecurityLevel, secret_key: MlDsaSecretKey) -> Self {
        let xi = secret_key.as_b32();
        let bytes = match level {
            SecurityLevel::Mldsa44 => public_key_with::<MlDsa44>(&xi),
            SecurityLevel::Mldsa65 => public_key_with::<MlDsa65>(&xi),
            SecurityLevel::Mldsa87 => public_key_with::<MlDsa87>(&xi),
        };
        Self {
            public_key: MlDsaPublicKey { level, bytes },
            secret_key,
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &MlDsaPublicKey {
        &self.public_key
    }

    /// Get the secret key
    pub fn secret_key(&self) -> &MlDsaSecretKey {
        &self.secret_key
    }

    /// Parameter set of this keypair
    pub fn level(&self) -> SecurityLevel {
        self.public_key.level
    }

    /// Sign a message (deterministic variant, empty context)
    pub fn sign(&self, message: &[u8]) -> Result<MlDsaSignature, PqError> {
        let xi = self.secret_key.as_b32();
        let bytes = match self.level() {
            SecurityLevel::Mldsa44 => sign_with::<MlDsa44>(&xi, message)?,
            SecurityLevel::Mldsa65 => sign_with::<MlDsa65>(&xi, message)?,
            SecurityLevel::Mldsa87 => sign_with::<MlDsa87>(&xi, message)?,
        };
        Ok(MlDsaSignature {
            level: self.level(),
            bytes,
        })
    }
}

impl fmt::Debug for MlDsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MlDsaKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &self.secret_key)
            .finish()
    }
}

fn public_key_with<P: MlDsaParams>(xi: &B32) -> Vec<u8> {
    let keypair = P::key_gen_internal(xi);
    keypair.verifying_key().encode().as_slice().to_vec()
}

fn sign_with<P: MlDsaParams>(xi: &B32, message: &[u8]) -> Result<Vec<u8>, PqError> {
    let keypair = P::key_gen_internal(xi);
    let signature = keypair
        .signing_key()
        .sign_deterministic(message, &[])
        .map_err(|_| PqError::SigningFailed)?;
    Ok(signature.encode().as_slice().to_vec())
}

fn verify_with<P: MlDsaParams>(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), PqError> {
    let encoded_key = EncodedVerifyingKey::<P>::try_from(public_key)
        .map_err(|_| PqError::InvalidPublicKey("wrong length".into()))?;
    let verifying_key = VerifyingKey::<P>::decode(&encoded_key);

    let encoded_signature = EncodedSignature::<P>::try_from(signature)
        .map_err(|_| PqError::InvalidSignature("wrong length".into()))?;
    let signature = Signature::<P>::decode(&encoded_signature)
        .ok_or_else(|| PqError::InvalidSignature("failed to parse signature".into()))?;

    if verifying_key.verify_with_context(message, &[], &signature) {
        Ok(())
    } else {
        Err(PqError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_sizes() {
        for level in [
            SecurityLevel::Mldsa44,
            SecurityLevel::Mldsa65,
            SecurityLevel::Mldsa87,
        ] {
            let keypair = MlDsaKeyPair::generate(level);
            assert_eq!(keypair.public_key().as_bytes().len(), level.public_key_len());
            assert_eq!(keypair.secret_key().as_bytes().len(), ML_DSA_SEED_BYTES);
        }
    }

    #[test]
    fn test_sign_verify() {
        let keypair = MlDsaKeyPair::from_seed(SecurityLevel::Mldsa65, &[7u8; 32]);
        let message = b"test message for signing";

        let signature = keypair.sign(message).unwrap();
        assert_eq!(signature.as_bytes().len(), ML_DSA_65_SIGNATURE_BYTES);

        assert!(keypair.public_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let keypair = MlDsaKeyPair::from_seed(SecurityLevel::Mldsa44, &[9u8; 32]);
        let sig1 = keypair.sign(b"same message").unwrap();
        let sig2 = keypair.sign(b"same message").unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = MlDsaKeyPair::generate(SecurityLevel::Mldsa65);
        let signature = keypair.sign(b"correct message").unwrap();

        let result = keypair.public_key().verify(b"wrong message", &signature);
        assert!(matches!(result, Err(PqError::VerificationFailed)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let keypair1 = MlDsaKeyPair::generate(SecurityLevel::Mldsa65);
        let keypair2 = MlDsaKeyPair::generate(SecurityLevel::Mldsa65);

        let message = b"test message";
        let signature = keypair1.sign(message).unwrap();

        let result = keypair2.public_key().verify(message, &signature);
        assert!(matches!(result, Err(PqError::VerificationFailed)));
    }

    #[test]
    fn test_level_mismatch_rejected() {
        let keypair44 = MlDsaKeyPair::from_seed(SecurityLevel::Mldsa44, &[1u8; 32]);
        let keypair65 = MlDsaKeyPair::from_seed(SecurityLevel::Mldsa65, &[1u8; 32]);

        let signature = keypair44.sign(b"msg").unwrap();
        let result = keypair65.public_key().verify(b"msg", &signature);
        assert!(matches!(result, Err(PqError::InvalidSignature(_))));
    }

    #[test]
    fn test_secret_key_hex_roundtrip() {
        let keypair = MlDsaKeyPair::generate(SecurityLevel::Mldsa65);
        let hex_seed = keypair.secret_key().to_hex();

        let restored = MlDsaKeyPair::from_secret_key(
            SecurityLevel::Mldsa65,
            MlDsaSecretKey::from_hex(&hex_seed).unwrap(),
        );
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn test_invalid_public_key_length() {
        let result = MlDsaPublicKey::from_bytes(SecurityLevel::Mldsa65, &[0u8; 100]);
        assert!(matches!(result, Err(PqError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_invalid_secret_key() {
        assert!(matches!(
            MlDsaSecretKey::from_bytes(&[0u8; 31]),
            Err(PqError::InvalidSecretKey(_))
        ));
        assert!(matches!(
            MlDsaSecretKey::from_hex("zz"),
            Err(PqError::InvalidSecretKey(_))
        ));
    }

    #[test]
    fn test_invalid_signature_length() {
        let result = MlDsaSignature::from_bytes(SecurityLevel::Mldsa65, &[0u8; 100]);
        assert!(matches!(result, Err(PqError::InvalidSignature(_))));
    }

    #[test]
    fn test_public_key_hash_is_sha256_hex() {
        let keypair = MlDsaKeyPair::from_seed(SecurityLevel::Mldsa65, &[3u8; 32]);
        let hash = keypair.public_key().hash();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, public_key_hash(keypair.public_key().as_bytes()));
    }

    #[test]
    fn test_security_level_parsing() {
        assert_eq!("MLDSA44".parse::<SecurityLevel>().unwrap(), SecurityLevel::Mldsa44);
        assert_eq!("ml-dsa-65".parse::<SecurityLevel>().unwrap(), SecurityLevel::Mldsa65);
        assert_eq!("level5".parse::<SecurityLevel>().unwrap(), SecurityLevel::Mldsa87);
        assert!("mldsa99".parse::<SecurityLevel>().is_err());
    }

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let keypair = MlDsaKeyPair::generate(SecurityLevel::Mldsa65);
        let debug = format!("{:?}", keypair.secret_key());
        assert_eq!(debug, "MlDsaSecretKey([REDACTED])");
    }
}
