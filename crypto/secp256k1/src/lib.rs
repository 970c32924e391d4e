#![deny(unsafe_code)]

//! Secp256k1 key support for Bitcoin-style wallets.
//!
//! This crate provides BIP-32/BIP-39/BIP-44 key derivation, WIF import and
//! export, and the signature flavours a wallet keyring needs:
//!
//! - ECDSA over a 32-byte sighash (DER for transaction inputs, compact for
//!   raw data)
//! - BIP-137 "Bitcoin Signed Message" signatures
//! - BIP-340 Schnorr signatures, with the BIP-341 key-path tweak for Taproot
//!
//! # Examples
//!
//! ```
//! use opw_crypto_secp256k1::Secp256k1Keypair;
//!
//! let mnemonic = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
//! // m/84'/0'/0'/0/0
//! let keypair = Secp256k1Keypair::from_mnemonic(mnemonic, "", 84, 0, 0).unwrap();
//!
//! let pubkey = keypair.public_key_compressed();
//! assert!(pubkey[0] == 0x02 || pubkey[0] == 0x03);
//!
//! let signature = keypair.sign_message(b"Hello, Bitcoin!");
//! assert!(!signature.is_empty());
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bip39::{Language, Mnemonic, Seed};
use hmac::{Hmac, Mac};
use k256::{
    ecdsa::{
        signature::hazmat::{PrehashSigner, PrehashVerifier},
        RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey,
    },
    elliptic_curve::{
        bigint::{Encoding, Limb},
        ff::PrimeField,
        sec1::ToEncodedPoint,
    },
    schnorr, FieldBytes, ProjectivePoint, PublicKey, Scalar, SecretKey, U256,
};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha512 = Hmac<Sha512>;

/// Errors that can occur during key operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid mnemonic phrase")]
    InvalidMnemonic,

    #[error("Key derivation failed: {0}")]
    DerivationError(String),

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid WIF: {0}")]
    InvalidWif(String),

    #[error("Invalid taproot tweak")]
    InvalidTweak,

    #[error("Signing failed: {0}")]
    SigningError(String),
}

/// Hardened key offset
pub const HARDENED: u32 = 0x8000_0000;

/// Magic prefix of BIP-137 signed messages (length byte included)
const MESSAGE_MAGIC: &[u8] = b"\x18Bitcoin Signed Message:\n";

/// Build the account path `m/purpose'/coin_type'/0'/0/index`.
pub fn derivation_path(purpose: u32, coin_type: u32, index: u32) -> [u32; 5] {
    [
        purpose | HARDENED,
        coin_type | HARDENED,
        HARDENED,
        0,
        index,
    ]
}

/// Metadata recovered from a WIF string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifInfo {
    /// Network version byte (0x80 mainnet, 0xef test networks)
    pub version: u8,
    /// Whether the key was marked for compressed public keys
    pub compressed: bool,
}

/// A secp256k1 keypair.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Secp256k1Keypair {
    #[zeroize(skip)] // SigningKey implements its own zeroization
    signing_key: SigningKey,
}

impl core::fmt::Debug for Secp256k1Keypair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Secp256k1Keypair {{ pubkey: {} }}",
            hex::encode(self.public_key_compressed())
        )
    }
}

impl Secp256k1Keypair {
    /// Create a keypair from a BIP-39 mnemonic phrase.
    ///
    /// Uses the path `m/purpose'/coin_type'/0'/0/{index}`.
    pub fn from_mnemonic(
        mnemonic: &str,
        passphrase: &str,
        purpose: u32,
        coin_type: u32,
        index: u32,
    ) -> Result<Self, Error> {
        let mnemonic =
            Mnemonic::from_phrase(mnemonic, Language::English).map_err(|_| Error::InvalidMnemonic)?;

        let seed = Seed::new(&mnemonic, passphrase);
        Self::from_seed(seed.as_bytes(), &derivation_path(purpose, coin_type, index))
    }

    /// Create a keypair from a 64-byte BIP-39 seed and a derivation path.
    pub fn from_seed(seed: &[u8], path: &[u32]) -> Result<Self, Error> {
        // Derive master key from seed
        let mut mac =
            HmacSha512::new_from_slice(b"Bitcoin seed").expect("HMAC can take any size key");
        mac.update(seed);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&result[..32]);
        chain_code.copy_from_slice(&result[32..]);

        for &child_index in path {
            let (new_key, new_chain) =
                derive_child(&key, &chain_code, child_index).map_err(Error::DerivationError)?;
            key = new_key;
            chain_code = new_chain;
        }

        let secret_key =
            SecretKey::from_bytes((&key).into()).map_err(|_| Error::InvalidPrivateKey);

        key.zeroize();
        chain_code.zeroize();

        Ok(Self {
            signing_key: SigningKey::from(secret_key?),
        })
    }

    /// Create a keypair from raw 32-byte private key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secret_key =
            SecretKey::from_bytes(bytes.into()).map_err(|_| Error::InvalidPrivateKey)?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Create a keypair from a 64-character hex private key (optional `0x`).
    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let trimmed = hex_str.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let decoded = Zeroizing::new(hex::decode(trimmed).map_err(|_| Error::InvalidPrivateKey)?);
        let bytes: &[u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidPrivateKey)?;
        Self::from_bytes(bytes)
    }

    /// Decode a Wallet Import Format string.
    pub fn from_wif(wif: &str) -> Result<(Self, WifInfo), Error> {
        let payload = Zeroizing::new(
            bs58::decode(wif.trim())
                .with_check(None)
                .into_vec()
                .map_err(|e| Error::InvalidWif(e.to_string()))?,
        );

        let compressed = match payload.len() {
            33 => false,
            34 if payload[33] == 0x01 => true,
            n => return Err(Error::InvalidWif(format!("unexpected payload length {}", n))),
        };

        let bytes: &[u8; 32] = payload[1..33]
            .try_into()
            .map_err(|_| Error::InvalidWif("bad key length".into()))?;
        let keypair = Self::from_bytes(bytes)?;

        Ok((
            keypair,
            WifInfo {
                version: payload[0],
                compressed,
            },
        ))
    }

    /// Encode as compressed-key WIF with the given network version byte.
    pub fn to_wif(&self, version: u8) -> Zeroizing<String> {
        let mut payload = Zeroizing::new(Vec::with_capacity(34));
        payload.push(version);
        payload.extend_from_slice(&self.secret_bytes()[..]);
        payload.push(0x01);
        Zeroizing::new(bs58::encode(payload.as_slice()).with_check().into_string())
    }

    /// Raw private key bytes (be careful with secret material!)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes().into())
    }

    /// Hex encoded private key (be careful with secret material!)
    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret_bytes()[..]))
    }

    /// Get the public key as compressed bytes (33 bytes: 0x02/0x03 || x).
    pub fn public_key_compressed(&self) -> [u8; 33] {
        let verifying_key = self.signing_key.verifying_key();
        let point = verifying_key.to_encoded_point(true);
        let mut result = [0u8; 33];
        result.copy_from_slice(point.as_bytes());
        result
    }

    /// Get the public key as uncompressed bytes (65 bytes: 0x04 || x || y).
    pub fn public_key_uncompressed(&self) -> [u8; 65] {
        let verifying_key = self.signing_key.verifying_key();
        let point = verifying_key.to_encoded_point(false);
        let mut result = [0u8; 65];
        result.copy_from_slice(point.as_bytes());
        result
    }

    /// Get the BIP-340 x-only public key.
    pub fn x_only_public_key(&self) -> [u8; 32] {
        let compressed = self.public_key_compressed();
        let mut result = [0u8; 32];
        result.copy_from_slice(&compressed[1..]);
        result
    }

    /// Sign a 32-byte hash, returning a compact 64-byte `r || s` signature.
    pub fn sign_ecdsa(&self, hash: &[u8; 32]) -> Result<[u8; 64], Error> {
        let signature: K256Signature = self
            .signing_key
            .sign_prehash(hash)
            .map_err(|e| Error::SigningError(e.to_string()))?;
        let mut result = [0u8; 64];
        result.copy_from_slice(&signature.to_bytes());
        Ok(result)
    }

    /// Sign a 32-byte sighash, returning a DER encoded signature.
    pub fn sign_ecdsa_der(&self, hash: &[u8; 32]) -> Result<Vec<u8>, Error> {
        let signature: K256Signature = self
            .signing_key
            .sign_prehash(hash)
            .map_err(|e| Error::SigningError(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Sign a raw 32-byte hash with a recoverable signature.
    ///
    /// Returns `(r || s, recovery_id)`.
    pub fn sign_hash_recoverable(&self, hash: &[u8; 32]) -> Result<([u8; 64], u8), Error> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| Error::SigningError(e.to_string()))?;
        let mut rs = [0u8; 64];
        rs.copy_from_slice(&signature.to_bytes());
        Ok((rs, recovery_id.to_byte()))
    }

    /// Sign a message using the BIP-137 "Bitcoin Signed Message" format.
    ///
    /// Returns the base64 encoding of `header || r || s`, where the header
    /// is `27 + 4 + recovery_id` (compressed public key).
    pub fn sign_message(&self, message: &[u8]) -> String {
        let hash = bitcoin_message_hash(message);
        // RFC 6979 nonces make this infallible for a valid key
        let (rs, recovery_id) = match self.sign_hash_recoverable(&hash) {
            Ok(parts) => parts,
            Err(_) => return String::new(),
        };

        let mut result = [0u8; 65];
        result[0] = 27 + 4 + recovery_id;
        result[1..].copy_from_slice(&rs);
        BASE64.encode(result)
    }

    /// Sign a 32-byte hash with a BIP-340 Schnorr signature.
    pub fn sign_schnorr(&self, hash: &[u8; 32]) -> Result<[u8; 64], Error> {
        let signing_key = schnorr::SigningKey::from_bytes(&self.secret_bytes()[..])
            .map_err(|_| Error::InvalidPrivateKey)?;
        let signature: schnorr::Signature = signing_key
            .sign_prehash(hash)
            .map_err(|e| Error::SigningError(e.to_string()))?;
        Ok(signature.to_bytes())
    }

    /// Apply the BIP-341 key-path tweak (no script tree).
    ///
    /// The returned keypair signs for the Taproot output key of this key.
    pub fn taproot_tweaked(&self) -> Result<Self, Error> {
        let mut secret: Scalar = **self.signing_key.as_nonzero_scalar();
        if self.public_key_compressed()[0] == 0x03 {
            secret = -secret;
        }

        let tweaked = secret + tap_tweak_scalar(&self.x_only_public_key())?;
        let mut bytes: [u8; 32] = tweaked.to_bytes().into();
        let result = Self::from_bytes(&bytes);
        bytes.zeroize();
        result.map_err(|_| Error::InvalidTweak)
    }
}

/// Derive a child key from a parent key and chain code.
fn derive_child(
    parent_key: &[u8; 32],
    parent_chain: &[u8; 32],
    index: u32,
) -> Result<([u8; 32], [u8; 32]), String> {
    let mut mac = HmacSha512::new_from_slice(parent_chain).expect("HMAC can take any size key");

    if index >= HARDENED {
        // Hardened derivation: use 0x00 || parent_key || index
        mac.update(&[0x00]);
        mac.update(parent_key);
    } else {
        // Normal derivation: use compressed public key || index
        let secret = SecretKey::from_bytes(parent_key.into())
            .map_err(|_| "Invalid parent key".to_string())?;
        let signing = SigningKey::from(secret);
        let pubkey = signing.verifying_key().to_encoded_point(true);
        mac.update(pubkey.as_bytes());
    }

    mac.update(&index.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let mut derived_key = [0u8; 32];
    derived_key.copy_from_slice(&result[..32]);

    // Add parent key to derived key (mod n) using U256 arithmetic
    let parent_u256 = U256::from_be_slice(parent_key);
    let derived_u256 = U256::from_be_slice(&derived_key);
    derived_key.zeroize();

    // secp256k1 curve order
    let n = U256::from_be_hex("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141");

    let (sum, overflow) = parent_u256.adc(&derived_u256, Limb::ZERO);
    let new_key_u256 = if overflow.0 != 0 || sum >= n {
        sum.wrapping_sub(&n)
    } else {
        sum
    };

    let new_key: [u8; 32] = new_key_u256.to_be_bytes();

    let mut new_chain = [0u8; 32];
    new_chain.copy_from_slice(&result[32..]);

    Ok((new_key, new_chain))
}

/// `RIPEMD160(SHA256(data))`
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// `SHA256(SHA256(data))`
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// BIP-340 tagged hash.
pub fn tagged_hash(tag: &str, message: &[u8]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(message);
    hasher.finalize().into()
}

/// Digest signed by BIP-137 message signatures.
pub fn bitcoin_message_hash(message: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(MESSAGE_MAGIC.len() + 9 + message.len());
    data.extend_from_slice(MESSAGE_MAGIC);
    write_varint(&mut data, message.len() as u64);
    data.extend_from_slice(message);
    sha256d(&data)
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn tap_tweak_scalar(x_only: &[u8; 32]) -> Result<Scalar, Error> {
    let tweak = tagged_hash("TapTweak", x_only);
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(tweak))).ok_or(Error::InvalidTweak)
}

/// Compute the BIP-341 output key for a key-path-only Taproot output.
pub fn taproot_output_key(x_only: &[u8; 32]) -> Result<[u8; 32], Error> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(x_only);

    let internal = PublicKey::from_sec1_bytes(&compressed).map_err(|_| Error::InvalidPublicKey)?;
    let output = internal.to_projective() + ProjectivePoint::GENERATOR * tap_tweak_scalar(x_only)?;

    let encoded = output.to_affine().to_encoded_point(true);
    if encoded.as_bytes().len() != 33 {
        return Err(Error::InvalidTweak);
    }

    let mut result = [0u8; 32];
    result.copy_from_slice(&encoded.as_bytes()[1..]);
    Ok(result)
}

/// Verify a compact ECDSA signature against a compressed public key.
pub fn verify_ecdsa(public_key: &[u8], hash: &[u8; 32], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = K256Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify_prehash(hash, &signature).is_ok()
}

/// Verify a BIP-340 Schnorr signature against an x-only public key.
pub fn verify_schnorr(x_only: &[u8; 32], hash: &[u8; 32], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = schnorr::VerifyingKey::from_bytes(x_only) else {
        return false;
    };
    let Ok(signature) = schnorr::Signature::try_from(&signature[..]) else {
        return false;
    };
    verifying_key.verify_prehash(hash, &signature).is_ok()
}

/// Recover the compressed public key that produced a BIP-137 signature.
pub fn recover_message_signer(message: &[u8], signature_b64: &str) -> Option<[u8; 33]> {
    let raw = BASE64.decode(signature_b64).ok()?;
    if raw.len() != 65 || raw[0] < 27 {
        return None;
    }

    let recovery_id = RecoveryId::from_byte((raw[0] - 27) & 0x03)?;
    let signature = K256Signature::from_slice(&raw[1..]).ok()?;
    let hash = bitcoin_message_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id).ok()?;

    let point = verifying_key.to_encoded_point(true);
    let mut result = [0u8; 33];
    result.copy_from_slice(point.as_bytes());
    Some(result)
}
