//! Password Cipher
//!
//! Encrypts every persisted secret blob (boot marker, vault, duplication
//! backup) under the user's password:
//! - Argon2id for password-based key derivation
//! - ChaCha20-Poly1305 for authenticated encryption
//!
//! The output is a self-describing JSON string carrying the format version,
//! the Argon2 parameters, the salt and the nonce, so blobs written with one
//! parameter set remain readable after the configured parameters change.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Current blob format version
const CIPHER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Wrong password or tampered ciphertext
    #[error("decryption failed")]
    Decryption,

    #[error("malformed ciphertext: {0}")]
    Format(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Password-based encryption of opaque blobs.
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Encrypt `plaintext` under `password`, returning a printable blob.
    async fn encrypt(&self, password: &str, plaintext: &[u8]) -> Result<String, CipherError>;

    /// Decrypt a blob produced by [`Encryptor::encrypt`].
    async fn decrypt(
        &self,
        password: &str,
        ciphertext: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CipherError>;
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    /// Memory cost in KiB
    #[serde(rename = "m")]
    pub memory_kb: u32,
    /// Number of passes
    #[serde(rename = "t")]
    pub iterations: u32,
    /// Degree of parallelism
    #[serde(rename = "p")]
    pub parallelism: u32,
}

impl Default for CipherParams {
    fn default() -> Self {
        // 64 MB, tuned for security vs. unlock latency
        Self {
            memory_kb: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl CipherParams {
    /// Minimal cost parameters. Only suitable for tests.
    pub fn insecure_for_tests() -> Self {
        Self {
            memory_kb: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// On-the-wire form of an encrypted blob
#[derive(Serialize, Deserialize)]
struct SealedBlob {
    version: u32,
    kdf: CipherParams,
    /// Argon2 salt (base64, as produced by `SaltString`)
    salt: String,
    /// ChaCha20-Poly1305 nonce (12 bytes, hex encoded)
    nonce: String,
    /// Hex encoded ciphertext with tag
    ciphertext: String,
}

/// Default [`Encryptor`]: Argon2id + ChaCha20-Poly1305.
///
/// Key derivation runs on the blocking thread pool so callers stay
/// responsive while a 64 MB Argon2 pass is in flight.
#[derive(Debug, Clone, Default)]
pub struct PasswordCipher {
    params: CipherParams,
}

impl PasswordCipher {
    pub fn new(params: CipherParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> CipherParams {
        self.params
    }
}

#[async_trait]
impl Encryptor for PasswordCipher {
    async fn encrypt(&self, password: &str, plaintext: &[u8]) -> Result<String, CipherError> {
        let params = self.params;
        let password = Zeroizing::new(password.to_owned());
        let plaintext = Zeroizing::new(plaintext.to_vec());

        tokio::task::spawn_blocking(move || seal(&params, &password, &plaintext))
            .await
            .map_err(|e| CipherError::Encryption(e.to_string()))?
    }

    async fn decrypt(
        &self,
        password: &str,
        ciphertext: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let password = Zeroizing::new(password.to_owned());
        let ciphertext = ciphertext.to_owned();

        tokio::task::spawn_blocking(move || open(&password, &ciphertext))
            .await
            .map_err(|e| CipherError::Format(e.to_string()))?
    }
}

fn seal(params: &CipherParams, password: &str, plaintext: &[u8]) -> Result<String, CipherError> {
    // Generate random salt for Argon2
    let salt = SaltString::generate(&mut OsRng);
    let key = derive_key(params, password, salt.as_str())?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| CipherError::Encryption("failed to create cipher".into()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CipherError::Encryption("AEAD encryption failed".into()))?;

    let blob = SealedBlob {
        version: CIPHER_VERSION,
        kdf: *params,
        salt: salt.to_string(),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    };

    serde_json::to_string(&blob).map_err(|e| CipherError::Encryption(e.to_string()))
}

fn open(password: &str, blob: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let blob: SealedBlob =
        serde_json::from_str(blob).map_err(|e| CipherError::Format(e.to_string()))?;

    if blob.version != CIPHER_VERSION {
        return Err(CipherError::Format(format!(
            "unsupported version {} (expected {})",
            blob.version, CIPHER_VERSION
        )));
    }

    let nonce_bytes =
        hex::decode(&blob.nonce).map_err(|_| CipherError::Format("invalid nonce".into()))?;
    let ciphertext = hex::decode(&blob.ciphertext)
        .map_err(|_| CipherError::Format("invalid ciphertext".into()))?;

    if nonce_bytes.len() != 12 {
        return Err(CipherError::Format("invalid nonce length".into()));
    }

    let key = derive_key(&blob.kdf, password, &blob.salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| CipherError::Format("failed to create cipher".into()))?;

    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| CipherError::Decryption)
}

/// Derive a 32-byte encryption key from password using Argon2id
fn derive_key(
    params: &CipherParams,
    password: &str,
    salt: &str,
) -> Result<Zeroizing<[u8; 32]>, CipherError> {
    let salt = SaltString::from_b64(salt).map_err(|_| CipherError::Format("invalid salt".into()))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(
            params.memory_kb,
            params.iterations,
            params.parallelism,
            Some(32),
        )
        .map_err(|e| CipherError::KeyDerivation(e.to_string()))?,
    );

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

    let output = hash
        .hash
        .ok_or_else(|| CipherError::KeyDerivation("no hash output".into()))?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&output.as_bytes()[..32]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PASSWORD: &str = "test-password-123";

    fn cipher() -> PasswordCipher {
        PasswordCipher::new(CipherParams::insecure_for_tests())
    }

    #[tokio::test]
    async fn test_encrypt_decrypt() {
        let blob = cipher().encrypt(TEST_PASSWORD, b"vault contents").await.unwrap();
        let plain = cipher().decrypt(TEST_PASSWORD, &blob).await.unwrap();
        assert_eq!(plain.as_slice(), b"vault contents");
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let blob = cipher().encrypt(TEST_PASSWORD, b"secret").await.unwrap();
        let result = cipher().decrypt("wrong-password", &blob).await;
        assert!(matches!(result, Err(CipherError::Decryption)));
    }

    #[tokio::test]
    async fn test_fresh_salt_and_nonce() {
        let a = cipher().encrypt(TEST_PASSWORD, b"same").await.unwrap();
        let b = cipher().encrypt(TEST_PASSWORD, b"same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_params_travel_with_blob() {
        let blob = cipher().encrypt(TEST_PASSWORD, b"data").await.unwrap();

        // A cipher configured with different costs still opens it
        let other = PasswordCipher::new(CipherParams {
            memory_kb: 128,
            iterations: 2,
            parallelism: 1,
        });
        let plain = other.decrypt(TEST_PASSWORD, &blob).await.unwrap();
        assert_eq!(plain.as_slice(), b"data");
    }

    #[tokio::test]
    async fn test_tampered_ciphertext() {
        let blob = cipher().encrypt(TEST_PASSWORD, b"data").await.unwrap();
        let mut sealed: serde_json::Value = serde_json::from_str(&blob).unwrap();
        let ct = sealed["ciphertext"].as_str().unwrap().to_string();
        let flipped = if ct.starts_with('0') { format!("1{}", &ct[1..]) } else { format!("0{}", &ct[1..]) };
        sealed["ciphertext"] = serde_json::Value::String(flipped);

        let result = cipher().decrypt(TEST_PASSWORD, &sealed.to_string()).await;
        assert!(matches!(result, Err(CipherError::Decryption)));
    }

    #[tokio::test]
    async fn test_garbage_is_format_error() {
        let result = cipher().decrypt(TEST_PASSWORD, "not json").await;
        assert!(matches!(result, Err(CipherError::Format(_))));
    }
}
