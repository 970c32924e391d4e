//! Error types for post-quantum cryptography operations

use thiserror::Error;

/// Errors that can occur during PQ cryptographic operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PqError {
    /// Invalid public key length or format
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid secret key (seed) length or format
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Invalid signature length or format
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    VerificationFailed,

    /// The signer rejected the message (context too long)
    #[error("Signing failed")]
    SigningFailed,

    /// Unknown security level name
    #[error("Unknown security level: {0}")]
    UnknownSecurityLevel(String),
}
