//! Crypto error types

use thiserror::Error;

/// Crypto errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Hex string could not be decoded
    #[error("invalid hex encoding")]
    InvalidHex(#[from] hex::FromHexError),

    /// Bytes do not form a valid Ed25519 public key
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Bytes do not form a valid Ed25519 signature
    #[error("invalid signature encoding")]
    InvalidSignature,

    /// Signature does not verify under the given public key
    #[error("signature verification failed")]
    VerificationFailed,

    /// Identity file I/O failed
    #[error("identity file error: {0}")]
    Io(#[from] std::io::Error),

    /// Identity file could not be parsed
    #[error("identity file parse error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
