//! Pairing error types

use thiserror::Error;

/// Pairing errors
#[derive(Debug, Error)]
pub enum PairingError {
    /// The other party never responded within the pairing window
    #[error("pairing timed out")]
    Timeout,

    /// No record found under the given code
    #[error("pairing code {0:?} not found; check the code and try again")]
    CodeNotFound(String),

    /// The pairing payload claims a key other than the one that signed
    /// the enclosing record
    #[error("pairing payload key does not match the record signer")]
    KeyMismatch,

    /// Underlying DHT failure
    #[error(transparent)]
    Dht(#[from] meshname_dht::DhtError),

    /// Contact book I/O failed
    #[error("contact book error: {0}")]
    Io(#[from] std::io::Error),

    /// Contact book or payload could not be encoded/decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pairing operations
pub type PairingResult<T> = Result<T, PairingError>;
