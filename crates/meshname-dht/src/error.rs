//! DHT error types

use thiserror::Error;

/// DHT errors
#[derive(Debug, Error)]
pub enum DhtError {
    /// Caller-supplied field is missing or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Record signature mismatch or undecodable key/signature hex
    #[error("record signature invalid")]
    SignatureInvalid,

    /// Record expiry is not in the future
    #[error("record is expired")]
    Expired,

    /// Name is already registered under a different key
    #[error("name {0:?} is owned by a different key")]
    NameOwnedByDifferentKey(String),

    /// The signing key already owns a different, non-expired name
    #[error("key already owns the name {0:?}")]
    KeyAlreadyOwnsDifferentName(String),

    /// Dial, read or write failure on the overlay transport
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Peer violated the framing or message contract
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Response of an unexpected type for the request sent
    #[error("unexpected message type {0}")]
    UnexpectedMessage(u8),

    /// Per-message or per-round deadline exceeded
    #[error("request timed out")]
    Timeout,

    /// The routing table has no contacts to query
    #[error("no known nodes to query")]
    NoPeers,

    /// Message body could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying crypto failure
    #[error("crypto error: {0}")]
    Crypto(#[from] meshname_crypto::CryptoError),
}

/// Result type for DHT operations
pub type DhtResult<T> = Result<T, DhtError>;
