//! MeshName identity primitives
//!
//! Every node owns a permanent Ed25519 keypair. The first 32 bytes of the
//! public key double as the node's DHT identifier, so possession of the
//! private key proves ownership of the identifier.

pub mod error;
pub mod identity;
pub mod node_id;

pub use error::{CryptoError, CryptoResult};
pub use identity::{verify_hex, Identity};
pub use node_id::NodeId;

/// Node ID length in bytes
pub const NODE_ID_SIZE: usize = 32;

/// Node ID length in bits
pub const ID_BITS: usize = NODE_ID_SIZE * 8;

/// Ed25519 public key length
pub const ED25519_PUBKEY_SIZE: usize = 32;

/// Ed25519 signature length
pub const SIGNATURE_SIZE: usize = 64;
