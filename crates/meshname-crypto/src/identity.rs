//! Node identity management
//!
//! A node's identity is a single Ed25519 signing keypair, created once and
//! read-only thereafter. It is persisted as a JSON file with hex-encoded
//! keys, readable only by the owner. The private key never leaves this
//! module except through `sign`.

use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::node_id::NodeId;
use crate::{ED25519_PUBKEY_SIZE, SIGNATURE_SIZE};

/// On-disk identity format: `{private_key: hex, public_key: hex}`
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    private_key: String,
    public_key: String,
}

/// A node's Ed25519 identity
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct an identity from private key bytes.
    ///
    /// Accepts either a 32-byte seed or a 64-byte seed-plus-public
    /// encoding.
    pub fn from_private_key_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != 32 && bytes.len() != 64 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let identity = Self {
            signing_key: SigningKey::from_bytes(&seed),
        };
        seed.zeroize();
        Ok(identity)
    }

    /// Load an identity from disk
    pub fn load(path: &Path) -> CryptoResult<Self> {
        let data = std::fs::read(path)?;
        let file: IdentityFile = serde_json::from_slice(&data)?;

        let mut key_bytes = hex::decode(&file.private_key)?;
        let identity = Self::from_private_key_bytes(&key_bytes);
        key_bytes.zeroize();
        identity
    }

    /// Save the identity to disk, owner-readable only
    pub fn save(&self, path: &Path) -> CryptoResult<()> {
        let file = IdentityFile {
            private_key: hex::encode(self.signing_key.to_bytes()),
            public_key: self.public_key_hex(),
        };
        let data = serde_json::to_vec_pretty(&file)?;

        write_private(path, &data)?;
        Ok(())
    }

    /// Load the identity at `path`, generating and saving a fresh one on
    /// first run.
    pub fn load_or_create(path: &Path) -> CryptoResult<Self> {
        match Self::load(path) {
            Ok(identity) => {
                info!("identity loaded from {}", path.display());
                Ok(identity)
            }
            Err(CryptoError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate();
                identity.save(path)?;
                info!("fresh identity generated and saved to {}", path.display());
                Ok(identity)
            }
            Err(err) => Err(err),
        }
    }

    /// The node's DHT identifier
    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_key(&self.signing_key.verifying_key())
    }

    /// The Ed25519 verifying (public) key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Verify `signature_hex` over `message` under `public_key_hex`.
pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> CryptoResult<()> {
    let key_bytes = hex::decode(public_key_hex)?;
    let key_arr: [u8; ED25519_PUBKEY_SIZE] =
        key_bytes
            .try_into()
            .map_err(|b: Vec<u8>| CryptoError::InvalidKeyLength {
                expected: ED25519_PUBKEY_SIZE,
                actual: b.len(),
            })?;
    let key = VerifyingKey::from_bytes(&key_arr).map_err(|_| CryptoError::InvalidPublicKey)?;

    let sig_bytes = hex::decode(signature_hex)?;
    let sig_arr: [u8; SIGNATURE_SIZE] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_arr);

    key.verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let identity = Identity::generate();
        let message = b"hello mesh";
        let signature = identity.sign(message);

        assert!(verify_hex(
            &identity.public_key_hex(),
            message,
            &hex::encode(signature.to_bytes()),
        )
        .is_ok());

        assert!(verify_hex(
            &identity.public_key_hex(),
            b"other message",
            &hex::encode(signature.to_bytes()),
        )
        .is_err());
    }

    #[test]
    fn node_id_is_public_key() {
        let identity = Identity::generate();
        assert_eq!(
            identity.node_id().as_bytes(),
            &identity.verifying_key().to_bytes()
        );
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let identity = Identity::generate();
        identity.save(&path).unwrap();

        let loaded = Identity::load(&path).unwrap();
        assert_eq!(identity.node_id(), loaded.node_id());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn load_or_create_generates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let first = Identity::load_or_create(&path).unwrap();
        let second = Identity::load_or_create(&path).unwrap();
        assert_eq!(first.node_id(), second.node_id());
    }

    #[test]
    fn accepts_64_byte_private_key() {
        let identity = Identity::generate();
        let mut full = identity.signing_key.to_bytes().to_vec();
        full.extend_from_slice(&identity.verifying_key().to_bytes());

        let restored = Identity::from_private_key_bytes(&full).unwrap();
        assert_eq!(identity.node_id(), restored.node_id());
    }
}
