//! Signed name records
//!
//! A record binds a human-chosen name to the owner's overlay address and is
//! signed by the owner's Ed25519 key. The signing payload is the SHA-256
//! digest of the canonical JSON encoding of every field except the
//! signature, in declaration order. Both sides of the wire must produce the
//! same bytes here or verification fails.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use meshname_crypto::{Identity, NodeId};

use crate::error::{DhtError, DhtResult};
use crate::RECORD_TTL;

/// Maximum length of a record name in bytes
pub const MAX_NAME_LEN: usize = 256;

/// Maximum number of service entries per record
pub const MAX_SERVICES: usize = 64;

/// Maximum length of one service entry in bytes
pub const MAX_SERVICE_LEN: usize = 256;

/// A name-to-address binding stored in the DHT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Registered name, the DHT key
    pub name: String,

    /// Overlay address of the owner
    pub address: String,

    /// Hex-encoded Ed25519 public key of the owner
    pub public_key: String,

    /// Advertised services, e.g. "ssh:22"
    pub services: Vec<String>,

    /// Empty for public records; otherwise an opaque group secret
    pub group_key: String,

    /// Absolute expiry, Unix seconds
    pub expires: i64,

    /// Hex-encoded Ed25519 signature over the signing payload
    pub signature: String,
}

/// The signed portion of a record. Field order is the canonical encoding
/// and must never change.
#[derive(Serialize)]
struct SigningView<'a> {
    name: &'a str,
    address: &'a str,
    public_key: &'a str,
    services: &'a [String],
    group_key: &'a str,
    expires: i64,
}

impl Record {
    /// True once the expiry time has passed
    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires
    }

    /// True when the record is visible without a group key
    pub fn is_public(&self) -> bool {
        self.group_key.is_empty()
    }

    /// SHA-256 digest of the canonical encoding of all fields except the
    /// signature.
    pub fn signing_payload(&self) -> [u8; 32] {
        let view = SigningView {
            name: &self.name,
            address: &self.address,
            public_key: &self.public_key,
            services: &self.services,
            group_key: &self.group_key,
            expires: self.expires,
        };
        // serialization of a plain struct with string/int fields cannot fail
        let encoded = serde_json::to_vec(&view).unwrap_or_default();
        Sha256::digest(&encoded).into()
    }

    /// Check the signature against the embedded public key
    pub fn verify(&self) -> DhtResult<()> {
        let payload = self.signing_payload();
        meshname_crypto::verify_hex(&self.public_key, &payload, &self.signature)
            .map_err(|_| DhtError::SignatureInvalid)
    }

    /// Enforce the per-field size caps
    pub fn check_limits(&self) -> DhtResult<()> {
        if self.name.is_empty() {
            return Err(DhtError::InvalidInput("name cannot be empty".into()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(DhtError::InvalidInput(format!(
                "name exceeds {MAX_NAME_LEN} bytes"
            )));
        }
        if self.services.len() > MAX_SERVICES {
            return Err(DhtError::InvalidInput(format!(
                "more than {MAX_SERVICES} services"
            )));
        }
        if self.services.iter().any(|s| s.len() > MAX_SERVICE_LEN) {
            return Err(DhtError::InvalidInput(format!(
                "service entry exceeds {MAX_SERVICE_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// Where a record lives in the ID space: SHA-256 of its name.
pub fn record_id(name: &str) -> NodeId {
    let digest: [u8; 32] = Sha256::digest(name.as_bytes()).into();
    NodeId::from_bytes(digest)
}

/// Parameters for creating a signed record
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub name: String,
    pub address: String,
    pub services: Vec<String>,
    pub group_key: String,
    /// Lifetime; `None` means the default record TTL
    pub ttl: Option<Duration>,
}

/// Create and sign a record owned by `identity`.
pub fn create_record(identity: &Identity, opts: RecordOptions) -> DhtResult<Record> {
    if opts.address.is_empty() {
        return Err(DhtError::InvalidInput("address cannot be empty".into()));
    }

    let ttl = opts.ttl.unwrap_or(RECORD_TTL);
    let mut record = Record {
        name: opts.name,
        address: opts.address,
        public_key: identity.public_key_hex(),
        services: opts.services,
        group_key: opts.group_key,
        expires: now_unix() + ttl.as_secs() as i64,
        signature: String::new(),
    };
    record.check_limits()?;

    let payload = record.signing_payload();
    record.signature = hex::encode(identity.sign(&payload).to_bytes());
    Ok(record)
}

/// Current time as Unix seconds
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(identity: &Identity) -> Record {
        create_record(
            identity,
            RecordOptions {
                name: "alice".into(),
                address: "200:1234::1".into(),
                services: vec!["ssh:22".into(), "http:80".into()],
                group_key: String::new(),
                ttl: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn created_record_verifies() {
        let identity = Identity::generate();
        let record = sample(&identity);
        assert!(record.verify().is_ok());
        assert!(!record.is_expired());
        assert!(record.is_public());
    }

    #[test]
    fn wire_round_trip_still_verifies() {
        let identity = Identity::generate();
        let record = sample(&identity);

        let encoded = serde_json::to_vec(&record).unwrap();
        let decoded: Record = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(record, decoded);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn any_mutated_field_fails_verification() {
        let identity = Identity::generate();
        let record = sample(&identity);

        let mut m = record.clone();
        m.name = "mallory".into();
        assert!(m.verify().is_err());

        let mut m = record.clone();
        m.address = "300::2".into();
        assert!(m.verify().is_err());

        let mut m = record.clone();
        m.services.reverse();
        assert!(m.verify().is_err());

        let mut m = record.clone();
        m.group_key = "g1".into();
        assert!(m.verify().is_err());

        let mut m = record.clone();
        m.expires += 1;
        assert!(m.verify().is_err());

        let mut m = record.clone();
        let flipped = if m.signature.starts_with('a') { "b" } else { "a" };
        m.signature.replace_range(0..1, flipped);
        assert!(m.verify().is_err());
    }

    #[test]
    fn record_id_is_stable() {
        assert_eq!(record_id("alice"), record_id("alice"));
        assert_ne!(record_id("alice"), record_id("bob"));
    }

    #[test]
    fn rejects_oversized_fields() {
        let identity = Identity::generate();

        let err = create_record(
            &identity,
            RecordOptions {
                name: "x".repeat(MAX_NAME_LEN + 1),
                address: "200::1".into(),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(DhtError::InvalidInput(_))));

        let err = create_record(
            &identity,
            RecordOptions {
                name: "alice".into(),
                address: "200::1".into(),
                services: vec!["s".repeat(MAX_SERVICE_LEN + 1)],
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(DhtError::InvalidInput(_))));

        let err = create_record(
            &identity,
            RecordOptions {
                name: String::new(),
                address: "200::1".into(),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(DhtError::InvalidInput(_))));
    }
}
