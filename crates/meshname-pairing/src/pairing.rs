//! The pairing rendezvous protocol
//!
//! The initiator announces a signed record named after a fresh code and
//! polls for a response record named `code:response`. The joiner looks the
//! code up, announces its response, and both sides end up holding the
//! other's contact. Records carry the contact details as a JSON payload in
//! the services field, so the joiner can recover the initiator's display
//! name even though the DHT record's name is the code.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use meshname_crypto::Identity;
use meshname_dht::{create_record, Dht, DhtError, Record, RecordOptions};

use crate::code::generate_code;
use crate::contacts::Contact;
use crate::error::{PairingError, PairingResult};
use crate::{PAIRING_TIMEOUT, PAIRING_TTL, POLL_INTERVAL};

/// Marks the pairing payload inside a record's services list
const SERVICE_PREFIX: &str = "pairing:";

/// Contact details exchanged during pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingPayload {
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub code: String,
    pub is_response: bool,
}

/// DHT name of the response record for a code
pub fn response_name(code: &str) -> String {
    format!("{code}:response")
}

/// Begin pairing as the initiator: announce a record under a fresh code
/// and return the code for the user to read out.
pub async fn start_initiation(
    dht: &Dht,
    display_name: &str,
    address: &str,
    identity: &Identity,
) -> PairingResult<String> {
    let code = generate_code();
    let record = pairing_record(identity, display_name, address, &code, false)?;
    dht.announce(&record).await?;

    info!(%code, "pairing initiated");
    Ok(code)
}

/// One poll for the response record. `None` means still pending.
pub async fn poll_response(dht: &Dht, code: &str) -> PairingResult<Option<Contact>> {
    match dht.lookup_value(&response_name(code), "").await {
        Ok(Some(record)) => {
            let contact = parse_pairing_record(&record)?;
            Ok(Some(contact))
        }
        Ok(None) => Ok(None),
        // isolated nodes still receive the response into their own store
        Err(DhtError::NoPeers) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Poll every two seconds until the joiner responds or the pairing window
/// closes.
pub async fn wait_for_response(dht: &Dht, code: &str) -> PairingResult<Contact> {
    let deadline = tokio::time::Instant::now() + PAIRING_TIMEOUT;

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        if let Some(contact) = poll_response(dht, code).await? {
            info!(name = %contact.name, "paired");
            return Ok(contact);
        }
        if tokio::time::Instant::now() >= deadline {
            debug!(%code, "pairing window closed");
            return Err(PairingError::Timeout);
        }
    }
}

/// Complete pairing as the joiner: look up the initiator's record under
/// `code`, announce our response, and return the initiator's contact.
pub async fn join(
    dht: &Dht,
    display_name: &str,
    address: &str,
    identity: &Identity,
    code: &str,
) -> PairingResult<Contact> {
    let initiator_record = dht
        .lookup_value(code, "")
        .await?
        .ok_or_else(|| PairingError::CodeNotFound(code.to_string()))?;
    let initiator = parse_pairing_record(&initiator_record)?;

    let response = pairing_record(identity, display_name, address, &response_name(code), true)?;
    dht.announce(&response).await?;

    info!(name = %initiator.name, "paired");
    Ok(initiator)
}

/// Build the signed DHT record carrying our pairing payload
fn pairing_record(
    identity: &Identity,
    display_name: &str,
    address: &str,
    record_name: &str,
    is_response: bool,
) -> PairingResult<Record> {
    let payload = PairingPayload {
        name: display_name.to_string(),
        address: address.to_string(),
        public_key: identity.public_key_hex(),
        code: record_name.to_string(),
        is_response,
    };
    let service = format!("{SERVICE_PREFIX}{}", serde_json::to_string(&payload)?);

    Ok(create_record(
        identity,
        RecordOptions {
            name: record_name.to_string(),
            address: address.to_string(),
            services: vec![service],
            group_key: String::new(),
            ttl: Some(PAIRING_TTL),
        },
    )?)
}

/// Extract the peer's contact from a pairing record.
///
/// The payload's public key must be the key that signed the record itself;
/// anything else is someone speaking for a key they do not hold. A record
/// without a parsable payload falls back to its own top-level fields,
/// which are covered by the signature directly.
pub fn parse_pairing_record(record: &Record) -> PairingResult<Contact> {
    let payload = record
        .services
        .first()
        .and_then(|s| s.strip_prefix(SERVICE_PREFIX))
        .and_then(|json| serde_json::from_str::<PairingPayload>(json).ok());

    match payload {
        Some(payload) => {
            if payload.public_key != record.public_key {
                return Err(PairingError::KeyMismatch);
            }
            Ok(Contact {
                name: payload.name,
                address: payload.address,
                public_key: payload.public_key,
                paired_at: Utc::now(),
            })
        }
        None => Ok(Contact {
            name: record.name.clone(),
            address: record.address.clone(),
            public_key: record.public_key.clone(),
            paired_at: Utc::now(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_through_a_record() {
        let identity = Identity::generate();
        let record =
            pairing_record(&identity, "alice", "200:1234::1", "MESH-AB12", false).unwrap();

        assert_eq!(record.name, "MESH-AB12");
        assert!(record.verify().is_ok());

        let contact = parse_pairing_record(&record).unwrap();
        assert_eq!(contact.name, "alice");
        assert_eq!(contact.address, "200:1234::1");
        assert_eq!(contact.public_key, identity.public_key_hex());
    }

    #[test]
    fn mismatched_payload_key_is_rejected() {
        let identity = Identity::generate();
        let other = Identity::generate();

        let payload = PairingPayload {
            name: "mallory".into(),
            address: "200:1234::9".into(),
            public_key: other.public_key_hex(),
            code: "MESH-AB12".into(),
            is_response: false,
        };
        let service = format!("{SERVICE_PREFIX}{}", serde_json::to_string(&payload).unwrap());

        let record = create_record(
            &identity,
            RecordOptions {
                name: "MESH-AB12".into(),
                address: "200:1234::9".into(),
                services: vec![service],
                ttl: Some(PAIRING_TTL),
                ..Default::default()
            },
        )
        .unwrap();

        let err = parse_pairing_record(&record);
        assert!(matches!(err, Err(PairingError::KeyMismatch)));
    }

    #[test]
    fn record_without_payload_falls_back_to_its_own_fields() {
        let identity = Identity::generate();
        let record = create_record(
            &identity,
            RecordOptions {
                name: "MESH-AB12".into(),
                address: "200:1234::1".into(),
                ttl: Some(PAIRING_TTL),
                ..Default::default()
            },
        )
        .unwrap();

        let contact = parse_pairing_record(&record).unwrap();
        assert_eq!(contact.name, "MESH-AB12");
        assert_eq!(contact.public_key, identity.public_key_hex());
    }

    #[test]
    fn response_name_shape() {
        assert_eq!(response_name("MESH-AB12"), "MESH-AB12:response");
    }
}
