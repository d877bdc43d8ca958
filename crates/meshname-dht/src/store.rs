//! Signed record storage
//!
//! Every node stores the records it is responsible for in memory, keyed by
//! name. A record is only accepted when its signature verifies, it has not
//! expired, and the name is not already claimed by a different key. A
//! background sweeper removes expired records once a minute.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{DhtError, DhtResult};
use crate::record::{now_unix, Record};
use crate::{EPHEMERAL_TTL, SWEEP_INTERVAL};

/// True for records whose remaining lifetime fits the rendezvous window
fn is_ephemeral(record: &Record) -> bool {
    record.expires - now_unix() <= EPHEMERAL_TTL.as_secs() as i64
}

/// In-memory store of signed records, keyed by name
#[derive(Default)]
pub struct Store {
    records: HashMap<String, Record>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record after checking every invariant.
    ///
    /// The write wins only if the signature verifies, the expiry is in the
    /// future, the name is unclaimed or owned by the same key, and the key
    /// does not already own a different live name.
    pub fn put(&mut self, record: Record) -> DhtResult<()> {
        record.check_limits()?;
        if record.is_expired() {
            return Err(DhtError::Expired);
        }
        record.verify()?;

        if let Some(existing) = self.records.get(&record.name) {
            if existing.public_key != record.public_key && !existing.is_expired() {
                return Err(DhtError::NameOwnedByDifferentKey(record.name));
            }
        }

        // one name per key: the same key may refresh its record but not
        // claim a second live name. Rendezvous-lifetime records (pairing
        // codes and their responses) are exempt on both sides, or a paired
        // device could never register both its name and a code.
        if !is_ephemeral(&record) {
            if let Some(owned) = self.records.values().find(|r| {
                r.public_key == record.public_key
                    && r.name != record.name
                    && !r.is_expired()
                    && !is_ephemeral(r)
            }) {
                return Err(DhtError::KeyAlreadyOwnsDifferentName(owned.name.clone()));
            }
        }

        self.records.insert(record.name.clone(), record);
        Ok(())
    }

    /// Look up a record by name; expired records are misses
    pub fn get(&self, name: &str) -> Option<Record> {
        self.records
            .get(name)
            .filter(|r| !r.is_expired())
            .cloned()
    }

    /// Look up a record only if it is public
    pub fn get_public(&self, name: &str) -> Option<Record> {
        self.get(name).filter(|r| r.is_public())
    }

    /// Look up a record only if its group key matches exactly
    pub fn get_for_group(&self, name: &str, group_key: &str) -> Option<Record> {
        self.get(name).filter(|r| r.group_key == group_key)
    }

    /// Remove a record unconditionally
    pub fn delete(&mut self, name: &str) {
        self.records.remove(name);
    }

    /// Snapshot of all non-expired records
    pub fn all(&self) -> Vec<Record> {
        self.records
            .values()
            .filter(|r| !r.is_expired())
            .cloned()
            .collect()
    }

    /// Number of non-expired records
    pub fn size(&self) -> usize {
        self.records.values().filter(|r| !r.is_expired()).count()
    }

    /// Drop every expired record, returning how many were removed
    pub fn sweep(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired());
        let removed = before - self.records.len();
        if removed > 0 {
            debug!(removed, "swept expired records");
        }
        removed
    }
}

/// Background task that sweeps a shared store once per minute
pub(crate) struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop over `store`
    pub(crate) fn spawn(store: Arc<RwLock<Store>>) -> Self {
        let (shutdown, mut rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.write().await.sweep();
                    }
                    _ = rx.changed() => return,
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for it to exit; safe to call twice
    pub(crate) async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{create_record, now_unix, RecordOptions};
    use meshname_crypto::Identity;

    fn make_record(identity: &Identity, name: &str, group_key: &str) -> Record {
        create_record(
            identity,
            RecordOptions {
                name: name.into(),
                address: "200:1234::1".into(),
                services: vec![],
                group_key: group_key.into(),
                ttl: None,
            },
        )
        .unwrap()
    }

    /// A correctly signed record whose expiry is already in the past.
    fn expired_record(identity: &Identity, name: &str) -> Record {
        let mut record = Record {
            name: name.into(),
            address: "200:1234::1".into(),
            public_key: identity.public_key_hex(),
            services: vec![],
            group_key: String::new(),
            expires: now_unix() - 10,
            signature: String::new(),
        };
        let payload = record.signing_payload();
        record.signature = hex::encode(identity.sign(&payload).to_bytes());
        record
    }

    #[test]
    fn put_and_get() {
        let identity = Identity::generate();
        let mut store = Store::new();

        store.put(make_record(&identity, "alice", "")).unwrap();
        assert_eq!(store.size(), 1);
        assert_eq!(store.get("alice").unwrap().name, "alice");
        assert!(store.get("bob").is_none());
    }

    #[test]
    fn rejects_expired() {
        let identity = Identity::generate();
        let mut store = Store::new();

        let err = store.put(expired_record(&identity, "alice"));
        assert!(matches!(err, Err(DhtError::Expired)));
    }

    #[test]
    fn rejects_bad_signature() {
        let identity = Identity::generate();
        let mut store = Store::new();

        let mut record = make_record(&identity, "alice", "");
        record.address = "300::9".into();
        let err = store.put(record);
        assert!(matches!(err, Err(DhtError::SignatureInvalid)));
    }

    #[test]
    fn name_is_owned_by_first_key() {
        let k1 = Identity::generate();
        let k2 = Identity::generate();
        let mut store = Store::new();

        store.put(make_record(&k1, "alice", "")).unwrap();

        let err = store.put(make_record(&k2, "alice", ""));
        assert!(matches!(err, Err(DhtError::NameOwnedByDifferentKey(_))));

        // the owner may refresh
        store.put(make_record(&k1, "alice", "")).unwrap();
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn one_name_per_key() {
        let identity = Identity::generate();
        let mut store = Store::new();

        store.put(make_record(&identity, "alice", "")).unwrap();
        let err = store.put(make_record(&identity, "alice2", ""));
        assert!(matches!(
            err,
            Err(DhtError::KeyAlreadyOwnsDifferentName(_))
        ));
    }

    #[test]
    fn rendezvous_records_do_not_count_as_owned_names() {
        let identity = Identity::generate();
        let mut store = Store::new();

        store.put(make_record(&identity, "alice", "")).unwrap();

        // same key, pairing-length TTL: allowed alongside the name record
        let code = create_record(
            &identity,
            RecordOptions {
                name: "MESH-AB12".into(),
                address: "200:1234::1".into(),
                ttl: Some(std::time::Duration::from_secs(600)),
                ..Default::default()
            },
        )
        .unwrap();
        store.put(code).unwrap();
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn expired_claim_can_be_reclaimed() {
        let k1 = Identity::generate();
        let k2 = Identity::generate();
        let mut store = Store::new();

        // simulate an old claim whose TTL ran out
        let stale = expired_record(&k1, "alice");
        store.records.insert(stale.name.clone(), stale);

        store.put(make_record(&k2, "alice", "")).unwrap();
        assert_eq!(store.get("alice").unwrap().public_key, k2.public_key_hex());
    }

    #[test]
    fn group_visibility() {
        let identity = Identity::generate();
        let mut store = Store::new();

        store.put(make_record(&identity, "alice", "g1")).unwrap();

        assert!(store.get_public("alice").is_none());
        assert!(store.get_for_group("alice", "g1").is_some());
        assert!(store.get_for_group("alice", "g2").is_none());
        assert!(store.get_for_group("alice", "").is_none());
    }

    #[test]
    fn expired_records_are_misses_and_swept() {
        let identity = Identity::generate();
        let mut store = Store::new();

        let stale = expired_record(&identity, "alice");
        store.records.insert(stale.name.clone(), stale);

        assert!(store.get("alice").is_none());
        assert_eq!(store.size(), 0);
        assert!(store.all().is_empty());

        assert_eq!(store.sweep(), 1);
        assert!(store.records.is_empty());
    }

    #[tokio::test]
    async fn sweeper_stops_cleanly() {
        let store = Arc::new(RwLock::new(Store::new()));
        let mut sweeper = Sweeper::spawn(store);
        sweeper.stop().await;
        sweeper.stop().await;
    }
}
