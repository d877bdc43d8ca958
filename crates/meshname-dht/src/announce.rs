//! Record announcement and periodic refresh

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use meshname_crypto::Identity;

use crate::dht::Dht;
use crate::error::DhtResult;
use crate::record::{create_record, record_id, Record, RecordOptions};
use crate::rpc::send_store;
use crate::REANNOUNCE_INTERVAL;

impl Dht {
    /// Push a record to the K nodes closest to its name.
    ///
    /// Remote stores are fire-and-forget; failures only lower the success
    /// count in the log line. The record always lands in the local store as
    /// well, so this node stays authoritative for its own name even while
    /// isolated.
    pub async fn announce(&self, record: &Record) -> DhtResult<()> {
        record.verify()?;

        let target = record_id(&record.name);
        let closest = self.lookup_node(target).await;

        if !closest.is_empty() {
            let mut requests = JoinSet::new();
            for contact in closest {
                let record = record.clone();
                requests.spawn(async move { send_store(&contact.endpoint(), &record).await });
            }

            let mut stored = 0usize;
            let mut total = 0usize;
            while let Some(joined) = requests.join_next().await {
                total += 1;
                if matches!(joined, Ok(Ok(()))) {
                    stored += 1;
                }
            }
            info!(name = %record.name, stored, total, "announced record");
        }

        self.store.write().await.put(record.clone())
    }
}

/// Background task that keeps one owned record alive on the mesh.
///
/// Each tick signs a fresh copy of the record and announces it; a record
/// announced only once would age out at the TTL, since stores refuse
/// anything whose expiry has passed. The refresh interval (45 min) stays
/// below the record TTL (60 min), so a live owner never lets its record
/// expire.
pub struct Reannouncer {
    options: Arc<RwLock<RecordOptions>>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Reannouncer {
    /// Spawn the refresh loop; `options` describes the record and
    /// `identity` signs every refreshed copy
    pub fn start(dht: Arc<Dht>, identity: Arc<Identity>, options: RecordOptions) -> Self {
        let options = Arc::new(RwLock::new(options));
        let (shutdown, mut rx) = watch::channel(false);

        let task_options = options.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REANNOUNCE_INTERVAL);
            ticker.tick().await; // the caller already announced once
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let current = task_options.read().await.clone();
                        info!(name = %current.name, "re-announcing record");
                        match create_record(&identity, current) {
                            Ok(record) => {
                                if let Err(err) = dht.announce(&record).await {
                                    warn!(%err, "re-announce failed");
                                }
                            }
                            Err(err) => warn!(%err, "could not refresh record"),
                        }
                    }
                    _ = rx.changed() => return,
                }
            }
        });

        Self {
            options,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Replace the announced fields, e.g. after a service change; the next
    /// tick signs and publishes the new version
    pub async fn update_options(&self, options: RecordOptions) {
        *self.options.write().await = options;
    }

    /// Signal the loop and wait for it to exit; safe to call twice
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
