//! Peer persistence and bootstrap
//!
//! Known contacts are saved to disk on shutdown so the next start does not
//! begin blind. Bootstrap pings saved peers first, then the compiled-in
//! well-known nodes; if none respond the node runs in isolated mode until
//! a peer is added manually.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dht::Dht;
use crate::error::{DhtError, DhtResult};
use crate::routing::Contact;
use crate::rpc::send_ping;

/// Well-known long-running nodes used when a node starts fresh with no
/// saved peers. Community-run entry points; an offline entry is simply
/// skipped during bootstrap.
pub const WELL_KNOWN_PEERS: &[&str] = &[
    // placeholder until the network has always-on participants,
    // e.g. "[200:1234:5678::1]:9001"
];

/// Serializable form of a routing-table contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedPeer {
    pub id: String,
    pub addr: String,
    pub port: u16,
}

/// Liveness report for one known peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub id: String,
    pub addr: String,
    pub port: u16,
    pub latency_ms: u64,
    pub alive: bool,
}

impl Dht {
    /// Ping `endpoint` and, on success, add the node to the routing table.
    ///
    /// The contact is recorded under the dialed address and port, since
    /// that is what was proven reachable, not whatever the pong
    /// self-reports.
    pub async fn ping_peer(&self, endpoint: &str) -> DhtResult<()> {
        let dialed: SocketAddr = endpoint
            .parse()
            .map_err(|_| DhtError::InvalidInput(format!("invalid peer address {endpoint:?}")))?;

        let pong = send_ping(endpoint, self.self_id, &self.address, self.port()).await?;

        let id = pong
            .sender_id
            .parse()
            .map_err(|_| DhtError::InvalidInput("peer returned invalid node id".into()))?;

        self.table.write().await.add(Contact {
            id,
            address: dialed.ip(),
            port: dialed.port(),
        });
        Ok(())
    }

    /// Write every known contact to the peers file
    pub async fn save_peers(&self) -> DhtResult<()> {
        let contacts = self.table.read().await.all();
        if contacts.is_empty() {
            return Ok(());
        }

        let peers: Vec<SavedPeer> = contacts
            .iter()
            .map(|c| SavedPeer {
                id: c.id.to_hex(),
                addr: c.address.to_string(),
                port: c.port,
            })
            .collect();

        let data = serde_json::to_vec_pretty(&peers)?;
        std::fs::write(&self.peers_path, data)?;

        info!(count = peers.len(), "saved peers to disk");
        Ok(())
    }

    /// Ping every saved peer in parallel; responders join the table
    pub async fn load_peers(self: &Arc<Self>) {
        let data = match std::fs::read(&self.peers_path) {
            Ok(data) => data,
            // no peers file yet: first run or it was cleared
            Err(_) => return,
        };

        let peers: Vec<SavedPeer> = match serde_json::from_slice(&data) {
            Ok(peers) => peers,
            Err(err) => {
                warn!(%err, "could not parse peers file");
                return;
            }
        };
        if peers.is_empty() {
            return;
        }

        info!(count = peers.len(), "loading saved peers");

        let mut pings = JoinSet::new();
        for peer in &peers {
            // a stale or hand-edited entry skips that peer, not the file
            let Ok(ip) = peer.addr.parse::<std::net::IpAddr>() else {
                warn!(addr = %peer.addr, "skipping unparsable saved peer");
                continue;
            };
            let endpoint = SocketAddr::new(ip, peer.port).to_string();
            let dht = self.clone();
            pings.spawn(async move { dht.ping_peer(&endpoint).await.is_ok() });
        }

        let mut alive = 0usize;
        while let Some(joined) = pings.join_next().await {
            if matches!(joined, Ok(true)) {
                alive += 1;
            }
        }
        info!(alive, total = peers.len(), "restored peers from disk");
    }

    /// Populate the routing table from saved peers, then well-known nodes.
    /// Returns the resulting table size.
    pub async fn bootstrap(self: &Arc<Self>) -> usize {
        self.load_peers().await;
        if self.peer_count().await > 0 {
            return self.peer_count().await;
        }

        if !WELL_KNOWN_PEERS.is_empty() {
            info!("no saved peers, trying well-known nodes");
            let mut pings = JoinSet::new();
            for endpoint in WELL_KNOWN_PEERS {
                let dht = self.clone();
                pings.spawn(async move { dht.ping_peer(endpoint).await.is_ok() });
            }
            while let Some(joined) = pings.join_next().await {
                if matches!(joined, Ok(true)) {
                    debug!("well-known peer alive");
                }
            }
        }

        let size = self.peer_count().await;
        if size == 0 {
            info!("no peers reachable, starting in isolated mode");
        }
        size
    }

    /// Ping every known peer and report liveness and latency
    pub async fn ping_all_peers(&self) -> Vec<PeerStatus> {
        let contacts = self.table.read().await.all();

        let mut pings = JoinSet::new();
        for contact in contacts {
            let self_id = self.self_id;
            let address = self.address.clone();
            let port = self.port();
            pings.spawn(async move {
                let started = Instant::now();
                let alive = send_ping(&contact.endpoint(), self_id, &address, port)
                    .await
                    .is_ok();
                PeerStatus {
                    id: contact.id.to_hex(),
                    addr: contact.address.to_string(),
                    port: contact.port,
                    latency_ms: started.elapsed().as_millis() as u64,
                    alive,
                }
            });
        }

        let mut statuses = Vec::new();
        while let Some(joined) = pings.join_next().await {
            if let Ok(status) = joined {
                statuses.push(status);
            }
        }
        statuses
    }
}
