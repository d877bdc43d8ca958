//! Kademlia routing table

use std::net::{IpAddr, SocketAddr};

use meshname_crypto::NodeId;
use tracing::trace;

use crate::{K, NUM_BUCKETS};

/// A known node on the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub id: NodeId,
    pub address: IpAddr,
    pub port: u16,
}

impl Contact {
    /// Dialable endpoint string; IPv6 addresses come out bracketed
    pub fn endpoint(&self) -> String {
        SocketAddr::new(self.address, self.port).to_string()
    }
}

/// 256 K-buckets of contacts, indexed by the XOR-distance prefix from self.
///
/// Buckets keep the most recently seen contact at the tail. A full bucket
/// drops newcomers rather than evicting, so long-lived contacts win.
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<Vec<Contact>>,
}

impl RoutingTable {
    /// Create an empty table for the given local ID
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            buckets: vec![Vec::new(); NUM_BUCKETS],
        }
    }

    /// Our own node ID
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Insert or refresh a contact.
    ///
    /// A contact already present moves to the tail of its bucket. A full
    /// bucket drops the newcomer. Self is never inserted.
    pub fn add(&mut self, contact: Contact) {
        let Some(index) = self.self_id.bucket_index(&contact.id) else {
            return;
        };

        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket.iter().position(|c| c.id == contact.id) {
            bucket.remove(pos);
            bucket.push(contact);
            return;
        }

        if bucket.len() < K {
            trace!(id = %contact.id, index, "contact added");
            bucket.push(contact);
        }
    }

    /// Evict a contact if present
    pub fn remove(&mut self, id: &NodeId) {
        let Some(index) = self.self_id.bucket_index(id) else {
            return;
        };
        self.buckets[index].retain(|c| c.id != *id);
    }

    /// Up to `count` contacts sorted ascending by XOR distance to `target`
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.buckets.iter().flatten().copied().collect();
        all.sort_by_key(|c| c.id.distance(target));
        all.truncate(count);
        all
    }

    /// Total contact count
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Snapshot of every contact, for persistence
    pub fn all(&self) -> Vec<Contact> {
        self.buckets.iter().flatten().copied().collect()
    }
}
