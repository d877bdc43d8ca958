//! Iterative Kademlia lookups
//!
//! Both lookups keep a candidate list sorted by XOR distance to the target
//! and query it in rounds of ALPHA concurrent requests until no uncontacted
//! candidate remains. Node lookups evict unresponsive contacts; value
//! lookups only log them, because transient timeouts are common on the
//! overlay and punishing them shrinks the table.

use std::collections::HashSet;

use meshname_crypto::NodeId;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::dht::Dht;
use crate::error::{DhtError, DhtResult};
use crate::record::{record_id, Record};
use crate::routing::Contact;
use crate::rpc::{send_find_node, send_find_value, FindValueReply};
use crate::wire::ContactInfo;
use crate::{ALPHA, K, READ_TIMEOUT};

/// Shared state of one iterative lookup
struct LookupState {
    target: NodeId,
    self_id: NodeId,
    contacted: HashSet<NodeId>,
    candidates: Vec<Contact>,
}

impl LookupState {
    fn new(self_id: NodeId, target: NodeId, seeds: Vec<Contact>) -> Self {
        let mut state = Self {
            target,
            self_id,
            contacted: HashSet::new(),
            candidates: Vec::new(),
        };
        state.add_candidates(seeds);
        state
    }

    /// Fold newly learned contacts in, keeping the list sorted by distance
    fn add_candidates(&mut self, contacts: impl IntoIterator<Item = Contact>) {
        for contact in contacts {
            if contact.id == self.self_id
                || self.contacted.contains(&contact.id)
                || self.candidates.iter().any(|c| c.id == contact.id)
            {
                continue;
            }
            self.candidates.push(contact);
        }
        let target = self.target;
        self.candidates.sort_by_key(|c| c.id.distance(&target));
    }

    /// The next up-to-ALPHA uncontacted candidates, closest first
    fn next_batch(&self) -> Vec<Contact> {
        self.candidates
            .iter()
            .filter(|c| !self.contacted.contains(&c.id))
            .take(ALPHA)
            .copied()
            .collect()
    }

    fn mark_contacted(&mut self, id: NodeId) {
        self.contacted.insert(id);
    }

    /// The closest `count` candidates seen over the whole lookup
    fn into_closest(mut self, count: usize) -> Vec<Contact> {
        self.candidates.truncate(count);
        self.candidates
    }
}

impl Dht {
    /// Iteratively find the up-to-K closest contacts to `target`.
    ///
    /// Returns empty when the routing table has nothing to seed from.
    pub async fn lookup_node(&self, target: NodeId) -> Vec<Contact> {
        let seeds = self.table.read().await.closest(&target, K);
        if seeds.is_empty() {
            return Vec::new();
        }

        let mut state = LookupState::new(self.self_id, target, seeds);

        loop {
            let batch = state.next_batch();
            if batch.is_empty() {
                break;
            }

            let mut requests = JoinSet::new();
            for contact in batch {
                state.mark_contacted(contact.id);
                let self_id = self.self_id;
                requests.spawn(async move {
                    let reply = send_find_node(&contact.endpoint(), self_id, target).await;
                    (contact, reply)
                });
            }

            while let Some(joined) = requests.join_next().await {
                let Ok((contact, reply)) = joined else {
                    continue;
                };
                match reply {
                    Ok(infos) => {
                        let found: Vec<Contact> =
                            infos.iter().filter_map(ContactInfo::to_contact).collect();
                        {
                            let mut table = self.table.write().await;
                            for c in &found {
                                table.add(*c);
                            }
                        }
                        state.add_candidates(found);
                    }
                    Err(err) => {
                        debug!(peer = %contact.id, %err, "find_node failed, evicting");
                        self.table.write().await.remove(&contact.id);
                    }
                }
            }
        }

        state.into_closest(K)
    }

    /// Iteratively look up a record by name.
    ///
    /// The local store answers without network I/O when it can. The first
    /// FOUND_VALUE ends the lookup immediately; outstanding requests of
    /// that round are aborted. A round exceeding the 10-second cap ends the
    /// whole lookup as a miss.
    pub async fn lookup_value(&self, name: &str, group_key: &str) -> DhtResult<Option<Record>> {
        if let Some(record) = self.local_record(name, group_key).await {
            return Ok(Some(record));
        }

        let target = record_id(name);
        let seeds = self.table.read().await.closest(&target, K);
        if seeds.is_empty() {
            return Err(DhtError::NoPeers);
        }

        let mut state = LookupState::new(self.self_id, target, seeds);

        loop {
            let batch = state.next_batch();
            if batch.is_empty() {
                break;
            }

            let mut requests = JoinSet::new();
            for contact in batch {
                state.mark_contacted(contact.id);
                let self_id = self.self_id;
                let name = name.to_string();
                let group_key = group_key.to_string();
                requests.spawn(async move {
                    let reply =
                        send_find_value(&contact.endpoint(), self_id, &name, &group_key).await;
                    (contact, reply)
                });
            }

            let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
            loop {
                let joined = match tokio::time::timeout_at(deadline, requests.join_next()).await {
                    // round timeout caps tail latency; the lookup is a miss
                    Err(_) => return Ok(None),
                    Ok(None) => break,
                    Ok(Some(joined)) => joined,
                };
                let Ok((contact, reply)) = joined else {
                    continue;
                };
                match reply {
                    Ok(FindValueReply::Found(record)) => {
                        if !plausible_record(&record, name) {
                            debug!(peer = %contact.id, "dropping invalid record from peer");
                            continue;
                        }
                        // dropping the JoinSet aborts the rest of the round
                        return Ok(Some(record));
                    }
                    Ok(FindValueReply::Closer(infos)) => {
                        state
                            .add_candidates(infos.iter().filter_map(ContactInfo::to_contact));
                    }
                    Ok(FindValueReply::NotFound) => {
                        trace!(peer = %contact.id, "no closer contacts");
                    }
                    // slow-node policy: transient errors do not evict here
                    Err(err) => {
                        debug!(peer = %contact.id, %err, "find_value failed");
                    }
                }
            }
        }

        Ok(None)
    }
}

/// Receive-side validation of a fetched record: right name, live, signed.
fn plausible_record(record: &Record, name: &str) -> bool {
    record.name == name && !record.is_expired() && record.verify().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshname_crypto::NODE_ID_SIZE;

    fn id(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; NODE_ID_SIZE])
    }

    fn contact(seed: u8) -> Contact {
        Contact {
            id: id(seed),
            address: "::1".parse().unwrap(),
            port: 9001,
        }
    }

    #[test]
    fn candidates_stay_sorted_and_deduped() {
        let target = id(0);
        let mut state = LookupState::new(id(0xee), target, vec![contact(9), contact(3)]);

        state.add_candidates(vec![contact(3), contact(1), contact(0xee)]);

        let ids: Vec<NodeId> = state.candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![id(1), id(3), id(9)]);
    }

    #[test]
    fn batch_skips_contacted_and_respects_alpha() {
        let target = id(0);
        let seeds = (1..=6).map(contact).collect();
        let mut state = LookupState::new(id(0xee), target, seeds);

        let first = state.next_batch();
        assert_eq!(first.len(), ALPHA);
        assert_eq!(first[0].id, id(1));

        for c in &first {
            state.mark_contacted(c.id);
        }

        let second = state.next_batch();
        assert_eq!(second.len(), 3);
        assert!(second.iter().all(|c| !first.iter().any(|f| f.id == c.id)));
    }

    #[test]
    fn contacted_candidates_are_not_readded() {
        let target = id(0);
        let mut state = LookupState::new(id(0xee), target, vec![contact(1)]);
        state.mark_contacted(id(1));
        state.candidates.clear();

        state.add_candidates(vec![contact(1)]);
        assert!(state.candidates.is_empty());
    }

    #[test]
    fn closest_truncates_to_k() {
        let target = id(0);
        let seeds = (1..=40).map(contact).collect();
        let state = LookupState::new(id(0xee), target, seeds);

        let closest = state.into_closest(K);
        assert_eq!(closest.len(), K);
        assert_eq!(closest[0].id, id(1));
    }
}
