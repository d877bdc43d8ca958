//! MeshName distributed hash table
//!
//! Implements the Kademlia-based name registry: a routing table of known
//! contacts, a store of signed name records, the framed request/response
//! protocol between nodes, and the iterative lookup/announce engine that
//! ties them together over the overlay mesh.

pub mod announce;
pub mod dht;
pub mod error;
pub mod lookup;
pub mod peers;
pub mod record;
pub mod routing;
pub mod rpc;
pub mod store;
pub mod wire;

pub use announce::Reannouncer;
pub use dht::{Dht, DhtConfig};
pub use error::{DhtError, DhtResult};
pub use peers::{PeerStatus, SavedPeer};
pub use record::{create_record, record_id, Record, RecordOptions};
pub use routing::{Contact, RoutingTable};
pub use store::Store;

use std::time::Duration;

/// Kademlia K parameter (bucket size and replication factor)
pub const K: usize = 20;

/// Alpha parameter (per-round query concurrency)
pub const ALPHA: usize = 3;

/// Number of buckets (one per bit of the ID space)
pub const NUM_BUCKETS: usize = meshname_crypto::ID_BITS;

/// Default DHT listen port
pub const DEFAULT_PORT: u16 = 9001;

/// Default lifetime of a stored record
pub const RECORD_TTL: Duration = Duration::from_secs(3600);

/// How often owned records are re-announced; must stay below RECORD_TTL
pub const REANNOUNCE_INTERVAL: Duration = Duration::from_secs(2700);

/// How often the store sweeps out expired records
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-message read deadline, also the per-lookup-round cap
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Records living at most this long are rendezvous-style (e.g. pairing
/// codes) and exempt from the one-name-per-key ownership rule.
pub const EPHEMERAL_TTL: Duration = Duration::from_secs(600);
