//! The DHT node: listener, dispatch and request handlers

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use meshname_crypto::NodeId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::DhtResult;
use crate::record::record_id;
use crate::routing::RoutingTable;
use crate::store::{Store, Sweeper};
use crate::wire::{
    read_message, write_message, ContactInfo, EmptyBody, FindNodeBody, FindValueBody,
    FoundNodesBody, FoundValueBody, Message, MessageType, PingBody, PongBody, StoreBody,
};
use crate::{DEFAULT_PORT, K};

/// Construction parameters for a DHT node
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Our node ID (first 32 bytes of the identity public key)
    pub self_id: NodeId,
    /// The overlay address we advertise to other nodes
    pub address: String,
    /// Interface the listener binds to; the advertised address may differ
    pub bind_address: IpAddr,
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    /// Where saved peers are persisted between runs
    pub peers_path: PathBuf,
}

impl DhtConfig {
    pub fn new(self_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            self_id,
            address: address.into(),
            bind_address: IpAddr::from([0u16; 8]),
            port: DEFAULT_PORT,
            peers_path: PathBuf::from("peers.json"),
        }
    }
}

/// A running DHT node.
///
/// Incoming connections are dispatched to the ping/find-node/store/
/// find-value handlers; outgoing operations live in the lookup, announce
/// and peers modules. All methods take `&self`, so the node is typically
/// held in an `Arc` and shared with the control surface.
pub struct Dht {
    pub(crate) self_id: NodeId,
    pub(crate) address: String,
    bind_address: IpAddr,
    requested_port: u16,
    advertised_port: AtomicU16,
    pub(crate) table: Arc<RwLock<RoutingTable>>,
    pub(crate) store: Arc<RwLock<Store>>,
    pub(crate) peers_path: PathBuf,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Everything a connection handler needs, cloned into the accept loop
#[derive(Clone)]
struct HandlerCtx {
    self_id: NodeId,
    address: String,
    port: u16,
    table: Arc<RwLock<RoutingTable>>,
    store: Arc<RwLock<Store>>,
}

impl Dht {
    /// Create a node; `start` must be called before it serves requests
    pub fn new(config: DhtConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            self_id: config.self_id,
            address: config.address,
            bind_address: config.bind_address,
            requested_port: config.port,
            advertised_port: AtomicU16::new(config.port),
            table: Arc::new(RwLock::new(RoutingTable::new(config.self_id))),
            store: Arc::new(RwLock::new(Store::new())),
            peers_path: config.peers_path,
            shutdown,
            accept_task: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Bind the listener and spawn the accept loop and record sweeper
    pub async fn start(&self) -> DhtResult<()> {
        let listener =
            TcpListener::bind((self.bind_address, self.requested_port)).await?;
        let port = listener.local_addr()?.port();
        self.advertised_port.store(port, Ordering::Relaxed);

        info!(%port, bind = %self.bind_address, "DHT listening");

        let ctx = HandlerCtx {
            self_id: self.self_id,
            address: self.address.clone(),
            port,
            table: self.table.clone(),
            store: self.store.clone(),
        };

        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!("accept loop stopping");
                        return;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                trace!(%peer, "incoming connection");
                                let ctx = ctx.clone();
                                tokio::spawn(async move {
                                    handle_connection(ctx, stream).await;
                                });
                            }
                            Err(err) => warn!(%err, "accept error"),
                        }
                    }
                }
            }
        });

        *self.accept_task.lock().unwrap() = Some(handle);
        *self.sweeper.lock().unwrap() = Some(Sweeper::spawn(self.store.clone()));
        Ok(())
    }

    /// Stop serving and join the background tasks; safe to call twice
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let accept = self.accept_task.lock().unwrap().take();
        if let Some(handle) = accept {
            let _ = handle.await;
        }

        let sweeper = self.sweeper.lock().unwrap().take();
        if let Some(mut sweeper) = sweeper {
            sweeper.stop().await;
        }
        info!("DHT stopped");
    }

    /// Our node ID
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// The overlay address we advertise
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The port other nodes should dial, known once `start` has bound
    pub fn port(&self) -> u16 {
        self.advertised_port.load(Ordering::Relaxed)
    }

    /// Number of contacts in the routing table
    pub async fn peer_count(&self) -> usize {
        self.table.read().await.size()
    }

    /// Number of live records stored locally
    pub async fn record_count(&self) -> usize {
        self.store.read().await.size()
    }

    /// Look up a record in the local store only
    pub async fn local_record(&self, name: &str, group_key: &str) -> Option<crate::Record> {
        let store = self.store.read().await;
        if group_key.is_empty() {
            store.get_public(name)
        } else {
            store.get_for_group(name, group_key)
        }
    }
}

async fn handle_connection(ctx: HandlerCtx, mut stream: TcpStream) {
    let msg = match read_message(&mut stream).await {
        Ok(msg) => msg,
        // malformed, oversize or slow peer: close without replying
        Err(err) => {
            trace!(%err, "dropping connection");
            return;
        }
    };

    match msg.msg_type {
        MessageType::Ping => handle_ping(&ctx, &mut stream, &msg).await,
        MessageType::FindNode => handle_find_node(&ctx, &mut stream, &msg).await,
        MessageType::Store => handle_store(&ctx, &msg).await,
        MessageType::FindValue => handle_find_value(&ctx, &mut stream, &msg).await,
        // response types arriving as requests: ignore silently
        _ => trace!(msg_type = msg.msg_type as u8, "ignoring stray message"),
    }
}

async fn handle_ping(ctx: &HandlerCtx, stream: &mut TcpStream, msg: &Message) {
    let Ok(ping) = msg.decode::<PingBody>() else {
        return;
    };

    // learn the sender; a bad id or address just skips the insert
    if let Some(contact) = (ContactInfo {
        id: ping.sender_id,
        addr: ping.sender_addr,
        port: ping.sender_port,
    })
    .to_contact()
    {
        ctx.table.write().await.add(contact);
    }

    // advertise our real listen port, not the default; a node on a
    // non-default port that lies here gets evicted by lookups later
    let pong = PongBody {
        sender_id: ctx.self_id.to_hex(),
        sender_addr: ctx.address.clone(),
        sender_port: ctx.port,
    };
    if let Err(err) = write_message(stream, MessageType::Pong, &pong).await {
        trace!(%err, "pong write failed");
    }
}

async fn handle_find_node(ctx: &HandlerCtx, stream: &mut TcpStream, msg: &Message) {
    let Ok(req) = msg.decode::<FindNodeBody>() else {
        return;
    };
    let Ok(target) = req.target_id.parse::<NodeId>() else {
        return;
    };

    let closest = ctx.table.read().await.closest(&target, K);
    let body = FoundNodesBody {
        nodes: closest.iter().map(ContactInfo::from_contact).collect(),
    };
    if let Err(err) = write_message(stream, MessageType::FoundNodes, &body).await {
        trace!(%err, "found_nodes write failed");
    }
}

async fn handle_store(ctx: &HandlerCtx, msg: &Message) {
    let Ok(req) = msg.decode::<StoreBody>() else {
        return;
    };

    // invalid records are dropped without an error on the wire
    match ctx.store.write().await.put(req.record) {
        Ok(()) => {}
        Err(err) => debug!(%err, "store rejected record"),
    }
}

async fn handle_find_value(ctx: &HandlerCtx, stream: &mut TcpStream, msg: &Message) {
    let Ok(req) = msg.decode::<FindValueBody>() else {
        return;
    };

    let record = {
        let store = ctx.store.read().await;
        if req.group_key.is_empty() {
            store.get_public(&req.name)
        } else {
            store.get_for_group(&req.name, &req.group_key)
        }
    };

    if let Some(record) = record {
        let body = FoundValueBody { record };
        if let Err(err) = write_message(stream, MessageType::FoundValue, &body).await {
            trace!(%err, "found_value write failed");
        }
        return;
    }

    let target = record_id(&req.name);
    let closest = ctx.table.read().await.closest(&target, K);
    if closest.is_empty() {
        let _ = write_message(stream, MessageType::NotFound, &EmptyBody {}).await;
        return;
    }

    let body = FoundNodesBody {
        nodes: closest.iter().map(ContactInfo::from_contact).collect(),
    };
    if let Err(err) = write_message(stream, MessageType::FoundNodes, &body).await {
        trace!(%err, "found_nodes write failed");
    }
}
