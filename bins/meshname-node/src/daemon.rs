//! The long-running node process

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use meshname_crypto::Identity;
use meshname_dht::{create_record, Dht, DhtConfig, Reannouncer, RecordOptions};

use crate::api::{self, ApiState, API_PORT};
use crate::config::NodePaths;

/// Everything the `start` command collected from flags
pub struct StartOptions {
    pub name: Option<String>,
    pub address: String,
    pub port: u16,
    pub identity_path: Option<std::path::PathBuf>,
    pub peer: Option<String>,
    pub services: Vec<String>,
    pub group: String,
    pub paths: NodePaths,
}

/// Bring the node up, register our name, and run until Ctrl+C.
pub async fn run(opts: StartOptions) -> Result<()> {
    opts.paths.ensure().context("could not create data directory")?;

    let identity_path = opts
        .identity_path
        .clone()
        .unwrap_or_else(|| opts.paths.identity());
    let identity = Arc::new(Identity::load_or_create(&identity_path)?);
    let node_name = opts
        .name
        .clone()
        .unwrap_or_else(|| format!("node-{}", &identity.public_key_hex()[..8]));

    info!(name = %node_name, address = %opts.address, "starting node");

    let mut config = DhtConfig::new(identity.node_id(), opts.address.clone());
    config.port = opts.port;
    config.peers_path = opts.paths.peers();

    let dht = Arc::new(Dht::new(config));
    dht.start().await.context("failed to start DHT")?;

    // saved peers first, well-known nodes second, isolated mode last
    dht.bootstrap().await;
    if let Some(peer) = &opts.peer {
        if let Err(err) = dht.ping_peer(peer).await {
            warn!(%err, peer, "could not reach bootstrap peer");
        }
    }

    let mut api = api::spawn(
        Arc::new(ApiState {
            dht: dht.clone(),
            identity: identity.clone(),
            node_name: node_name.clone(),
            contacts_path: opts.paths.contacts(),
        }),
        API_PORT,
    )?;

    let record_options = RecordOptions {
        name: node_name.clone(),
        address: opts.address.clone(),
        services: opts.services.clone(),
        group_key: opts.group.clone(),
        ttl: None,
    };
    let record = create_record(&identity, record_options.clone())?;

    match dht.announce(&record).await {
        Ok(()) => info!(name = %node_name, "announced on the mesh"),
        Err(err) => warn!(%err, "initial announce failed"),
    }

    // keep the record re-signed and refreshed so it never expires while we run
    let mut reannouncer = Reannouncer::start(dht.clone(), identity.clone(), record_options);

    println!("MeshName running. Press Ctrl+C to stop.");
    println!("Other nodes can find you with: meshname lookup {node_name}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    reannouncer.stop().await;
    if let Err(err) = dht.save_peers().await {
        warn!(%err, "could not save peers");
    }
    api.stop().await;
    dht.stop().await;
    Ok(())
}
