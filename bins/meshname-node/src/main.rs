//! MeshName: a decentralized name registry over an encrypted overlay mesh
//!
//! Runs a DHT node that registers a human-chosen name against this node's
//! overlay address, looks up other nodes' names, and pairs devices with a
//! short code.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod api;
mod client;
mod config;
mod daemon;

use config::NodePaths;
use meshname_pairing::{ContactBook, PAIRING_TIMEOUT, POLL_INTERVAL};

/// MeshName, a decentralized peer-to-peer name registry
#[derive(Parser)]
#[command(name = "meshname")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding identity, peers and contacts files
    #[arg(long, default_value = ".", global = true)]
    data_dir: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MeshName node
    Start {
        /// Name to register on the mesh (default: node-<pubkey>)
        #[arg(short, long)]
        name: Option<String>,

        /// Overlay address to advertise, as assigned by the mesh interface
        #[arg(short, long, default_value = "::1")]
        address: String,

        /// DHT listen port
        #[arg(short, long, default_value_t = meshname_dht::DEFAULT_PORT)]
        port: u16,

        /// Identity file path (default: <data-dir>/identity.json)
        #[arg(short, long)]
        identity: Option<PathBuf>,

        /// Bootstrap peer endpoint, e.g. [::1]:9002
        #[arg(long)]
        peer: Option<String>,

        /// Services to advertise, e.g. ssh:22,http:80
        #[arg(short, long, value_delimiter = ',')]
        services: Vec<String>,

        /// Group key for a private record (empty = public)
        #[arg(short, long, default_value = "")]
        group: String,
    },

    /// Look up a name on the mesh
    Lookup {
        /// Name to resolve
        name: String,

        /// Group key for private record lookup
        #[arg(short, long, default_value = "")]
        group: String,
    },

    /// Show this node's status
    Status,

    /// List known DHT peers
    Peers,

    /// Manage peers
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },

    /// Pair with another device: no code generates one, a code joins
    Pair {
        /// Code from the other device, e.g. MESH-4729
        code: Option<String>,

        /// Name to present to the other device
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List paired devices
    Contacts,
}

#[derive(Subcommand)]
enum PeerAction {
    /// Dial a peer and add it to the routing table
    Add { addr: String },
    /// Show the saved peers file
    List,
    /// Forget all saved peers
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let paths = NodePaths::new(&cli.data_dir);

    match cli.command {
        Commands::Start {
            name,
            address,
            port,
            identity,
            peer,
            services,
            group,
        } => {
            daemon::run(daemon::StartOptions {
                name,
                address,
                port,
                identity_path: identity,
                peer,
                services: services.into_iter().filter(|s| !s.is_empty()).collect(),
                group,
                paths,
            })
            .await
        }
        Commands::Lookup { name, group } => cmd_lookup(&paths, &name, &group).await,
        Commands::Status => cmd_status().await,
        Commands::Peers => cmd_peers().await,
        Commands::Peer { action } => cmd_peer(&paths, action).await,
        Commands::Pair { code, name } => cmd_pair(code, name).await,
        Commands::Contacts => cmd_contacts(&paths),
    }
}

async fn require_running_node() -> Result<()> {
    if !client::is_node_running().await {
        anyhow::bail!("no MeshName node is running; start one first with: meshname start");
    }
    Ok(())
}

async fn cmd_lookup(paths: &NodePaths, name: &str, group: &str) -> Result<()> {
    // paired devices resolve locally without touching the mesh
    if let Ok(book) = ContactBook::load(&paths.contacts()) {
        if let Some(contact) = book.find_by_name(name) {
            println!("\nFound in contacts: {name}");
            println!("  Address:  {}", contact.address);
            println!("  Paired:   {}", ago(contact.paired_at));
            return Ok(());
        }
    }

    require_running_node().await?;

    match client::lookup(name, group).await? {
        Some(record) => {
            println!("\nFound: {name}");
            println!("  Address:  {}", record.address);
            println!("  Owner:    {}...", &record.public_key[..16]);
            if !record.services.is_empty() {
                println!("  Services: {}", record.services.join(", "));
            }
            let remaining = record.expires - meshname_dht::record::now_unix();
            println!("  Expires:  in {} min", remaining.max(0) / 60);
            Ok(())
        }
        None => anyhow::bail!("not found: {name:?} is not registered on the mesh"),
    }
}

async fn cmd_status() -> Result<()> {
    require_running_node().await?;
    let status = client::status().await?;

    println!("\nMeshName Node Status");
    println!("───────────────────────────────────────");
    println!("Name:       {}", status["name"].as_str().unwrap_or("?"));
    println!("Address:    {}", status["address"].as_str().unwrap_or("?"));
    println!("Public Key: {}", status["public_key"].as_str().unwrap_or("?"));
    println!("Peers:      {}", status["peers"]);
    println!("Records:    {}", status["records"]);
    println!("───────────────────────────────────────");
    Ok(())
}

async fn cmd_peers() -> Result<()> {
    require_running_node().await?;
    let peers = client::peers().await?;

    if peers.is_empty() {
        println!("No known peers.");
        return Ok(());
    }

    println!("\nKnown Peers ({})", peers.len());
    println!("────────────────────────────────────────────────────");
    for peer in peers {
        let (mark, latency) = if peer.alive {
            ("✓", format!("{} ms", peer.latency_ms))
        } else {
            ("✗", "unreachable".to_string())
        };
        // print the endpoint the way `peer add` accepts it
        let endpoint = match peer.addr.parse::<std::net::IpAddr>() {
            Ok(ip) => std::net::SocketAddr::new(ip, peer.port).to_string(),
            Err(_) => format!("{}:{}", peer.addr, peer.port),
        };
        println!("  {mark}  {}...  {endpoint}  {latency}", &peer.id[..12]);
    }
    Ok(())
}

async fn cmd_peer(paths: &NodePaths, action: PeerAction) -> Result<()> {
    match action {
        PeerAction::Add { addr } => {
            require_running_node().await?;
            client::peer_add(&addr).await?;
            println!("Peer added successfully.");
            Ok(())
        }
        PeerAction::List => {
            match std::fs::read_to_string(paths.peers()) {
                Ok(data) => {
                    println!("Saved peers:");
                    println!("{data}");
                }
                Err(_) => println!("No saved peers."),
            }
            Ok(())
        }
        PeerAction::Clear => {
            match std::fs::remove_file(paths.peers()) {
                Ok(()) => println!("Cleared all saved peers."),
                Err(_) => println!("No peers file to clear."),
            }
            Ok(())
        }
    }
}

async fn cmd_pair(code: Option<String>, name: Option<String>) -> Result<()> {
    require_running_node().await?;

    match code {
        // a code was typed in: we are the joiner
        Some(code) => {
            println!("Looking up pairing code {code}...");
            let contact = client::pair_join(&code, name.as_deref()).await?;
            println!("Paired with {} ({})", contact.name, contact.address);
            Ok(())
        }
        // no code: we are the initiator
        None => {
            let code = client::pair_initiate(name.as_deref()).await?;
            println!("\nYour pairing code: {code}");
            println!("Share this code with the other device.");
            println!("Waiting for partner... (expires in {} min)\n", PAIRING_TIMEOUT.as_secs() / 60);

            let deadline = tokio::time::Instant::now() + PAIRING_TIMEOUT;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                use std::io::Write;
                print!(".");
                let _ = std::io::stdout().flush();

                if let Some(contact) = client::pair_poll(&code).await? {
                    println!("\n\nPaired with {} ({})", contact.name, contact.address);
                    return Ok(());
                }
                if tokio::time::Instant::now() >= deadline {
                    println!();
                    anyhow::bail!("pairing timed out; the code has expired");
                }
            }
        }
    }
}

fn cmd_contacts(paths: &NodePaths) -> Result<()> {
    let book = ContactBook::load(&paths.contacts())?;
    let all = book.all();

    if all.is_empty() {
        println!("No contacts yet.");
        println!("Pair with another device using: meshname pair");
        return Ok(());
    }

    println!("\nContacts ({})", all.len());
    println!("──────────────────────────────────────────────────");
    for contact in all {
        println!("  {:<20}  {}", contact.name, contact.address);
        println!("  {:<20}  paired {}", "", ago(contact.paired_at));
    }
    println!("──────────────────────────────────────────────────");
    Ok(())
}

/// "N min ago" for contact listings
fn ago(when: chrono::DateTime<chrono::Utc>) -> String {
    let elapsed = chrono::Utc::now() - when;
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes} min ago")
    } else {
        format!("{} h ago", minutes / 60)
    }
}
