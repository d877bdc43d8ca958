//! Node file locations
//!
//! Every piece of persistent state lives under one data directory so a
//! second node on the same machine just points elsewhere. Paths are
//! injected into the components that use them; nothing reads a global.

use std::path::{Path, PathBuf};

/// Resolved locations of the node's state files
#[derive(Debug, Clone)]
pub struct NodePaths {
    data_dir: PathBuf,
}

impl NodePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Create the data directory if it does not exist yet
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Ed25519 keypair, `{private_key, public_key}` hex JSON
    pub fn identity(&self) -> PathBuf {
        self.data_dir.join("identity.json")
    }

    /// Saved DHT peers from the last run
    pub fn peers(&self) -> PathBuf {
        self.data_dir.join("peers.json")
    }

    /// Paired devices
    pub fn contacts(&self) -> PathBuf {
        self.data_dir.join("contacts.json")
    }
}
