//! The local contact book
//!
//! Paired devices are remembered in a JSON file, keyed by public key so
//! re-pairing the same device updates its entry instead of duplicating it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PairingResult;

/// A paired device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub paired_at: DateTime<Utc>,
}

/// The on-disk list of paired devices
pub struct ContactBook {
    path: PathBuf,
    contacts: HashMap<String, Contact>,
}

impl ContactBook {
    /// Read the book at `path`; a missing file is an empty book
    pub fn load(path: &Path) -> PairingResult<Self> {
        let contacts = match std::fs::read(path) {
            Ok(data) => {
                let list: Vec<Contact> = serde_json::from_slice(&data)?;
                list.into_iter().map(|c| (c.public_key.clone(), c)).collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            contacts,
        })
    }

    /// Write the book back to disk, owner-readable only
    pub fn save(&self) -> PairingResult<()> {
        let list: Vec<&Contact> = self.contacts.values().collect();
        let data = serde_json::to_vec_pretty(&list)?;
        std::fs::write(&self.path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Add or update a contact
    pub fn add(&mut self, contact: Contact) {
        self.contacts.insert(contact.public_key.clone(), contact);
    }

    /// All contacts
    pub fn all(&self) -> Vec<Contact> {
        self.contacts.values().cloned().collect()
    }

    /// Find a contact by display name
    pub fn find_by_name(&self, name: &str) -> Option<&Contact> {
        self.contacts.values().find(|c| c.name == name)
    }

    /// Find a contact by overlay address
    pub fn find_by_address(&self, address: &str) -> Option<&Contact> {
        self.contacts.values().find(|c| c.address == address)
    }

    /// Number of contacts
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// True when no device has been paired yet
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str, key: &str) -> Contact {
        Contact {
            name: name.into(),
            address: "200:1234::1".into(),
            public_key: key.into(),
            paired_at: Utc::now(),
        }
    }

    #[test]
    fn missing_file_is_an_empty_book() {
        let dir = tempfile::tempdir().unwrap();
        let book = ContactBook::load(&dir.path().join("contacts.json")).unwrap();
        assert!(book.is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");

        let mut book = ContactBook::load(&path).unwrap();
        book.add(contact("alice", "k1"));
        book.add(contact("bob", "k2"));
        book.save().unwrap();

        let reloaded = ContactBook::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.find_by_name("alice").unwrap().public_key, "k1");
        assert!(reloaded.find_by_address("200:1234::1").is_some());
    }

    #[test]
    fn repairing_updates_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");

        let mut book = ContactBook::load(&path).unwrap();
        book.add(contact("alice", "k1"));
        book.add(contact("alice-laptop", "k1"));

        assert_eq!(book.len(), 1);
        assert!(book.find_by_name("alice-laptop").is_some());
    }
}
