//! Address book -- peer identity, address and pinned certificate hash.
//!
//! Snapshots for the public networks are compiled in and parsed on demand into
//! immutable values handed to pool construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{AccountId, PeerAddress, ProtocolError};

const MAINNET_BOOK: &str = include_str!("../address_books/mainnet.json");
const TESTNET_BOOK: &str = include_str!("../address_books/testnet.json");
const PREVIEWNET_BOOK: &str = include_str!("../address_books/previewnet.json");

/// One address book row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub peer_key: AccountId,
    pub address: PeerAddress,
    /// Lowercase hex SHA-384 of the PEM-encoded TLS certificate.
    #[serde(default)]
    pub cert_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    pub entries: Vec<AddressBookEntry>,
}

/// Public networks with an embedded address book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownNetwork {
    Mainnet,
    Testnet,
    Previewnet,
}

impl KnownNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnownNetwork::Mainnet => "mainnet",
            KnownNetwork::Testnet => "testnet",
            KnownNetwork::Previewnet => "previewnet",
        }
    }
}

impl fmt::Display for KnownNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownNetwork {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(KnownNetwork::Mainnet),
            "testnet" => Ok(KnownNetwork::Testnet),
            "previewnet" => Ok(KnownNetwork::Previewnet),
            other => Err(ProtocolError::UnknownNetwork(other.to_string())),
        }
    }
}

impl AddressBook {
    pub fn new(entries: Vec<AddressBookEntry>) -> Self {
        Self { entries }
    }

    /// Parse the compiled-in snapshot for a public network.
    pub fn embedded(network: KnownNetwork) -> Result<Self, ProtocolError> {
        let raw = match network {
            KnownNetwork::Mainnet => MAINNET_BOOK,
            KnownNetwork::Testnet => TESTNET_BOOK,
            KnownNetwork::Previewnet => PREVIEWNET_BOOK,
        };
        Self::from_json(raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let book: AddressBook = serde_json::from_str(raw)
            .map_err(|e| ProtocolError::InvalidAddressBook(e.to_string()))?;
        Ok(book)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `address -> peer key` view, the shape accepted by static pool construction.
    pub fn to_network_map(&self) -> HashMap<String, AccountId> {
        self.entries
            .iter()
            .map(|e| (e.address.to_string(), e.peer_key))
            .collect()
    }
}
