//! ledgerlink protocol -- wire frames, codec, peer addressing, TLS pinning.
//!
//! Requests and responses travel as length-prefixed JSON frames, one frame per
//! QUIC bidirectional stream (secure peers) or sequentially on a TCP stream
//! (plaintext peers).

pub mod address;
pub mod address_book;
pub mod codec;
pub mod defaults;
pub mod messages;
pub mod tls;

pub use address::PeerAddress;
pub use address_book::{AddressBook, AddressBookEntry, KnownNetwork};
pub use codec::FrameCodec;
pub use defaults::{TimingProfile, DEFAULT_TIMING};
pub use messages::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metadata key carrying the client identifier on every call.
pub const USER_AGENT_HEADER: &str = "x-user-agent";

/// Client identifier reported in the user agent header.
pub const CLIENT_IDENTIFIER: &str = "ledgerlink-rust";

/// Maximum frame size in bytes.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
    #[error("invalid address book: {0}")]
    InvalidAddressBook(String),
    #[error("unknown network name: {0}")]
    UnknownNetwork(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// `<identifier>/<version>`, the version stripped of a leading `v` and of any
/// pre-release or build suffix.
pub fn user_agent() -> String {
    format!(
        "{}/{}",
        CLIENT_IDENTIFIER,
        normalize_version(env!("CARGO_PKG_VERSION"))
    )
}

fn normalize_version(raw: &str) -> &str {
    let trimmed = raw.split([' ', '-', '+']).next().unwrap_or(raw);
    match trimmed.strip_prefix('v') {
        Some(rest) if !rest.is_empty() => rest,
        _ if trimmed.is_empty() => "DEV",
        _ => trimmed,
    }
}

/// Account identifier `shard.realm.num`. Used as the stable peer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl AccountId {
    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for AccountId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let parse = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| ProtocolError::InvalidAccountId(s.to_string()))
        };
        match parts.as_slice() {
            [shard, realm, num] => Ok(Self::new(parse(shard)?, parse(realm)?, parse(num)?)),
            [num] => Ok(Self::new(0, 0, parse(num)?)),
            _ => Err(ProtocolError::InvalidAccountId(s.to_string())),
        }
    }
}

impl TryFrom<String> for AccountId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.to_string()
    }
}

/// Identity of the ledger a pool is talking to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerId(Vec<u8>);

impl LedgerId {
    pub fn mainnet() -> Self {
        Self(vec![0x00])
    }

    pub fn testnet() -> Self {
        Self(vec![0x01])
    }

    pub fn previewnet() -> Self {
        Self(vec![0x02])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn for_network(network: KnownNetwork) -> Self {
        match network {
            KnownNetwork::Mainnet => Self::mainnet(),
            KnownNetwork::Testnet => Self::testnet(),
            KnownNetwork::Previewnet => Self::previewnet(),
        }
    }
}

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [0x00] => f.write_str("mainnet"),
            [0x01] => f.write_str("testnet"),
            [0x02] => f.write_str("previewnet"),
            other => write!(f, "{}", hex::encode(other)),
        }
    }
}
