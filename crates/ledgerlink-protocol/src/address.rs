//! Peer network address -- `host:port` with a secure/insecure variant.
//!
//! Plaintext service port is 50211, TLS is 50212. Port 443 is treated as TLS
//! (proxied endpoints).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

pub const PORT_PLAINTEXT: u16 = 50211;
pub const PORT_TLS: u16 = 50212;
pub const PORT_HTTPS: u16 = 443;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn is_transport_security(&self) -> bool {
        self.port == PORT_TLS || self.port == PORT_HTTPS
    }

    /// Same host on the TLS port. Ports other than the plaintext port are kept.
    pub fn to_secure(&self) -> Self {
        let port = if self.port == PORT_PLAINTEXT {
            PORT_TLS
        } else {
            self.port
        };
        Self::new(self.host.clone(), port)
    }

    /// Same host on the plaintext port. Ports other than the TLS port are kept.
    pub fn to_insecure(&self) -> Self {
        let port = if self.port == PORT_TLS {
            PORT_PLAINTEXT
        } else {
            self.port
        };
        Self::new(self.host.clone(), port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::InvalidAddress(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ProtocolError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(addr: PeerAddress) -> Self {
        addr.to_string()
    }
}
