//! ledgerlink client -- request execution against a managed node network.
//!
//! `Client` ties a `NodePool`, its background address book refresher and the
//! client-wide retry settings together. Requests implement `Executable` and
//! are driven to completion by `execute::execute`.

pub mod client;
pub mod config;
pub mod execute;
pub mod lockable;
pub mod operator;
pub mod requests;

pub use client::{Client, ClientSettings};
pub use config::ClientConfig;
pub use execute::{execute, Executable, ExecutionOptions, ExecutionState};
pub use lockable::{LockableError, LockableList};
pub use operator::Operator;
pub use requests::{Ping, QueryResponse, RawQuery, RawTransaction, TransactionId, TransactionResponse};

use std::path::PathBuf;
use std::time::Duration;

use ledgerlink_crypto::CryptoError;
use ledgerlink_network::NetworkError;
use ledgerlink_protocol::{AccountId, PrecheckStatus, ProtocolError, RpcStatus};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Locked(#[from] LockableError),
    #[error("cannot execute batchified transaction outside of a batch")]
    BatchOnly,
    #[error("pinned node {0} is not part of the network")]
    InvalidPinnedNode(AccountId),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport: {0}")]
    Transport(RpcStatus),
    #[error("exceptional precheck status {status} for {request}")]
    Precheck {
        status: PrecheckStatus,
        request: String,
    },
    #[error("retry {attempt}/{max_attempts}: {source}")]
    Attempt {
        attempt: u32,
        max_attempts: u32,
        source: Box<ClientError>,
    },
    #[error("unknown error occurred after max attempts")]
    Exhausted,
    #[error("invalid {name}: {reason}")]
    Config { name: &'static str, reason: String },
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ClientError {
    /// The innermost error, unwrapping attempt context.
    pub fn root(&self) -> &ClientError {
        match self {
            ClientError::Attempt { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Expand ~ to home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
