//! Configuration types for the ledgerlink client.
//! Parsed from ~/.ledgerlink/config.toml.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use ledgerlink_protocol::DEFAULT_TIMING;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub operator: OperatorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    /// `mainnet`, `testnet` or `previewnet`. Ignored when `nodes` is set.
    #[serde(default = "default_network_name")]
    pub name: String,
    /// Explicit `address -> account id` membership.
    #[serde(default)]
    pub nodes: BTreeMap<String, String>,
    #[serde(default)]
    pub transport_security: bool,
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
    /// Address book refresh period. 0 disables the background refresh.
    #[serde(default = "default_update_period_secs")]
    pub update_period_secs: u64,
    pub max_nodes_per_transaction: Option<usize>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            nodes: BTreeMap::new(),
            transport_security: false,
            verify_certificates: true,
            update_period_secs: default_update_period_secs(),
            max_nodes_per_transaction: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_request_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_grpc_deadline_ms")]
    pub grpc_deadline_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub regenerate_transaction_ids: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff_ms: default_request_min_backoff_ms(),
            max_backoff_ms: default_request_max_backoff_ms(),
            grpc_deadline_ms: default_grpc_deadline_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            regenerate_transaction_ids: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_node_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_node_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_min_readmit_ms")]
    pub min_readmit_ms: u64,
    #[serde(default = "default_max_readmit_ms")]
    pub max_readmit_ms: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            min_backoff_ms: default_node_min_backoff_ms(),
            max_backoff_ms: default_node_max_backoff_ms(),
            min_readmit_ms: default_min_readmit_ms(),
            max_readmit_ms: default_max_readmit_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSection {
    pub account_id: Option<String>,
    /// PKCS#8 Ed25519 key file.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

impl Default for OperatorSection {
    fn default() -> Self {
        Self {
            account_id: None,
            key_file: default_key_file(),
        }
    }
}

// Default value functions
fn default_network_name() -> String {
    "testnet".into()
}
fn default_true() -> bool {
    true
}
fn default_update_period_secs() -> u64 {
    DEFAULT_TIMING.network_update_period_secs
}
fn default_max_attempts() -> u32 {
    DEFAULT_TIMING.max_attempts
}
fn default_request_min_backoff_ms() -> u64 {
    DEFAULT_TIMING.request_min_backoff_ms
}
fn default_request_max_backoff_ms() -> u64 {
    DEFAULT_TIMING.request_max_backoff_ms
}
fn default_grpc_deadline_ms() -> u64 {
    DEFAULT_TIMING.grpc_deadline_ms
}
fn default_request_timeout_ms() -> u64 {
    DEFAULT_TIMING.request_timeout_ms
}
fn default_node_min_backoff_ms() -> u64 {
    DEFAULT_TIMING.node_min_backoff_ms
}
fn default_node_max_backoff_ms() -> u64 {
    DEFAULT_TIMING.node_max_backoff_ms
}
fn default_min_readmit_ms() -> u64 {
    DEFAULT_TIMING.min_readmit_ms
}
fn default_max_readmit_ms() -> u64 {
    DEFAULT_TIMING.max_readmit_ms
}
fn default_key_file() -> String {
    "~/.ledgerlink/operator.key".into()
}

impl ClientConfig {
    /// Load config from file, or defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
