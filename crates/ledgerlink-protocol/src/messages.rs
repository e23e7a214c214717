//! Wire message types for unary calls.
//!
//! A call is one `Frame::Request` answered by either a `Frame::Response`
//! (transport success, carrying the application precheck status) or a
//! `Frame::Status` (transport failure).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Service method, e.g. `crypto/get_account_balance`.
    pub method: String,
    /// Call metadata (user agent, operator signature).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            metadata: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub precheck: PrecheckStatus,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl RpcResponse {
    pub fn new(precheck: PrecheckStatus, payload: Vec<u8>) -> Self {
        Self { precheck, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Request(RpcRequest),
    Response(RpcResponse),
    Status(RpcStatus),
}

// ============================================================================
// Precheck status (application level)
// ============================================================================

/// Node-side precheck result attached to every response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PrecheckStatus {
    Ok,
    Busy,
    PlatformNotActive,
    PlatformTransactionNotCreated,
    TransactionExpired,
    InvalidNodeAccount,
    InvalidSignature,
    InsufficientPayerBalance,
    /// Any code this client does not name.
    Other(String),
}

impl PrecheckStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PrecheckStatus::Ok => "OK",
            PrecheckStatus::Busy => "BUSY",
            PrecheckStatus::PlatformNotActive => "PLATFORM_NOT_ACTIVE",
            PrecheckStatus::PlatformTransactionNotCreated => "PLATFORM_TRANSACTION_NOT_CREATED",
            PrecheckStatus::TransactionExpired => "TRANSACTION_EXPIRED",
            PrecheckStatus::InvalidNodeAccount => "INVALID_NODE_ACCOUNT",
            PrecheckStatus::InvalidSignature => "INVALID_SIGNATURE",
            PrecheckStatus::InsufficientPayerBalance => "INSUFFICIENT_PAYER_BALANCE",
            PrecheckStatus::Other(code) => code,
        }
    }
}

impl From<String> for PrecheckStatus {
    fn from(code: String) -> Self {
        match code.as_str() {
            "OK" => PrecheckStatus::Ok,
            "BUSY" => PrecheckStatus::Busy,
            "PLATFORM_NOT_ACTIVE" => PrecheckStatus::PlatformNotActive,
            "PLATFORM_TRANSACTION_NOT_CREATED" => PrecheckStatus::PlatformTransactionNotCreated,
            "TRANSACTION_EXPIRED" => PrecheckStatus::TransactionExpired,
            "INVALID_NODE_ACCOUNT" => PrecheckStatus::InvalidNodeAccount,
            "INVALID_SIGNATURE" => PrecheckStatus::InvalidSignature,
            "INSUFFICIENT_PAYER_BALANCE" => PrecheckStatus::InsufficientPayerBalance,
            _ => PrecheckStatus::Other(code),
        }
    }
}

impl From<PrecheckStatus> for String {
    fn from(status: PrecheckStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for PrecheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transport status
// ============================================================================

/// gRPC-style transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

/// A failed call as seen by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// Transient failures worth another attempt. `Internal` only counts when
    /// the message carries a stream reset signature.
    pub fn is_retryable(&self) -> bool {
        match self.code {
            StatusCode::DeadlineExceeded
            | StatusCode::ResourceExhausted
            | StatusCode::Unavailable => true,
            StatusCode::Internal => mentions_stream_reset(&self.message),
            _ => false,
        }
    }
}

static STREAM_RESET: OnceLock<Regex> = OnceLock::new();

/// Case-insensitive `\brst[^0-9a-zA-Z]stream\b`.
fn mentions_stream_reset(message: &str) -> bool {
    STREAM_RESET
        .get_or_init(|| Regex::new(r"(?i)\brst[^0-9a-zA-Z]stream\b").expect("static pattern"))
        .is_match(message)
}

// ============================================================================
// Serde helpers
// ============================================================================

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
