//! Built-in requests: ping, raw queries and raw (optionally chunked)
//! transactions, classified by precheck status.

use std::fmt;

use chrono::{DateTime, Utc};
use ledgerlink_protocol::{AccountId, PrecheckStatus, RpcRequest, RpcResponse};
use rand::Rng;

use crate::client::Client;
use crate::execute::{Executable, ExecutionOptions, ExecutionState};
use crate::lockable::LockableList;
use crate::operator::Operator;
use crate::ClientError;

pub const PING_METHOD: &str = "crypto/ping";
pub const TRANSACTION_ID_HEADER: &str = "x-transaction-id";
pub const CHUNK_HEADER: &str = "x-chunk";

/// Default chunk size for transaction bodies.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Generated transaction ids start this far in the past (ms), jittered, so
/// small clock skew against the node does not reject them as future-dated.
const BACKDATE_MS: std::ops::Range<i64> = 5_000..8_000;

/// Stock classification of node precheck codes.
pub fn default_precheck_state(status: &PrecheckStatus) -> ExecutionState {
    match status {
        PrecheckStatus::Ok => ExecutionState::Finished,
        PrecheckStatus::Busy
        | PrecheckStatus::PlatformNotActive
        | PrecheckStatus::PlatformTransactionNotCreated => ExecutionState::Retry,
        PrecheckStatus::TransactionExpired => ExecutionState::Expired,
        PrecheckStatus::InvalidNodeAccount => ExecutionState::RetryWithAnotherNode,
        _ => ExecutionState::Error,
    }
}

fn precheck_error(response: &RpcResponse, log_id: String) -> ClientError {
    ClientError::Precheck {
        status: response.precheck.clone(),
        request: log_id,
    }
}

// ============================================================================
// Ping
// ============================================================================

/// Empty query pinned to one node. Succeeds when the node answers `OK`.
#[derive(Debug, Clone)]
pub struct Ping {
    node: AccountId,
    options: ExecutionOptions,
}

impl Ping {
    pub fn new(node: AccountId) -> Self {
        Self {
            node,
            options: ExecutionOptions::pinned(vec![node]),
        }
    }
}

impl Executable for Ping {
    type Output = ();

    fn log_id(&self) -> String {
        format!("Ping:{}", self.node)
    }

    fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut ExecutionOptions {
        &mut self.options
    }

    fn build_request(&self, operator: Option<&Operator>) -> RpcRequest {
        let request = RpcRequest::new(PING_METHOD, Vec::new());
        match operator {
            Some(op) => op.sign_request(request, &[]),
            None => request,
        }
    }

    fn should_retry(&self, response: &RpcResponse) -> ExecutionState {
        default_precheck_state(&response.precheck)
    }

    fn map_status_error(&self, response: &RpcResponse) -> ClientError {
        precheck_error(response, self.log_id())
    }

    fn map_response(
        &self,
        _response: RpcResponse,
        _node: AccountId,
        _request: &RpcRequest,
    ) -> Result<(), ClientError> {
        Ok(())
    }
}

// ============================================================================
// Raw query
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub node: AccountId,
    pub payload: Vec<u8>,
}

/// A query with a caller-encoded payload.
#[derive(Debug, Clone)]
pub struct RawQuery {
    method: String,
    payload: Vec<u8>,
    options: ExecutionOptions,
}

impl RawQuery {
    pub fn new(method: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            payload,
            options: ExecutionOptions::default(),
        }
    }
}

impl Executable for RawQuery {
    type Output = QueryResponse;

    fn log_id(&self) -> String {
        format!("Query:{}", self.method)
    }

    fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut ExecutionOptions {
        &mut self.options
    }

    fn build_request(&self, operator: Option<&Operator>) -> RpcRequest {
        let request = RpcRequest::new(self.method.clone(), self.payload.clone());
        match operator {
            Some(op) => op.sign_request(request, &self.payload),
            None => request,
        }
    }

    fn should_retry(&self, response: &RpcResponse) -> ExecutionState {
        default_precheck_state(&response.precheck)
    }

    fn map_status_error(&self, response: &RpcResponse) -> ClientError {
        precheck_error(response, self.log_id())
    }

    fn map_response(
        &self,
        response: RpcResponse,
        node: AccountId,
        _request: &RpcRequest,
    ) -> Result<QueryResponse, ClientError> {
        Ok(QueryResponse {
            node,
            payload: response.payload,
        })
    }
}

// ============================================================================
// Transaction id
// ============================================================================

/// Payer account plus valid-start timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub account_id: AccountId,
    pub valid_start: DateTime<Utc>,
}

impl TransactionId {
    /// Fresh id for `account_id`, backdated by a few seconds.
    pub fn generate(account_id: AccountId) -> Self {
        let backdate = rand::thread_rng().gen_range(BACKDATE_MS);
        Self {
            account_id,
            valid_start: Utc::now() - chrono::Duration::milliseconds(backdate),
        }
    }

    pub fn with_valid_start(account_id: AccountId, valid_start: DateTime<Utc>) -> Self {
        Self {
            account_id,
            valid_start,
        }
    }

    /// Same payer, valid start shifted by `nanos`. Used for chunk ids.
    pub fn offset_nanos(&self, nanos: i64) -> Self {
        Self {
            account_id: self.account_id,
            valid_start: self.valid_start + chrono::Duration::nanoseconds(nanos),
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{:09}",
            self.account_id,
            self.valid_start.timestamp(),
            self.valid_start.timestamp_subsec_nanos()
        )
    }
}

// ============================================================================
// Raw transaction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResponse {
    pub node: AccountId,
    pub transaction_id: TransactionId,
    pub chunk: usize,
    pub payload: Vec<u8>,
}

/// A state-changing request with a caller-encoded body. Bodies larger than
/// the chunk size are sent as consecutive chunks, one transaction id each.
#[derive(Debug, Clone)]
pub struct RawTransaction {
    method: String,
    body: Vec<u8>,
    chunk_size: usize,
    transaction_ids: LockableList<TransactionId>,
    /// Ids were generated here and may be regenerated on expiry.
    generated_ids: bool,
    batch_only: bool,
    options: ExecutionOptions,
}

impl RawTransaction {
    pub fn new(method: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            body,
            chunk_size: DEFAULT_CHUNK_SIZE,
            transaction_ids: LockableList::new(),
            generated_ids: false,
            batch_only: false,
            options: ExecutionOptions::default(),
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) -> Result<(), ClientError> {
        if chunk_size == 0 {
            return Err(ClientError::Config {
                name: "chunk size",
                reason: "must be at least 1 byte".into(),
            });
        }
        if self.transaction_ids.is_locked() {
            return Err(ClientError::Locked(crate::LockableError::Locked));
        }
        self.chunk_size = chunk_size;
        Ok(())
    }

    /// Caller-chosen id for the first chunk. Disables regeneration.
    pub fn set_transaction_id(&mut self, id: TransactionId) -> Result<(), ClientError> {
        self.transaction_ids.set_list(vec![id])?;
        self.generated_ids = false;
        Ok(())
    }

    /// Mark as an inner transaction of a batch. Such a transaction cannot be
    /// executed on its own.
    pub fn batchify(&mut self) {
        self.batch_only = true;
    }

    pub fn chunk_count(&self) -> usize {
        self.body.len().div_ceil(self.chunk_size).max(1)
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_ids.current().copied()
    }

    pub fn transaction_ids(&self) -> &LockableList<TransactionId> {
        &self.transaction_ids
    }

    fn chunk(&self, index: usize) -> &[u8] {
        self.body.chunks(self.chunk_size).nth(index).unwrap_or(&[])
    }

    /// Execute every chunk in order.
    pub async fn execute_all(
        &mut self,
        client: &Client,
    ) -> Result<Vec<TransactionResponse>, ClientError> {
        let chunks = self.chunk_count();
        let mut responses = Vec::with_capacity(chunks);
        for _ in 0..chunks {
            responses.push(client.execute(self).await?);
            self.transaction_ids.advance();
        }
        Ok(responses)
    }
}

impl Executable for RawTransaction {
    type Output = TransactionResponse;

    fn log_id(&self) -> String {
        match self.transaction_id() {
            Some(id) => format!("TransactionId:{id}"),
            None => format!("Transaction:{}", self.method),
        }
    }

    fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut ExecutionOptions {
        &mut self.options
    }

    /// Fix one id per chunk and lock the list.
    fn prepare(&mut self, operator: Option<&Operator>) -> Result<(), ClientError> {
        if self.transaction_ids.is_locked() {
            return Ok(());
        }

        let first = match self.transaction_ids.get(0).copied() {
            Some(id) => id,
            None => {
                let op = operator.ok_or_else(|| ClientError::Config {
                    name: "transaction id",
                    reason: "no transaction id set and no operator to generate one".into(),
                })?;
                self.generated_ids = true;
                TransactionId::generate(op.account_id())
            }
        };

        for i in 0..self.chunk_count() {
            self.transaction_ids
                .set_if_absent(i, first.offset_nanos(i as i64))?;
        }
        self.transaction_ids.lock();
        Ok(())
    }

    fn build_request(&self, operator: Option<&Operator>) -> RpcRequest {
        let index = self.transaction_ids.index();
        let chunk = self.chunk(index).to_vec();
        let id = self
            .transaction_id()
            .map(|id| id.to_string())
            .unwrap_or_default();

        let request = RpcRequest::new(self.method.clone(), chunk.clone())
            .with_metadata(TRANSACTION_ID_HEADER, id.clone())
            .with_metadata(CHUNK_HEADER, format!("{}/{}", index + 1, self.chunk_count()));

        match operator {
            Some(op) => {
                let mut message = id.into_bytes();
                message.extend_from_slice(&chunk);
                op.sign_request(request, &message)
            }
            None => request,
        }
    }

    fn should_retry(&self, response: &RpcResponse) -> ExecutionState {
        default_precheck_state(&response.precheck)
    }

    fn map_status_error(&self, response: &RpcResponse) -> ClientError {
        precheck_error(response, self.log_id())
    }

    fn map_response(
        &self,
        response: RpcResponse,
        node: AccountId,
        _request: &RpcRequest,
    ) -> Result<TransactionResponse, ClientError> {
        let transaction_id = self.transaction_id().ok_or_else(|| ClientError::Config {
            name: "transaction id",
            reason: "response for a transaction without an id".into(),
        })?;
        Ok(TransactionResponse {
            node,
            transaction_id,
            chunk: self.transaction_ids.index(),
            payload: response.payload,
        })
    }

    fn is_transaction(&self) -> bool {
        true
    }

    fn regenerate_id(&mut self, operator: Option<&Operator>) -> bool {
        let Some(op) = operator else {
            return false;
        };
        if !self.generated_ids {
            return false;
        }
        let index = self.transaction_ids.index();
        let fresh = TransactionId::generate(op.account_id());
        self.transaction_ids.unlock();
        let replaced = self.transaction_ids.set(index, fresh).is_ok();
        self.transaction_ids.lock();
        replaced
    }

    fn is_batched_standalone(&self) -> bool {
        self.batch_only
    }
}
