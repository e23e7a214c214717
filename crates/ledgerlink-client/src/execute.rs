//! Execution engine -- drives one request to a terminal outcome.
//!
//! Each attempt selects a peer (pinned list or pool), issues the call with a
//! per-call deadline, and dispatches on the request's own classification of
//! the response. The loop is bounded by an attempt budget and a wall-clock
//! budget checked at the top of every attempt.

use std::time::{Duration, Instant};

use ledgerlink_protocol::{AccountId, RpcRequest, RpcResponse};

use crate::client::Client;
use crate::lockable::LockableList;
use crate::operator::Operator;
use crate::ClientError;

/// Outcome of classifying one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Retry,
    Finished,
    Error,
    Expired,
    RetryWithAnotherNode,
}

// ============================================================================
// Per-request options
// ============================================================================

/// Per-request overrides. Unset values fall back to the client settings.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    max_attempts: Option<u32>,
    min_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    grpc_deadline: Option<Duration>,
    request_timeout: Option<Duration>,
    regenerate_transaction_id: Option<bool>,
    node_account_ids: LockableList<AccountId>,
}

impl ExecutionOptions {
    /// Options with the candidate list already pinned to `ids` and locked.
    pub fn pinned(ids: Vec<AccountId>) -> Self {
        let mut node_account_ids = LockableList::from(ids);
        node_account_ids.lock();
        Self {
            node_account_ids,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn set_max_attempts(&mut self, max_attempts: u32) -> Result<(), ClientError> {
        if max_attempts == 0 {
            return Err(ClientError::Config {
                name: "max attempts",
                reason: "must be at least 1".into(),
            });
        }
        self.max_attempts = Some(max_attempts);
        Ok(())
    }

    pub fn min_backoff(&self) -> Option<Duration> {
        self.min_backoff
    }

    pub fn set_min_backoff(&mut self, min: Duration) -> Result<(), ClientError> {
        if let Some(max) = self.max_backoff {
            if min > max {
                return Err(ClientError::Config {
                    name: "min backoff",
                    reason: format!("{min:?} exceeds max backoff {max:?}"),
                });
            }
        }
        self.min_backoff = Some(min);
        Ok(())
    }

    pub fn max_backoff(&self) -> Option<Duration> {
        self.max_backoff
    }

    pub fn set_max_backoff(&mut self, max: Duration) -> Result<(), ClientError> {
        if let Some(min) = self.min_backoff {
            if max < min {
                return Err(ClientError::Config {
                    name: "max backoff",
                    reason: format!("{max:?} is below min backoff {min:?}"),
                });
            }
        }
        self.max_backoff = Some(max);
        Ok(())
    }

    pub fn grpc_deadline(&self) -> Option<Duration> {
        self.grpc_deadline
    }

    pub fn set_grpc_deadline(&mut self, deadline: Duration) {
        self.grpc_deadline = Some(deadline);
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = Some(timeout);
    }

    pub fn regenerate_transaction_id(&self) -> Option<bool> {
        self.regenerate_transaction_id
    }

    pub fn set_regenerate_transaction_id(&mut self, regenerate: bool) {
        self.regenerate_transaction_id = Some(regenerate);
    }

    /// Pinned candidate peers, in rotation order.
    pub fn node_account_ids(&self) -> &LockableList<AccountId> {
        &self.node_account_ids
    }

    pub fn node_account_ids_mut(&mut self) -> &mut LockableList<AccountId> {
        &mut self.node_account_ids
    }

    /// Pin the request to `ids`. The list is locked for the request's lifetime.
    pub fn set_node_account_ids(&mut self, ids: Vec<AccountId>) -> Result<(), ClientError> {
        self.node_account_ids.set_list(ids)?;
        self.node_account_ids.lock();
        Ok(())
    }
}

// ============================================================================
// Executable
// ============================================================================

/// A request the engine can drive. Queries and transactions share the loop;
/// the engine never looks at the concrete type.
pub trait Executable: Send {
    type Output;

    /// Identifier used in log events.
    fn log_id(&self) -> String;

    fn options(&self) -> &ExecutionOptions;

    fn options_mut(&mut self) -> &mut ExecutionOptions;

    /// One-time setup before the first attempt.
    fn prepare(&mut self, _operator: Option<&Operator>) -> Result<(), ClientError> {
        Ok(())
    }

    /// Build the request for this attempt. May differ between attempts.
    fn build_request(&self, operator: Option<&Operator>) -> RpcRequest;

    fn should_retry(&self, response: &RpcResponse) -> ExecutionState;

    /// Error describing a non-success response.
    fn map_status_error(&self, response: &RpcResponse) -> ClientError;

    fn map_response(
        &self,
        response: RpcResponse,
        node: AccountId,
        request: &RpcRequest,
    ) -> Result<Self::Output, ClientError>;

    fn is_transaction(&self) -> bool {
        false
    }

    /// Replace the request identifier after an expiry. Returns false when the
    /// request cannot regenerate.
    fn regenerate_id(&mut self, _operator: Option<&Operator>) -> bool {
        false
    }

    /// True when the request may only run inside a batch container.
    fn is_batched_standalone(&self) -> bool {
        false
    }

    /// Rotate to the next pinned candidate.
    fn advance_request(&mut self) {
        self.options_mut().node_account_ids_mut().advance();
    }
}

/// Effective budgets for one execution.
#[derive(Debug, Clone, Copy)]
struct Budget {
    max_attempts: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    grpc_deadline: Duration,
    request_timeout: Duration,
    regenerate: bool,
}

impl Budget {
    fn resolve(client: &Client, options: &ExecutionOptions) -> Self {
        let settings = client.settings();
        Self {
            max_attempts: options
                .max_attempts()
                .map_or(settings.max_attempts, |n| n.min(settings.max_attempts)),
            min_backoff: options.min_backoff().unwrap_or(settings.min_backoff),
            max_backoff: options.max_backoff().unwrap_or(settings.max_backoff),
            grpc_deadline: options.grpc_deadline().unwrap_or(settings.grpc_deadline),
            request_timeout: options.request_timeout().unwrap_or(settings.request_timeout),
            regenerate: options
                .regenerate_transaction_id()
                .unwrap_or(settings.regenerate_transaction_id),
        }
    }
}

// ============================================================================
// Engine loop
// ============================================================================

pub async fn execute<E: Executable>(client: &Client, request: &mut E) -> Result<E::Output, ClientError> {
    let budget = Budget::resolve(client, request.options());
    let operator = client.operator();
    let pool = client.pool();
    let log_id = request.log_id();

    request.prepare(operator.as_deref())?;

    let start = Instant::now();
    let mut backoff = budget.min_backoff;
    let mut last_error: Option<ClientError> = None;

    for attempt in 0..budget.max_attempts {
        if start.elapsed() >= budget.request_timeout {
            tracing::warn!(request_id = %log_id, attempt, "exec: request timed out");
            return Err(ClientError::Timeout(budget.request_timeout));
        }

        if attempt > 0 {
            backoff = (backoff * 2).min(budget.max_backoff);
        }

        if request.is_batched_standalone() {
            return Err(ClientError::BatchOnly);
        }

        let wire = request.build_request(operator.as_deref());

        let pinned = request.options().node_account_ids().current().copied();
        let peer = match pinned {
            Some(account_id) => pool
                .node_for_key(&account_id)
                .await
                .ok_or(ClientError::InvalidPinnedNode(account_id))?,
            None => pool.select_node().await?,
        };

        let encoded = serde_json::to_vec(&wire).unwrap_or_default();
        tracing::trace!(
            request_id = %log_id,
            peer = %peer.account_id(),
            address = %peer.address(),
            request = %hex::encode(&encoded),
            attempt,
            "exec: executing"
        );

        peer.mark_used();

        if !peer.is_healthy() {
            let remaining = budget.request_timeout.saturating_sub(start.elapsed());
            let delay = peer.wait().min(remaining);
            tracing::trace!(
                request_id = %log_id,
                peer = %peer.account_id(),
                delay_ms = delay.as_millis() as u64,
                "exec: peer unhealthy, waiting"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        let channel = match peer.channel(pool.connector()).await {
            Ok(channel) => channel,
            Err(status) => {
                tracing::debug!(request_id = %log_id, peer = %peer.account_id(), %status, "exec: dial failed");
                pool.increase_backoff(&peer).await;
                request.advance_request();
                last_error = Some(ClientError::Transport(status));
                continue;
            }
        };

        let response = match channel.call(wire.clone(), budget.grpc_deadline).await {
            Ok(response) => response,
            Err(status) => {
                request.advance_request();
                if status.is_retryable() {
                    tracing::debug!(
                        request_id = %log_id,
                        peer = %peer.account_id(),
                        %status,
                        "exec: retryable transport failure"
                    );
                    pool.increase_backoff(&peer).await;
                    last_error = Some(ClientError::Transport(status));
                    continue;
                }
                tracing::warn!(request_id = %log_id, peer = %peer.account_id(), %status, "exec: fatal transport failure");
                return Err(ClientError::Attempt {
                    attempt,
                    max_attempts: budget.max_attempts,
                    source: Box::new(ClientError::Transport(status)),
                });
            }
        };

        peer.decrease_backoff();

        let state = request.should_retry(&response);
        tracing::trace!(
            request_id = %log_id,
            peer = %peer.account_id(),
            precheck = %response.precheck,
            ?state,
            "exec: response classified"
        );

        match state {
            ExecutionState::Retry => {
                last_error = Some(request.map_status_error(&response));
                tracing::trace!(
                    request_id = %log_id,
                    delay_ms = backoff.as_millis() as u64,
                    attempt = attempt + 1,
                    "exec: retrying attempt"
                );
                tokio::time::sleep(backoff).await;
            }
            ExecutionState::Expired => {
                if request.is_transaction()
                    && budget.regenerate
                    && request.regenerate_id(operator.as_deref())
                {
                    tracing::trace!(request_id = %log_id, "exec: expired, regenerated transaction id");
                    continue;
                }
                return Err(request.map_status_error(&response));
            }
            ExecutionState::Error => {
                let err = request.map_status_error(&response);
                tracing::debug!(request_id = %log_id, error = %err, "exec: request failed");
                return Err(err);
            }
            ExecutionState::Finished => {
                tracing::debug!(request_id = %log_id, peer = %peer.account_id(), attempt, "exec: finished");
                return request.map_response(response, peer.account_id(), &wire);
            }
            ExecutionState::RetryWithAnotherNode => {
                last_error = Some(request.map_status_error(&response));
                request.advance_request();
                tracing::trace!(
                    request_id = %log_id,
                    peer = %peer.account_id(),
                    "exec: node rejected request, updating address book"
                );
                pool.increase_backoff(&peer).await;
                client.trigger_address_book_update();
            }
        }
    }

    match last_error {
        Some(err) => {
            tracing::warn!(request_id = %log_id, error = %err, "exec: exceeded maximum attempts");
            Err(ClientError::Attempt {
                attempt: budget.max_attempts,
                max_attempts: budget.max_attempts,
                source: Box::new(err),
            })
        }
        None => Err(ClientError::Exhausted),
    }
}
