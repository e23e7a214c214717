//! Node pool -- the managed set of peers and its healthy subset.
//!
//! All membership and health-partition state sits behind one RwLock.
//! Selection takes the read lock; membership changes build the new peer
//! list, healthy subset and key index, then swap them in under the write lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ledgerlink_protocol::{
    AccountId, AddressBook, LedgerId, PeerAddress, ProtocolError, RpcStatus, DEFAULT_TIMING,
};
use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::RwLock;

use crate::peer::Peer;
use crate::transport::Connector;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("failed to find a healthy working node")]
    NoHealthyNodes,
    #[error("invalid {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("failed to close peer {peer}: {status}")]
    Close { peer: AccountId, status: RpcStatus },
    #[error("address book unavailable: {0}")]
    AddressBook(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Outcome of a membership replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: usize,
    pub removed: usize,
}

struct PoolState {
    peers: Vec<Arc<Peer>>,
    healthy: Vec<Arc<Peer>>,
    by_key: HashMap<AccountId, Vec<Arc<Peer>>>,
    min_backoff: Duration,
    max_backoff: Duration,
    min_readmit: Duration,
    max_readmit: Duration,
    /// Readmission passes are skipped until this instant.
    earliest_readmit: Instant,
    ledger_id: Option<LedgerId>,
    transport_security: bool,
    verify_certificate: bool,
    max_nodes_per_transaction: Option<usize>,
}

impl PoolState {
    /// Rebuild the healthy subset and key index from `peers`.
    fn install(&mut self, peers: Vec<Arc<Peer>>) {
        let mut by_key: HashMap<AccountId, Vec<Arc<Peer>>> = HashMap::new();
        let mut healthy = Vec::new();
        for peer in &peers {
            if peer.is_healthy() {
                healthy.push(peer.clone());
            }
            by_key.entry(peer.account_id()).or_default().push(peer.clone());
        }
        self.peers = peers;
        self.healthy = healthy;
        self.by_key = by_key;
    }

    fn candidate(&self, account_id: AccountId, address: PeerAddress, cert_hash: Option<String>) -> Peer {
        let address = if self.transport_security {
            address.to_secure()
        } else {
            address.to_insecure()
        };
        let peer = Peer::new(account_id, address, self.min_backoff, self.max_backoff)
            .with_cert_hash(cert_hash);
        peer.set_verify_certificate(self.verify_certificate);
        peer
    }
}

/// Cloneable handle to a shared node pool.
#[derive(Clone)]
pub struct NodePool {
    inner: Arc<RwLock<PoolState>>,
    connector: Arc<dyn Connector>,
}

impl NodePool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let t = &DEFAULT_TIMING;
        Self {
            inner: Arc::new(RwLock::new(PoolState {
                peers: Vec::new(),
                healthy: Vec::new(),
                by_key: HashMap::new(),
                min_backoff: t.node_min_backoff(),
                max_backoff: t.node_max_backoff(),
                min_readmit: t.min_readmit(),
                max_readmit: t.max_readmit(),
                earliest_readmit: Instant::now(),
                ledger_id: None,
                transport_security: false,
                verify_certificate: true,
                max_nodes_per_transaction: None,
            })),
            connector,
        }
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Uniformly random healthy peer, drawn from the OS RNG.
    pub async fn select_node(&self) -> Result<Arc<Peer>, NetworkError> {
        self.recompute_readmissions().await;
        let state = self.inner.read().await;
        if state.healthy.is_empty() {
            return Err(NetworkError::NoHealthyNodes);
        }
        let idx = OsRng.gen_range(0..state.healthy.len());
        Ok(state.healthy[idx].clone())
    }

    /// A peer registered under `account_id`, preferring a healthy one.
    pub async fn node_for_key(&self, account_id: &AccountId) -> Option<Arc<Peer>> {
        let state = self.inner.read().await;
        let peers = state.by_key.get(account_id)?;
        peers
            .iter()
            .find(|p| p.is_healthy())
            .or_else(|| peers.first())
            .cloned()
    }

    /// Debounced readmission pass: promote backed-off peers whose deadline
    /// has passed, at most once per readmission period.
    pub async fn recompute_readmissions(&self) {
        let now = Instant::now();
        if self.inner.read().await.earliest_readmit >= now {
            return;
        }
        let mut state = self.inner.write().await;
        if state.earliest_readmit >= now {
            return;
        }

        let mut next = now + state.max_readmit;
        for peer in &state.peers {
            if let Some(at) = peer.readmit_at() {
                if at > now && at < next {
                    next = at;
                }
            }
        }
        state.earliest_readmit = next.max(now + state.min_readmit);

        let promoted: Vec<Arc<Peer>> = state
            .peers
            .iter()
            .filter(|&p| !state.healthy.iter().any(|h| Arc::ptr_eq(h, p)) && p.is_healthy())
            .cloned()
            .collect();
        if !promoted.is_empty() {
            for peer in &promoted {
                tracing::debug!(peer = %peer.account_id(), address = %peer.address(), "pool: peer readmitted");
            }
            state.healthy.extend(promoted);
        }
    }

    /// Escalate a peer's backoff; drop it from the healthy subset once it
    /// has a pending readmission deadline.
    pub async fn increase_backoff(&self, peer: &Arc<Peer>) {
        peer.increase_backoff();
        if peer.is_healthy() {
            return;
        }

        let mut state = self.inner.write().await;
        let before = state.healthy.len();
        state.healthy.retain(|h| !Arc::ptr_eq(h, peer));
        if state.healthy.len() < before {
            tracing::info!(
                peer = %peer.account_id(),
                address = %peer.address(),
                wait_ms = peer.wait().as_millis() as u64,
                healthy = state.healthy.len(),
                "pool: peer marked unhealthy"
            );
        }
    }

    /// `min(cap, healthy count)` after a readmission pass.
    pub async fn node_count_for_transaction(&self) -> usize {
        self.recompute_readmissions().await;
        let state = self.inner.read().await;
        match state.max_nodes_per_transaction {
            Some(cap) => cap.min(state.healthy.len()),
            None => state.healthy.len(),
        }
    }

    pub async fn set_max_nodes_per_transaction(&self, max: usize) {
        self.inner.write().await.max_nodes_per_transaction = Some(max);
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Diff-based replacement. Peers whose key is absent from `candidates`
    /// are removed and closed; candidates whose key and address are not
    /// already present are appended; everything else is kept as is.
    pub async fn replace_membership(&self, candidates: Vec<Peer>) -> MembershipDiff {
        let keys: HashSet<AccountId> = candidates.iter().map(|p| p.account_id()).collect();

        let (removed, diff, pool_size) = {
            let mut state = self.inner.write().await;

            let (kept, removed): (Vec<Arc<Peer>>, Vec<Arc<Peer>>) = state
                .peers
                .iter()
                .cloned()
                .partition(|p| keys.contains(&p.account_id()));

            let present: HashSet<(AccountId, PeerAddress)> = kept
                .iter()
                .map(|p| (p.account_id(), p.address().clone()))
                .collect();

            let mut peers = kept;
            let mut added = 0;
            for candidate in candidates {
                if present.contains(&(candidate.account_id(), candidate.address().clone())) {
                    continue;
                }
                peers.push(Arc::new(candidate));
                added += 1;
            }

            state.install(peers);
            let diff = MembershipDiff {
                added,
                removed: removed.len(),
            };
            (removed, diff, state.peers.len())
        };

        for peer in &removed {
            if let Err(status) = peer.close().await {
                tracing::warn!(peer = %peer.account_id(), %status, "pool: failed to close removed peer");
            }
        }

        if diff != MembershipDiff::default() {
            tracing::info!(
                added = diff.added,
                removed = diff.removed,
                pool_size,
                "pool: membership replaced"
            );
        }
        diff
    }

    /// Static membership from an `address -> account id` map.
    pub async fn set_network(
        &self,
        network: &HashMap<String, AccountId>,
    ) -> Result<MembershipDiff, NetworkError> {
        let candidates = {
            let state = self.inner.read().await;
            let mut candidates = Vec::with_capacity(network.len());
            for (address, account_id) in network {
                let address: PeerAddress = address.parse()?;
                candidates.push(state.candidate(*account_id, address, None));
            }
            candidates
        };
        Ok(self.replace_membership(candidates).await)
    }

    /// Membership from an address book, carrying certificate hashes.
    pub async fn set_network_from_address_book(&self, book: &AddressBook) -> MembershipDiff {
        let candidates = {
            let state = self.inner.read().await;
            book.entries
                .iter()
                .map(|e| state.candidate(e.peer_key, e.address.clone(), e.cert_hash.clone()))
                .collect()
        };
        self.replace_membership(candidates).await
    }

    /// Current membership as `address -> account id`.
    pub async fn network(&self) -> HashMap<String, AccountId> {
        self.inner
            .read()
            .await
            .peers
            .iter()
            .map(|p| (p.address().to_string(), p.account_id()))
            .collect()
    }

    pub async fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.read().await.peers.clone()
    }

    pub async fn healthy_count(&self) -> usize {
        self.inner.read().await.healthy.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.peers.is_empty()
    }

    /// Close every healthy peer's channel. Stops at the first failure.
    pub async fn close(&self) -> Result<(), NetworkError> {
        let healthy = self.inner.read().await.healthy.clone();
        for peer in healthy {
            peer.close().await.map_err(|status| NetworkError::Close {
                peer: peer.account_id(),
                status,
            })?;
        }
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Flip every peer between plaintext and TLS addresses. Existing
    /// channels are closed; rebuilt peers keep their health state.
    pub async fn set_transport_security(&self, enabled: bool) -> Result<(), NetworkError> {
        let old = {
            let mut state = self.inner.write().await;
            if state.transport_security == enabled {
                return Ok(());
            }
            let rebuilt: Vec<Arc<Peer>> = state
                .peers
                .iter()
                .map(|p| {
                    Arc::new(if enabled {
                        p.to_secure()
                    } else {
                        p.to_insecure()
                    })
                })
                .collect();
            state.transport_security = enabled;
            let old = std::mem::take(&mut state.peers);
            state.install(rebuilt);
            old
        };

        tracing::info!(enabled, peers = old.len(), "pool: transport security changed");
        for peer in old {
            peer.close().await.map_err(|status| NetworkError::Close {
                peer: peer.account_id(),
                status,
            })?;
        }
        Ok(())
    }

    pub async fn transport_security(&self) -> bool {
        self.inner.read().await.transport_security
    }

    pub async fn set_verify_certificate(&self, verify: bool) {
        let mut state = self.inner.write().await;
        for peer in &state.peers {
            peer.set_verify_certificate(verify);
        }
        state.verify_certificate = verify;
    }

    pub async fn verify_certificate(&self) -> bool {
        self.inner.read().await.verify_certificate
    }

    pub async fn set_min_backoff(&self, min: Duration) -> Result<(), NetworkError> {
        let mut state = self.inner.write().await;
        validate_bounds("node min backoff", min, min, state.max_backoff)?;
        state.min_backoff = min;
        for peer in &state.healthy {
            peer.set_min_backoff(min);
        }
        Ok(())
    }

    pub async fn set_max_backoff(&self, max: Duration) -> Result<(), NetworkError> {
        let mut state = self.inner.write().await;
        validate_bounds("node max backoff", max, state.min_backoff, max)?;
        state.max_backoff = max;
        for peer in &state.healthy {
            peer.set_max_backoff(max);
        }
        Ok(())
    }

    pub async fn min_backoff(&self) -> Duration {
        self.inner.read().await.min_backoff
    }

    pub async fn max_backoff(&self) -> Duration {
        self.inner.read().await.max_backoff
    }

    /// Also pushes the next readmission pass out to `now + min`.
    pub async fn set_min_readmit_period(&self, min: Duration) -> Result<(), NetworkError> {
        let mut state = self.inner.write().await;
        if min > state.max_readmit {
            return Err(NetworkError::InvalidSetting {
                name: "min readmit period",
                reason: format!("{min:?} exceeds max readmit period {:?}", state.max_readmit),
            });
        }
        state.min_readmit = min;
        state.earliest_readmit = Instant::now() + min;
        Ok(())
    }

    pub async fn set_max_readmit_period(&self, max: Duration) -> Result<(), NetworkError> {
        let mut state = self.inner.write().await;
        if max < state.min_readmit {
            return Err(NetworkError::InvalidSetting {
                name: "max readmit period",
                reason: format!("{max:?} is below min readmit period {:?}", state.min_readmit),
            });
        }
        state.max_readmit = max;
        Ok(())
    }

    pub async fn min_readmit_period(&self) -> Duration {
        self.inner.read().await.min_readmit
    }

    pub async fn max_readmit_period(&self) -> Duration {
        self.inner.read().await.max_readmit
    }

    pub async fn ledger_id(&self) -> Option<LedgerId> {
        self.inner.read().await.ledger_id.clone()
    }

    pub async fn set_ledger_id(&self, ledger_id: LedgerId) {
        self.inner.write().await.ledger_id = Some(ledger_id);
    }
}

fn validate_bounds(
    name: &'static str,
    value: Duration,
    min: Duration,
    max: Duration,
) -> Result<(), NetworkError> {
    if value.is_zero() {
        return Err(NetworkError::InvalidSetting {
            name,
            reason: "must be a positive duration".into(),
        });
    }
    if min > max {
        return Err(NetworkError::InvalidSetting {
            name,
            reason: format!("min {min:?} exceeds max {max:?}"),
        });
    }
    Ok(())
}
