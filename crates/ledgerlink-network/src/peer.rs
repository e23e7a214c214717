//! Peer -- one remote node: identity, lazy channel, health bookkeeping.
//!
//! Backoff escalates on transport failure and decays on success. A peer at
//! its max backoff that fails again gets a readmission deadline and is
//! unhealthy until the deadline passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ledgerlink_protocol::{AccountId, PeerAddress, RpcStatus};
use tokio::sync::Mutex;

use crate::transport::{Channel, ConnectTarget, Connector};

#[derive(Debug, Clone)]
struct PeerHealth {
    current_backoff: Duration,
    min_backoff: Duration,
    max_backoff: Duration,
    bad_responses: u64,
    last_used: Option<Instant>,
    use_count: u64,
    readmit_at: Option<Instant>,
}

pub struct Peer {
    account_id: AccountId,
    address: PeerAddress,
    cert_hash: Option<String>,
    verify_certificate: AtomicBool,
    health: std::sync::Mutex<PeerHealth>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
}

impl Peer {
    pub fn new(
        account_id: AccountId,
        address: PeerAddress,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            account_id,
            address,
            cert_hash: None,
            verify_certificate: AtomicBool::new(true),
            health: std::sync::Mutex::new(PeerHealth {
                current_backoff: min_backoff,
                min_backoff,
                max_backoff,
                bad_responses: 0,
                last_used: None,
                use_count: 0,
                readmit_at: None,
            }),
            channel: Mutex::new(None),
        }
    }

    pub fn with_cert_hash(mut self, cert_hash: Option<String>) -> Self {
        self.cert_hash = cert_hash;
        self
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn cert_hash(&self) -> Option<&str> {
        self.cert_hash.as_deref()
    }

    fn health(&self) -> std::sync::MutexGuard<'_, PeerHealth> {
        // Health updates never panic mid-way; a poisoned lock still holds valid state.
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Health
    // ========================================================================

    pub fn is_healthy(&self) -> bool {
        match self.health().readmit_at {
            Some(at) => at <= Instant::now(),
            None => true,
        }
    }

    pub fn mark_used(&self) {
        let mut h = self.health();
        h.use_count += 1;
        h.last_used = Some(Instant::now());
    }

    pub fn increase_backoff(&self) {
        let mut h = self.health();
        h.bad_responses += 1;
        if h.current_backoff >= h.max_backoff {
            h.readmit_at = Some(Instant::now() + h.current_backoff);
        } else {
            h.current_backoff = (h.current_backoff * 2).min(h.max_backoff);
        }
    }

    pub fn decrease_backoff(&self) {
        let mut h = self.health();
        h.current_backoff = (h.current_backoff / 2).max(h.min_backoff);
        h.bad_responses = 0;
    }

    /// Time left until the peer may be retried.
    pub fn wait(&self) -> Duration {
        self.health()
            .readmit_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    pub fn readmit_at(&self) -> Option<Instant> {
        self.health().readmit_at
    }

    pub fn current_backoff(&self) -> Duration {
        self.health().current_backoff
    }

    pub fn min_backoff(&self) -> Duration {
        self.health().min_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.health().max_backoff
    }

    pub fn set_min_backoff(&self, min: Duration) {
        let mut h = self.health();
        h.min_backoff = min;
        if h.current_backoff < min {
            h.current_backoff = min;
        }
    }

    pub fn set_max_backoff(&self, max: Duration) {
        let mut h = self.health();
        h.max_backoff = max;
        if h.current_backoff > max {
            h.current_backoff = max;
        }
    }

    pub fn bad_responses(&self) -> u64 {
        self.health().bad_responses
    }

    pub fn use_count(&self) -> u64 {
        self.health().use_count
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.health().last_used
    }

    pub fn verify_certificate(&self) -> bool {
        self.verify_certificate.load(Ordering::Relaxed)
    }

    pub fn set_verify_certificate(&self, verify: bool) {
        self.verify_certificate.store(verify, Ordering::Relaxed);
    }

    // ========================================================================
    // Channel
    // ========================================================================

    /// The peer's channel, dialed on first use. Concurrent callers wait on the
    /// per-peer lock and share the one channel.
    pub async fn channel(&self, connector: &dyn Connector) -> Result<Arc<dyn Channel>, RpcStatus> {
        let mut slot = self.channel.lock().await;
        if let Some(channel) = slot.as_ref() {
            return Ok(channel.clone());
        }

        let target = ConnectTarget {
            address: self.address.clone(),
            cert_hash: self.cert_hash.clone(),
            verify_certificate: self.verify_certificate(),
        };
        let channel = connector.connect(target).await?;
        tracing::debug!(peer = %self.account_id, address = %self.address, "peer: channel established");
        *slot = Some(channel.clone());
        Ok(channel)
    }

    pub async fn has_channel(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Close and clear the channel. No-op when none is open.
    pub async fn close(&self) -> Result<(), RpcStatus> {
        let channel = self.channel.lock().await.take();
        match channel {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }

    // ========================================================================
    // Transport security flip
    // ========================================================================

    /// Same identity and health, secure address, no channel.
    pub fn to_secure(&self) -> Peer {
        self.with_address(self.address.to_secure())
    }

    /// Same identity and health, plaintext address, no channel.
    pub fn to_insecure(&self) -> Peer {
        self.with_address(self.address.to_insecure())
    }

    fn with_address(&self, address: PeerAddress) -> Peer {
        Peer {
            account_id: self.account_id,
            address,
            cert_hash: self.cert_hash.clone(),
            verify_certificate: AtomicBool::new(self.verify_certificate()),
            health: std::sync::Mutex::new(self.health().clone()),
            channel: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("account_id", &self.account_id)
            .field("address", &self.address)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxFuture;
    use ledgerlink_protocol::{RpcRequest, RpcResponse};
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn peer(min_ms: u64, max_ms: u64) -> Peer {
        Peer::new(
            AccountId::new(0, 0, 3),
            PeerAddress::new("127.0.0.1", 50211),
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        )
    }

    struct NullChannel;

    impl Channel for NullChannel {
        fn call(
            &self,
            _request: RpcRequest,
            _deadline: Duration,
        ) -> BoxFuture<'_, Result<RpcResponse, RpcStatus>> {
            Box::pin(async { Err(RpcStatus::unavailable("null")) })
        }

        fn close(&self) -> BoxFuture<'_, Result<(), RpcStatus>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct CountingConnector {
        dials: AtomicUsize,
    }

    impl Connector for CountingConnector {
        fn connect(
            &self,
            _target: ConnectTarget,
        ) -> BoxFuture<'_, Result<Arc<dyn Channel>, RpcStatus>> {
            Box::pin(async move {
                self.dials.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Arc::new(NullChannel) as Arc<dyn Channel>)
            })
        }
    }

    #[test]
    fn test_new_peer_is_healthy() {
        let p = peer(100, 800);
        assert!(p.is_healthy());
        assert_eq!(p.current_backoff(), Duration::from_millis(100));
        assert_eq!(p.wait(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles_then_readmit() {
        let p = peer(100, 400);
        p.increase_backoff();
        assert_eq!(p.current_backoff(), Duration::from_millis(200));
        p.increase_backoff();
        assert_eq!(p.current_backoff(), Duration::from_millis(400));
        // Reached max but still healthy
        assert!(p.is_healthy());

        p.increase_backoff();
        assert!(!p.is_healthy());
        assert!(p.wait() > Duration::ZERO);
        assert_eq!(p.bad_responses(), 3);
    }

    #[test]
    fn test_decrease_backoff_is_gradual() {
        let p = peer(100, 800);
        for _ in 0..3 {
            p.increase_backoff();
        }
        assert_eq!(p.current_backoff(), Duration::from_millis(800));
        p.decrease_backoff();
        assert_eq!(p.current_backoff(), Duration::from_millis(400));
        assert_eq!(p.bad_responses(), 0);
        p.decrease_backoff();
        p.decrease_backoff();
        p.decrease_backoff();
        assert_eq!(p.current_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn test_mark_used() {
        let p = peer(100, 800);
        assert!(p.last_used().is_none());
        p.mark_used();
        p.mark_used();
        assert_eq!(p.use_count(), 2);
        assert!(p.last_used().is_some());
    }

    #[test]
    fn test_readmission_deadline_passes() {
        let p = peer(50, 50);
        p.increase_backoff();
        assert!(!p.is_healthy());
        std::thread::sleep(Duration::from_millis(80));
        assert!(p.is_healthy());
    }

    #[test]
    fn test_to_secure_keeps_health() {
        let p = peer(100, 800).with_cert_hash(Some("ab".into()));
        p.increase_backoff();
        p.set_verify_certificate(false);

        let secure = p.to_secure();
        assert_eq!(secure.address().port, ledgerlink_protocol::address::PORT_TLS);
        assert_eq!(secure.current_backoff(), Duration::from_millis(200));
        assert_eq!(secure.account_id(), p.account_id());
        assert_eq!(secure.cert_hash(), Some("ab"));
        assert!(!secure.verify_certificate());

        let back = secure.to_insecure();
        assert_eq!(back.address(), p.address());
    }

    #[test]
    fn test_bound_setters_clamp_current() {
        let p = peer(100, 800);
        p.set_min_backoff(Duration::from_millis(300));
        assert_eq!(p.current_backoff(), Duration::from_millis(300));
        p.increase_backoff();
        p.set_max_backoff(Duration::from_millis(500));
        assert_eq!(p.current_backoff(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_channel_dialed_once_under_contention() {
        let p = Arc::new(peer(100, 800));
        let connector = Arc::new(CountingConnector {
            dials: AtomicUsize::new(0),
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let p = p.clone();
            let c = connector.clone();
            handles.push(tokio::spawn(async move { p.channel(c.as_ref()).await.is_ok() }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let p = peer(100, 800);
        let connector = CountingConnector {
            dials: AtomicUsize::new(0),
        };
        p.channel(&connector).await.unwrap();
        assert!(p.has_channel().await);
        p.close().await.unwrap();
        assert!(!p.has_channel().await);
        p.close().await.unwrap();

        // Redials after close
        p.channel(&connector).await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn prop_backoff_stays_within_bounds(
            min_ms in 1u64..1_000,
            extra_ms in 0u64..10_000,
            events in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let p = peer(min_ms, min_ms + extra_ms);
            for failed in events {
                if failed {
                    p.increase_backoff();
                } else {
                    p.decrease_backoff();
                }
                prop_assert!(p.current_backoff() >= p.min_backoff());
                prop_assert!(p.current_backoff() <= p.max_backoff());
            }
        }

        #[test]
        fn prop_unhealthy_only_after_max(
            min_ms in 200u64..1_000,
            doublings in 1u32..6,
        ) {
            let max_ms = min_ms << doublings;
            let p = peer(min_ms, max_ms);
            for _ in 0..doublings {
                p.increase_backoff();
                prop_assert!(p.is_healthy());
            }
            prop_assert_eq!(p.current_backoff(), Duration::from_millis(max_ms));
            p.increase_backoff();
            prop_assert!(!p.is_healthy());
        }
    }
}
