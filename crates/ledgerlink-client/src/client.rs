//! Client facade -- network construction, retry settings, operator, ping.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use ledgerlink_crypto::{Ed25519Signer, Signer};
use ledgerlink_network::{
    AddressBookSource, Connector, MembershipDiff, NetworkRefresher, NodePool, StaticAddressBook,
    TransportConnector,
};
use ledgerlink_protocol::{AccountId, AddressBook, KnownNetwork, LedgerId, DEFAULT_TIMING};

use crate::config::ClientConfig;
use crate::execute::{self, Executable};
use crate::operator::Operator;
use crate::requests::Ping;
use crate::{expand_tilde, ClientError};

/// Client-wide retry budgets. Requests may override each of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub grpc_deadline: Duration,
    pub request_timeout: Duration,
    pub regenerate_transaction_id: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let t = &DEFAULT_TIMING;
        Self {
            max_attempts: t.max_attempts,
            min_backoff: t.request_min_backoff(),
            max_backoff: t.request_max_backoff(),
            grpc_deadline: t.grpc_deadline(),
            request_timeout: t.request_timeout(),
            regenerate_transaction_id: true,
        }
    }
}

pub struct Client {
    pool: NodePool,
    refresher: Option<NetworkRefresher>,
    settings: ClientSettings,
    operator: Option<Arc<Operator>>,
}

impl Client {
    fn with_pool(pool: NodePool, refresher: Option<NetworkRefresher>) -> Self {
        Self {
            pool,
            refresher,
            settings: ClientSettings::default(),
            operator: None,
        }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Static membership from an `address -> account id` map. All accounts
    /// must share one shard and realm. No background refresh.
    pub async fn for_network(network: HashMap<String, AccountId>) -> Result<Self, ClientError> {
        Self::for_network_with_connector(network, Arc::new(TransportConnector::default())).await
    }

    pub async fn for_network_with_connector(
        network: HashMap<String, AccountId>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        validate_network(&network)?;
        let pool = NodePool::new(connector);
        pool.set_network(&network).await?;
        tracing::info!(peers = network.len(), "client: static network configured");
        Ok(Self::with_pool(pool, None))
    }

    /// Membership from an address book source. The first fetch runs before
    /// this returns; later fetches run every `update_period` (zero disables).
    pub async fn for_address_book_source(
        source: Arc<dyn AddressBookSource>,
        connector: Arc<dyn Connector>,
        ledger_id: Option<LedgerId>,
        update_period: Duration,
    ) -> Result<Self, ClientError> {
        let pool = NodePool::new(connector);
        if let Some(ledger_id) = ledger_id {
            pool.set_ledger_id(ledger_id).await;
        }

        let refresher = NetworkRefresher::new(pool.clone(), source, update_period);
        refresher.start().await;
        if pool.is_empty().await {
            refresher.cancel();
            return Err(ClientError::InvalidNetwork("address book has no entries".into()));
        }

        tracing::info!(peers = pool.len().await, "client: network configured from address book");
        Ok(Self::with_pool(pool, Some(refresher)))
    }

    pub async fn for_address_book(
        book: AddressBook,
        ledger_id: Option<LedgerId>,
    ) -> Result<Self, ClientError> {
        Self::for_address_book_source(
            Arc::new(StaticAddressBook::new(book)),
            Arc::new(TransportConnector::default()),
            ledger_id,
            DEFAULT_TIMING.network_update_period(),
        )
        .await
    }

    /// `mainnet`, `testnet`, `previewnet` (embedded address books) or
    /// `local`/`localhost` (a single plaintext node on 127.0.0.1).
    pub async fn for_name(name: &str) -> Result<Self, ClientError> {
        match name {
            "local" | "localhost" => {
                let mut network = HashMap::new();
                network.insert("127.0.0.1:50211".to_string(), AccountId::new(0, 0, 3));
                Self::for_network(network).await
            }
            other => {
                let network: KnownNetwork = other.parse()?;
                let book = AddressBook::embedded(network)?;
                Self::for_address_book(book, Some(LedgerId::for_network(network))).await
            }
        }
    }

    pub async fn from_config(cfg: &ClientConfig) -> Result<Self, ClientError> {
        Self::from_config_with_connector(cfg, Arc::new(TransportConnector::default())).await
    }

    pub async fn from_config_with_connector(
        cfg: &ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let mut client = if cfg.network.nodes.is_empty() {
            let network: KnownNetwork = cfg.network.name.parse()?;
            let book = AddressBook::embedded(network)?;
            Self::for_address_book_source(
                Arc::new(StaticAddressBook::new(book)),
                connector,
                Some(LedgerId::for_network(network)),
                Duration::from_secs(cfg.network.update_period_secs),
            )
            .await?
        } else {
            let mut network = HashMap::with_capacity(cfg.network.nodes.len());
            for (address, account_id) in &cfg.network.nodes {
                network.insert(address.clone(), account_id.parse::<AccountId>()?);
            }
            Self::for_network_with_connector(network, connector).await?
        };

        let retry = &cfg.retry;
        client.set_max_attempts(retry.max_attempts)?;
        client.set_backoff_bounds(
            Duration::from_millis(retry.min_backoff_ms),
            Duration::from_millis(retry.max_backoff_ms),
        )?;
        client.set_grpc_deadline(Duration::from_millis(retry.grpc_deadline_ms));
        client.set_request_timeout(Duration::from_millis(retry.request_timeout_ms));
        client.set_default_regenerate_transaction_id(retry.regenerate_transaction_ids);

        let node = &cfg.node;
        client
            .set_node_backoff_bounds(
                Duration::from_millis(node.min_backoff_ms),
                Duration::from_millis(node.max_backoff_ms),
            )
            .await?;
        client
            .set_node_readmit_bounds(
                Duration::from_millis(node.min_readmit_ms),
                Duration::from_millis(node.max_readmit_ms),
            )
            .await?;

        client.set_transport_security(cfg.network.transport_security).await?;
        client.set_verify_certificate(cfg.network.verify_certificates).await;
        if let Some(max) = cfg.network.max_nodes_per_transaction {
            client.set_max_nodes_per_transaction(max).await;
        }

        if let Some(account_id) = &cfg.operator.account_id {
            let account_id: AccountId = account_id.parse()?;
            let key_path = expand_tilde(&cfg.operator.key_file);
            let signer = Ed25519Signer::from_file(&key_path)?;
            client.set_operator(account_id, Arc::new(signer));
        }

        Ok(client)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    pub async fn execute<E: Executable>(&self, request: &mut E) -> Result<E::Output, ClientError> {
        execute::execute(self, request).await
    }

    /// Round-trip a ping pinned to `node`.
    pub async fn ping(&self, node: AccountId) -> Result<(), ClientError> {
        self.execute(&mut Ping::new(node)).await
    }

    /// Ping every peer in turn. Failures are reported, not raised.
    pub async fn ping_all(&self) -> Vec<(AccountId, Result<(), ClientError>)> {
        let nodes: BTreeSet<AccountId> = self.network().await.into_values().collect();
        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            let result = self.ping(node).await;
            if let Err(e) = &result {
                tracing::debug!(peer = %node, error = %e, "client: ping failed");
            }
            results.push((node, result));
        }
        results
    }

    /// Stop the refresher and close every healthy peer's channel.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.cancel_scheduled_network_update();
        self.pool.close().await?;
        Ok(())
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    // ========================================================================
    // Operator
    // ========================================================================

    pub fn set_operator(&mut self, account_id: AccountId, signer: Arc<dyn Signer>) {
        self.operator = Some(Arc::new(Operator::new(account_id, signer)));
    }

    pub fn operator(&self) -> Option<Arc<Operator>> {
        self.operator.clone()
    }

    pub fn operator_account_id(&self) -> Option<AccountId> {
        self.operator.as_ref().map(|op| op.account_id())
    }

    // ========================================================================
    // Retry settings
    // ========================================================================

    pub fn set_max_attempts(&mut self, max_attempts: u32) -> Result<(), ClientError> {
        if max_attempts == 0 {
            return Err(ClientError::Config {
                name: "max attempts",
                reason: "must be at least 1".into(),
            });
        }
        self.settings.max_attempts = max_attempts;
        Ok(())
    }

    pub fn set_min_backoff(&mut self, min: Duration) -> Result<(), ClientError> {
        if min > self.settings.max_backoff {
            return Err(ClientError::Config {
                name: "min backoff",
                reason: format!("{min:?} exceeds max backoff {:?}", self.settings.max_backoff),
            });
        }
        self.settings.min_backoff = min;
        Ok(())
    }

    pub fn set_max_backoff(&mut self, max: Duration) -> Result<(), ClientError> {
        if max < self.settings.min_backoff {
            return Err(ClientError::Config {
                name: "max backoff",
                reason: format!("{max:?} is below min backoff {:?}", self.settings.min_backoff),
            });
        }
        self.settings.max_backoff = max;
        Ok(())
    }

    /// Set both request backoff bounds, in whichever order keeps them valid.
    pub fn set_backoff_bounds(&mut self, min: Duration, max: Duration) -> Result<(), ClientError> {
        if min > max {
            return Err(ClientError::Config {
                name: "backoff bounds",
                reason: format!("min {min:?} exceeds max {max:?}"),
            });
        }
        if min > self.settings.max_backoff {
            self.set_max_backoff(max)?;
            self.set_min_backoff(min)
        } else {
            self.set_min_backoff(min)?;
            self.set_max_backoff(max)
        }
    }

    pub fn set_grpc_deadline(&mut self, deadline: Duration) {
        self.settings.grpc_deadline = deadline;
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.settings.request_timeout = timeout;
    }

    pub fn set_default_regenerate_transaction_id(&mut self, regenerate: bool) {
        self.settings.regenerate_transaction_id = regenerate;
    }

    // ========================================================================
    // Node pool settings
    // ========================================================================

    pub async fn set_node_min_backoff(&self, min: Duration) -> Result<(), ClientError> {
        Ok(self.pool.set_min_backoff(min).await?)
    }

    pub async fn set_node_max_backoff(&self, max: Duration) -> Result<(), ClientError> {
        Ok(self.pool.set_max_backoff(max).await?)
    }

    pub async fn set_node_backoff_bounds(&self, min: Duration, max: Duration) -> Result<(), ClientError> {
        if min > max {
            return Err(ClientError::Config {
                name: "node backoff bounds",
                reason: format!("min {min:?} exceeds max {max:?}"),
            });
        }
        if min > self.pool.max_backoff().await {
            self.set_node_max_backoff(max).await?;
            self.set_node_min_backoff(min).await
        } else {
            self.set_node_min_backoff(min).await?;
            self.set_node_max_backoff(max).await
        }
    }

    pub async fn set_min_node_readmit_period(&self, min: Duration) -> Result<(), ClientError> {
        Ok(self.pool.set_min_readmit_period(min).await?)
    }

    pub async fn set_max_node_readmit_period(&self, max: Duration) -> Result<(), ClientError> {
        Ok(self.pool.set_max_readmit_period(max).await?)
    }

    pub async fn set_node_readmit_bounds(&self, min: Duration, max: Duration) -> Result<(), ClientError> {
        if min > max {
            return Err(ClientError::Config {
                name: "node readmit bounds",
                reason: format!("min {min:?} exceeds max {max:?}"),
            });
        }
        if min > self.pool.max_readmit_period().await {
            self.set_max_node_readmit_period(max).await?;
            self.set_min_node_readmit_period(min).await
        } else {
            self.set_min_node_readmit_period(min).await?;
            self.set_max_node_readmit_period(max).await
        }
    }

    pub async fn set_max_nodes_per_transaction(&self, max: usize) {
        self.pool.set_max_nodes_per_transaction(max).await;
    }

    pub async fn node_count_for_transaction(&self) -> usize {
        self.pool.node_count_for_transaction().await
    }

    pub async fn set_transport_security(&self, enabled: bool) -> Result<(), ClientError> {
        Ok(self.pool.set_transport_security(enabled).await?)
    }

    pub async fn transport_security(&self) -> bool {
        self.pool.transport_security().await
    }

    pub async fn set_verify_certificate(&self, verify: bool) {
        self.pool.set_verify_certificate(verify).await;
    }

    pub async fn verify_certificate(&self) -> bool {
        self.pool.verify_certificate().await
    }

    pub async fn set_ledger_id(&self, ledger_id: LedgerId) {
        self.pool.set_ledger_id(ledger_id).await;
    }

    pub async fn ledger_id(&self) -> Option<LedgerId> {
        self.pool.ledger_id().await
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub async fn set_network(
        &self,
        network: HashMap<String, AccountId>,
    ) -> Result<MembershipDiff, ClientError> {
        Ok(self.pool.set_network(&network).await?)
    }

    pub async fn set_network_from_address_book(&self, book: &AddressBook) -> MembershipDiff {
        self.pool.set_network_from_address_book(book).await
    }

    pub async fn network(&self) -> HashMap<String, AccountId> {
        self.pool.network().await
    }

    /// Restart the periodic refresh with `period`. Zero disables it.
    pub fn set_network_update_period(&self, period: Duration) {
        match &self.refresher {
            Some(refresher) => refresher.schedule(period),
            None => tracing::warn!("client: static network has no address book to refresh"),
        }
    }

    pub fn network_update_period(&self) -> Option<Duration> {
        self.refresher.as_ref().map(|r| r.period())
    }

    pub fn cancel_scheduled_network_update(&self) {
        if let Some(refresher) = &self.refresher {
            refresher.cancel();
        }
    }

    /// Fire-and-forget address book refresh.
    pub fn trigger_address_book_update(&self) {
        if let Some(refresher) = &self.refresher {
            refresher.trigger();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel_scheduled_network_update();
    }
}

/// Non-empty, and every account in one shard and realm.
fn validate_network(network: &HashMap<String, AccountId>) -> Result<(), ClientError> {
    let mut ids = network.values();
    let Some(first) = ids.next() else {
        return Err(ClientError::InvalidNetwork("network is empty".into()));
    };
    if let Some(other) = ids.find(|id| id.shard != first.shard || id.realm != first.realm) {
        return Err(ClientError::InvalidNetwork(format!(
            "nodes span shard/realm {}.{} and {}.{}",
            first.shard, first.realm, other.shard, other.realm
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerlink_network::{BoxFuture, Channel, ConnectTarget, NetworkError};
    use ledgerlink_protocol::RpcStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn connect(
            &self,
            _target: ConnectTarget,
        ) -> BoxFuture<'_, Result<Arc<dyn Channel>, RpcStatus>> {
            Box::pin(async { Err(RpcStatus::unavailable("refused")) })
        }
    }

    struct CountingSource {
        book: AddressBook,
        fetches: Arc<AtomicUsize>,
    }

    impl AddressBookSource for CountingSource {
        fn fetch(&self, _ledger_id: Option<LedgerId>) -> BoxFuture<'_, Result<AddressBook, NetworkError>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                Ok(self.book.clone())
            })
        }
    }

    fn network(ids: &[AccountId]) -> HashMap<String, AccountId> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (format!("127.0.0.{}:50211", i + 1), *id))
            .collect()
    }

    async fn client() -> Client {
        Client::for_network_with_connector(
            network(&[AccountId::new(0, 0, 3), AccountId::new(0, 0, 4)]),
            Arc::new(RefusingConnector),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_network_rejected() {
        let err = Client::for_network_with_connector(HashMap::new(), Arc::new(RefusingConnector))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::InvalidNetwork(_)));
    }

    #[tokio::test]
    async fn test_mixed_shard_rejected() {
        let err = Client::for_network_with_connector(
            network(&[AccountId::new(0, 0, 3), AccountId::new(1, 0, 4)]),
            Arc::new(RefusingConnector),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::InvalidNetwork(_)));
    }

    #[tokio::test]
    async fn test_backoff_cross_validation() {
        let mut client = client().await;
        assert!(client.set_min_backoff(Duration::from_secs(60)).is_err());
        assert!(client.set_max_backoff(Duration::from_millis(1)).is_err());

        client
            .set_backoff_bounds(Duration::from_secs(20), Duration::from_secs(40))
            .unwrap();
        assert_eq!(client.settings().min_backoff, Duration::from_secs(20));
        assert_eq!(client.settings().max_backoff, Duration::from_secs(40));
        assert!(client.set_max_attempts(0).is_err());
    }

    #[tokio::test]
    async fn test_node_bounds_applied_in_valid_order() {
        let client = client().await;
        // Both above the current node max of 1h
        client
            .set_node_backoff_bounds(Duration::from_secs(7200), Duration::from_secs(9000))
            .await
            .unwrap();
        assert_eq!(client.pool().min_backoff().await, Duration::from_secs(7200));
        assert_eq!(client.pool().max_backoff().await, Duration::from_secs(9000));
    }

    #[tokio::test]
    async fn test_node_bounds_rejected_without_partial_update() {
        let client = client().await;
        let err = client
            .set_node_backoff_bounds(Duration::from_secs(7200), Duration::from_secs(5400))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config { .. }));
        assert_eq!(client.pool().max_backoff().await, DEFAULT_TIMING.node_max_backoff());
        assert_eq!(client.pool().min_backoff().await, DEFAULT_TIMING.node_min_backoff());

        let readmit_max = client.pool().max_readmit_period().await;
        assert!(client
            .set_node_readmit_bounds(readmit_max * 3, readmit_max * 2)
            .await
            .is_err());
        assert_eq!(client.pool().max_readmit_period().await, readmit_max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_client_stops_refreshing() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            book: AddressBook::embedded(KnownNetwork::Testnet).unwrap(),
            fetches: fetches.clone(),
        };
        let client = Client::for_address_book_source(
            Arc::new(source),
            Arc::new(RefusingConnector),
            None,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        drop(client);
        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_static_network_has_no_refresher() {
        let client = client().await;
        assert_eq!(client.network_update_period(), None);
        client.set_network_update_period(Duration::from_secs(1));
        client.trigger_address_book_update();
        assert_eq!(client.network().await.len(), 2);
    }

    #[tokio::test]
    async fn test_for_name_rejects_unknown() {
        assert!(matches!(
            Client::for_name("devnet").await.err().unwrap(),
            ClientError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn test_address_book_source_eager_refresh() {
        let book = AddressBook::embedded(KnownNetwork::Testnet).unwrap();
        let expected = book.len();
        let client = Client::for_address_book_source(
            Arc::new(StaticAddressBook::new(book)),
            Arc::new(RefusingConnector),
            Some(LedgerId::testnet()),
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(client.network().await.len(), expected);
        assert_eq!(client.ledger_id().await, Some(LedgerId::testnet()));
        assert_eq!(client.network_update_period(), Some(Duration::ZERO));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_address_book_rejected() {
        let err = Client::for_address_book_source(
            Arc::new(StaticAddressBook::new(AddressBook::default())),
            Arc::new(RefusingConnector),
            None,
            Duration::from_secs(60),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::InvalidNetwork(_)));
    }

    #[tokio::test]
    async fn test_from_config_static_nodes() {
        let mut cfg = ClientConfig::default();
        cfg.network.nodes.insert("127.0.0.1:50211".into(), "0.0.3".into());
        cfg.network.max_nodes_per_transaction = Some(1);
        cfg.retry.max_attempts = 3;
        cfg.node.min_readmit_ms = 500;

        let client = Client::from_config_with_connector(&cfg, Arc::new(RefusingConnector))
            .await
            .unwrap();
        assert_eq!(client.settings().max_attempts, 3);
        assert_eq!(client.pool().min_readmit_period().await, Duration::from_millis(500));
        assert_eq!(client.node_count_for_transaction().await, 1);
        assert!(client.operator().is_none());
    }

    #[tokio::test]
    async fn test_from_config_loads_operator_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("operator.key");
        let signer = Ed25519Signer::load_or_create(&key_path).unwrap();

        let mut cfg = ClientConfig::default();
        cfg.network.nodes.insert("127.0.0.1:50211".into(), "0.0.3".into());
        cfg.operator.account_id = Some("0.0.1001".into());
        cfg.operator.key_file = key_path.to_string_lossy().into_owned();

        let client = Client::from_config_with_connector(&cfg, Arc::new(RefusingConnector))
            .await
            .unwrap();
        let operator = client.operator().unwrap();
        assert_eq!(operator.account_id(), AccountId::new(0, 0, 1001));
        assert_eq!(operator.public_key(), signer.public_key());
    }
}
