//! Certificate pinning for QUIC peers.
//!
//! Each test binds its own loopback address on the TLS port.

use std::sync::Arc;
use std::time::Duration;

use ledgerlink_client::{Client, ClientError};
use ledgerlink_network::{StaticAddressBook, TransportConnector};
use ledgerlink_protocol::{AccountId, AddressBook, AddressBookEntry, PeerAddress, PrecheckStatus};

use crate::harness::{answer, TestNode};

const NODE: AccountId = AccountId::new(0, 0, 3);

/// Client over one secure node whose address book entry pins `cert_hash`.
async fn secure_client(node: &TestNode, cert_hash: Option<String>) -> Client {
    let book = AddressBook::new(vec![AddressBookEntry {
        peer_key: node.account_id,
        address: PeerAddress::new(node.addr.ip().to_string(), node.addr.port()),
        cert_hash,
    }]);
    let mut client = Client::for_address_book_source(
        Arc::new(StaticAddressBook::new(book)),
        Arc::new(TransportConnector::new(Duration::from_secs(2))),
        None,
        Duration::ZERO,
    )
    .await
    .unwrap();
    client.set_transport_security(true).await.unwrap();
    client.set_max_attempts(2).unwrap();
    client
        .set_backoff_bounds(Duration::from_millis(5), Duration::from_millis(20))
        .unwrap();
    client
}

#[tokio::test]
async fn test_matching_pin_accepted() {
    let node = TestNode::quic(NODE, "127.0.0.2", answer(PrecheckStatus::Ok)).await;
    let client = secure_client(&node, node.cert_hash.clone()).await;

    let peers = client.pool().peers().await;
    assert_eq!(peers[0].address().port, 50212);

    client.ping(NODE).await.unwrap();
    assert_eq!(node.request_count(), 1);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_pin_comparison_ignores_case() {
    let node = TestNode::quic(NODE, "127.0.0.3", answer(PrecheckStatus::Ok)).await;
    let upper = node.cert_hash.as_deref().map(str::to_uppercase);
    let client = secure_client(&node, upper).await;

    client.ping(NODE).await.unwrap();
}

#[tokio::test]
async fn test_mismatched_pin_rejected() {
    let node = TestNode::quic(NODE, "127.0.0.4", answer(PrecheckStatus::Ok)).await;
    let client = secure_client(&node, Some("00".repeat(48))).await;

    let err = client.ping(NODE).await.unwrap_err();
    assert!(matches!(err.root(), ClientError::Transport(_)));
    assert_eq!(node.request_count(), 0);
}

#[tokio::test]
async fn test_verification_disabled_accepts_mismatch() {
    let node = TestNode::quic(NODE, "127.0.0.5", answer(PrecheckStatus::Ok)).await;
    let client = secure_client(&node, Some("00".repeat(48))).await;
    client.set_verify_certificate(false).await;

    client.ping(NODE).await.unwrap();
    assert_eq!(node.request_count(), 1);
}
