//! Request execution against live plaintext nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ledgerlink_client::operator::{PUBLIC_KEY_HEADER, SIGNATURE_HEADER};
use ledgerlink_client::requests::{CHUNK_HEADER, PING_METHOD, TRANSACTION_ID_HEADER};
use ledgerlink_client::{ClientError, Executable, RawQuery, RawTransaction};
use ledgerlink_crypto::{Ed25519Signer, PublicKey};
use ledgerlink_protocol::{AccountId, PrecheckStatus, RpcRequest, RpcResponse, USER_AGENT_HEADER};

use crate::harness::{answer, dead_address, tcp_client, TestNode};

fn id(num: u64) -> AccountId {
    AccountId::new(0, 0, num)
}

#[tokio::test]
async fn test_ping_over_tcp() {
    let node = TestNode::tcp(id(3), answer(PrecheckStatus::Ok)).await;
    let client = tcp_client(HashMap::from([node.network_entry()])).await;

    client.ping(id(3)).await.unwrap();

    let received = node.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].method, PING_METHOD);
    assert!(received[0].metadata.contains_key(USER_AGENT_HEADER));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_busy_node_retried_until_ok() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let node = TestNode::tcp(
        id(3),
        Arc::new(move |_req: &RpcRequest| {
            let precheck = if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                PrecheckStatus::Busy
            } else {
                PrecheckStatus::Ok
            };
            RpcResponse::new(precheck, b"balance".to_vec())
        }),
    )
    .await;
    let client = tcp_client(HashMap::from([node.network_entry()])).await;

    let response = client
        .execute(&mut RawQuery::new("crypto/get_account_balance", vec![1]))
        .await
        .unwrap();
    assert_eq!(response.node, id(3));
    assert_eq!(response.payload, b"balance");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreachable_pinned_node_fails_over() {
    let live = TestNode::tcp(id(4), answer(PrecheckStatus::Ok)).await;
    let dead = dead_address().await;
    let client = tcp_client(HashMap::from([
        (dead.to_string(), id(3)),
        live.network_entry(),
    ]))
    .await;

    let mut query = RawQuery::new("crypto/get_account_balance", vec![]);
    query
        .options_mut()
        .set_node_account_ids(vec![id(3), id(4)])
        .unwrap();
    let response = client.execute(&mut query).await.unwrap();
    assert_eq!(response.node, id(4));
    assert_eq!(live.request_count(), 1);
}

#[tokio::test]
async fn test_invalid_node_account_moves_to_next_node() {
    let stale = TestNode::tcp(id(3), answer(PrecheckStatus::InvalidNodeAccount)).await;
    let good = TestNode::tcp(id(4), answer(PrecheckStatus::Ok)).await;
    let client = tcp_client(HashMap::from([stale.network_entry(), good.network_entry()])).await;

    let mut query = RawQuery::new("crypto/get_account_balance", vec![]);
    query
        .options_mut()
        .set_node_account_ids(vec![id(3), id(4)])
        .unwrap();
    let response = client.execute(&mut query).await.unwrap();
    assert_eq!(response.node, id(4));
    assert_eq!(stale.request_count(), 1);
}

#[tokio::test]
async fn test_ping_all_reports_every_node() {
    let live = TestNode::tcp(id(3), answer(PrecheckStatus::Ok)).await;
    let dead = dead_address().await;
    let mut client = tcp_client(HashMap::from([
        live.network_entry(),
        (dead.to_string(), id(4)),
    ]))
    .await;
    client.set_max_attempts(2).unwrap();

    let results = client.ping_all().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, id(3));
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].0, id(4));
    let err = results[1].1.as_ref().unwrap_err();
    assert!(matches!(err.root(), ClientError::Transport(_)));
}

#[tokio::test]
async fn test_operator_signature_verifies_on_node() {
    let node = TestNode::tcp(
        id(3),
        Arc::new(|req: &RpcRequest| {
            let verified = (|| {
                let key = hex::decode(req.metadata.get(PUBLIC_KEY_HEADER)?).ok()?;
                let sig = hex::decode(req.metadata.get(SIGNATURE_HEADER)?).ok()?;
                PublicKey::from_bytes(key)
                    .verify_ed25519(&req.payload, &sig)
                    .ok()
            })();
            let precheck = match verified {
                Some(()) => PrecheckStatus::Ok,
                None => PrecheckStatus::InvalidSignature,
            };
            RpcResponse::new(precheck, Vec::new())
        }),
    )
    .await;
    let mut client = tcp_client(HashMap::from([node.network_entry()])).await;

    let unsigned = client
        .execute(&mut RawQuery::new("crypto/get_account_info", b"who".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(
        unsigned,
        ClientError::Precheck { status: PrecheckStatus::InvalidSignature, .. }
    ));

    client.set_operator(id(1001), Arc::new(Ed25519Signer::generate().unwrap()));
    client
        .execute(&mut RawQuery::new("crypto/get_account_info", b"who".to_vec()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_chunked_transaction_sends_every_chunk() {
    let node = TestNode::tcp(id(3), answer(PrecheckStatus::Ok)).await;
    let mut client = tcp_client(HashMap::from([node.network_entry()])).await;
    client.set_operator(id(1001), Arc::new(Ed25519Signer::generate().unwrap()));

    let mut tx = RawTransaction::new("file/append", b"0123456789".to_vec());
    tx.set_chunk_size(4).unwrap();
    let responses = tx.execute_all(&client).await.unwrap();
    assert_eq!(responses.len(), 3);

    let received = node.received();
    let chunks: Vec<&str> = received.iter().map(|r| r.metadata[CHUNK_HEADER].as_str()).collect();
    assert_eq!(chunks, vec!["1/3", "2/3", "3/3"]);
    let payloads: Vec<&[u8]> = received.iter().map(|r| r.payload.as_slice()).collect();
    assert_eq!(payloads, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);

    for (req, resp) in received.iter().zip(&responses) {
        assert_eq!(req.metadata[TRANSACTION_ID_HEADER], resp.transaction_id.to_string());
        assert_eq!(resp.transaction_id.account_id, id(1001));
    }
}
