//! Test harness for in-process node integration tests.
//!
//! Provides TestNode: a scripted node speaking the ledgerlink frame protocol
//! over plaintext TCP or over QUIC with a self-signed certificate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledgerlink_client::Client;
use ledgerlink_crypto::Ed25519Signer;
use ledgerlink_network::{read_frame, write_frame, TransportConnector};
use ledgerlink_protocol::tls::{build_server_config, certificate_hash, generate_self_signed_cert};
use ledgerlink_protocol::{AccountId, Frame, PrecheckStatus, RpcRequest, RpcResponse};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub type Responder = Arc<dyn Fn(&RpcRequest) -> RpcResponse + Send + Sync>;

/// Always answer `precheck` with an empty payload.
pub fn answer(precheck: PrecheckStatus) -> Responder {
    Arc::new(move |_req: &RpcRequest| RpcResponse::new(precheck.clone(), Vec::new()))
}

/// A running in-process node. Every request it receives is recorded.
pub struct TestNode {
    pub account_id: AccountId,
    pub addr: SocketAddr,
    /// Certificate hash for QUIC nodes.
    pub cert_hash: Option<String>,
    received: Arc<Mutex<Vec<RpcRequest>>>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestNode {
    /// Plaintext node on an ephemeral loopback port.
    pub async fn tcp(account_id: AccountId, responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let responder = responder.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    while let Ok(Frame::Request(req)) = read_frame(&mut stream).await {
                        let resp = responder(&req);
                        log.lock().unwrap().push(req);
                        if write_frame(&mut stream, &Frame::Response(resp)).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            account_id,
            addr,
            cert_hash: None,
            received,
            handle,
        }
    }

    /// QUIC node on `ip` at the TLS port, presenting a fresh self-signed
    /// Ed25519 certificate.
    pub async fn quic(account_id: AccountId, ip: &str, responder: Responder) -> Self {
        let signer = Ed25519Signer::generate().unwrap();
        let (cert_der, key_der) =
            generate_self_signed_cert(signer.pkcs8_der(), vec!["localhost".into()]).unwrap();
        let cert_hash = certificate_hash(&cert_der);
        let server_config = build_server_config(cert_der, key_der).unwrap();

        let addr: SocketAddr = format!("{ip}:50212").parse().unwrap();
        let endpoint = quinn::Endpoint::server(server_config, addr).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let handle = tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let responder = responder.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let Ok(conn) = incoming.await else {
                        return;
                    };
                    while let Ok((mut send, mut recv)) = conn.accept_bi().await {
                        let Ok(Frame::Request(req)) = read_frame(&mut recv).await else {
                            continue;
                        };
                        let resp = responder(&req);
                        log.lock().unwrap().push(req);
                        if write_frame(&mut send, &Frame::Response(resp)).await.is_ok() {
                            let _ = send.finish();
                        }
                    }
                });
            }
        });

        Self {
            account_id,
            addr,
            cert_hash: Some(cert_hash),
            received,
            handle,
        }
    }

    pub fn received(&self) -> Vec<RpcRequest> {
        self.received.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn network_entry(&self) -> (String, AccountId) {
        (self.addr.to_string(), self.account_id)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A loopback address with nothing listening on it.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Client over plaintext nodes with short backoffs.
pub async fn tcp_client(network: HashMap<String, AccountId>) -> Client {
    let mut client = Client::for_network_with_connector(
        network,
        Arc::new(TransportConnector::new(Duration::from_secs(2))),
    )
    .await
    .unwrap();
    client
        .set_backoff_bounds(Duration::from_millis(5), Duration::from_millis(20))
        .unwrap();
    client.set_request_timeout(Duration::from_secs(10));
    client
}
