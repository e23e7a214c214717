//! Transport -- dialing peers and issuing unary calls.
//!
//! Secure addresses (TLS ports) are reached over QUIC with a pinned
//! certificate verifier; each call uses its own bidirectional stream.
//! Plaintext addresses use TCP, one stream per in-flight call.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ledgerlink_protocol::tls::{self, PinnedCertVerifier};
use ledgerlink_protocol::{
    Frame, FrameCodec, PeerAddress, ProtocolError, RpcRequest, RpcResponse, RpcStatus,
    MAX_FRAME_BYTES, USER_AGENT_HEADER,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An established connection to one peer.
pub trait Channel: Send + Sync {
    /// Issue one unary call, bounded by `deadline`.
    fn call(
        &self,
        request: RpcRequest,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<RpcResponse, RpcStatus>>;

    fn close(&self) -> BoxFuture<'_, Result<(), RpcStatus>>;
}

/// What a connector needs to know to reach a peer.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub address: PeerAddress,
    pub cert_hash: Option<String>,
    pub verify_certificate: bool,
}

/// Dials peers. One connector is shared by every peer in a pool.
pub trait Connector: Send + Sync {
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'_, Result<Arc<dyn Channel>, RpcStatus>>;
}

// ============================================================================
// Frame helpers -- read/write a single Frame on any byte stream
// ============================================================================

pub async fn read_frame<R: AsyncRead + Unpin>(recv: &mut R) -> Result<Frame, ProtocolError> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut buf = Vec::with_capacity(len_buf.len() + len);
    buf.extend_from_slice(&len_buf);
    buf.resize(len_buf.len() + len, 0);
    recv.read_exact(&mut buf[len_buf.len()..]).await?;
    FrameCodec::decode_frame(&buf)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    send: &mut W,
    frame: &Frame,
) -> Result<(), ProtocolError> {
    let buf = FrameCodec::encode_frame(frame)?;
    send.write_all(&buf).await?;
    send.flush().await?;
    Ok(())
}

fn protocol_status(err: ProtocolError) -> RpcStatus {
    match err {
        ProtocolError::Io(e) => RpcStatus::unavailable(e.to_string()),
        other => RpcStatus::internal(other.to_string()),
    }
}

fn into_response(frame: Frame) -> Result<RpcResponse, RpcStatus> {
    match frame {
        Frame::Response(resp) => Ok(resp),
        Frame::Status(status) => Err(status),
        Frame::Request(_) => Err(RpcStatus::internal("peer answered with a request frame")),
    }
}

fn stamp_user_agent(mut request: RpcRequest, user_agent: &str) -> RpcRequest {
    request
        .metadata
        .insert(USER_AGENT_HEADER.to_string(), user_agent.to_string());
    request
}

// ============================================================================
// QUIC channel (secure peers)
// ============================================================================

pub struct QuicChannel {
    conn: quinn::Connection,
    user_agent: String,
}

impl QuicChannel {
    async fn exchange(&self, request: RpcRequest) -> Result<RpcResponse, RpcStatus> {
        let (mut send, mut recv) = self
            .conn
            .open_bi()
            .await
            .map_err(|e| RpcStatus::unavailable(e.to_string()))?;

        let request = stamp_user_agent(request, &self.user_agent);
        write_frame(&mut send, &Frame::Request(request))
            .await
            .map_err(protocol_status)?;
        send.finish()
            .map_err(|e| RpcStatus::unavailable(e.to_string()))?;

        let frame = read_frame(&mut recv).await.map_err(protocol_status)?;
        into_response(frame)
    }
}

impl Channel for QuicChannel {
    fn call(
        &self,
        request: RpcRequest,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<RpcResponse, RpcStatus>> {
        Box::pin(async move {
            match tokio::time::timeout(deadline, self.exchange(request)).await {
                Ok(result) => result,
                Err(_) => Err(RpcStatus::deadline_exceeded(format!(
                    "no response within {deadline:?}"
                ))),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), RpcStatus>> {
        Box::pin(async move {
            self.conn.close(quinn::VarInt::from_u32(0), b"closed");
            Ok(())
        })
    }
}

// ============================================================================
// TCP channel (plaintext peers)
// ============================================================================

/// Idle streams kept per plaintext peer.
const MAX_IDLE_TCP_STREAMS: usize = 4;

/// Plaintext calls, one stream per in-flight call. A stream goes back to the
/// idle set only after a complete exchange; a failed or timed out call drops it.
pub struct TcpChannel {
    remote: SocketAddr,
    idle: std::sync::Mutex<Vec<TcpStream>>,
    user_agent: String,
}

impl TcpChannel {
    fn new(remote: SocketAddr, stream: TcpStream, user_agent: String) -> Self {
        Self {
            remote,
            idle: std::sync::Mutex::new(vec![stream]),
            user_agent,
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<TcpStream>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn checkin(&self, stream: TcpStream) {
        let mut idle = self.idle();
        if idle.len() < MAX_IDLE_TCP_STREAMS {
            idle.push(stream);
        }
    }

    async fn exchange(&self, request: RpcRequest) -> Result<Frame, ProtocolError> {
        let idle = self.idle().pop();
        let mut stream = match idle {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(self.remote).await?;
                stream.set_nodelay(true)?;
                stream
            }
        };
        write_frame(&mut stream, &Frame::Request(request)).await?;
        let frame = read_frame(&mut stream).await?;
        self.checkin(stream);
        Ok(frame)
    }
}

impl Channel for TcpChannel {
    fn call(
        &self,
        request: RpcRequest,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<RpcResponse, RpcStatus>> {
        Box::pin(async move {
            let request = stamp_user_agent(request, &self.user_agent);
            match tokio::time::timeout(deadline, self.exchange(request)).await {
                Ok(Ok(frame)) => into_response(frame),
                Ok(Err(e)) => Err(protocol_status(e)),
                Err(_) => Err(RpcStatus::deadline_exceeded(format!(
                    "no response within {deadline:?}"
                ))),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), RpcStatus>> {
        Box::pin(async move {
            let streams = std::mem::take(&mut *self.idle());
            for mut stream in streams {
                stream
                    .shutdown()
                    .await
                    .map_err(|e| RpcStatus::unavailable(e.to_string()))?;
            }
            Ok(())
        })
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Dials QUIC for secure addresses and TCP for plaintext ones.
pub struct TransportConnector {
    dial_timeout: Duration,
    endpoint_v4: OnceCell<quinn::Endpoint>,
    endpoint_v6: OnceCell<quinn::Endpoint>,
}

impl TransportConnector {
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            endpoint_v4: OnceCell::new(),
            endpoint_v6: OnceCell::new(),
        }
    }

    /// Client endpoint matching the remote address family, bound on first use.
    async fn endpoint(&self, remote: &SocketAddr) -> Result<quinn::Endpoint, RpcStatus> {
        let (cell, bind) = if remote.is_ipv4() {
            (
                &self.endpoint_v4,
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            )
        } else {
            (
                &self.endpoint_v6,
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            )
        };

        cell.get_or_try_init(|| async move { quinn::Endpoint::client(bind) })
            .await
            .cloned()
            .map_err(|e| RpcStatus::unavailable(format!("quic endpoint: {e}")))
    }

    async fn resolve(address: &PeerAddress) -> Result<SocketAddr, RpcStatus> {
        tokio::net::lookup_host((address.host.as_str(), address.port))
            .await
            .map_err(|e| RpcStatus::unavailable(format!("resolve {address}: {e}")))?
            .next()
            .ok_or_else(|| RpcStatus::unavailable(format!("resolve {address}: no addresses")))
    }

    async fn dial(&self, target: &ConnectTarget) -> Result<Arc<dyn Channel>, RpcStatus> {
        let remote = Self::resolve(&target.address).await?;
        let user_agent = ledgerlink_protocol::user_agent();

        if target.address.is_transport_security() {
            let verifier =
                PinnedCertVerifier::new(target.cert_hash.clone(), target.verify_certificate);
            let config = tls::build_client_config(verifier)
                .map_err(|e| RpcStatus::internal(format!("tls config: {e}")))?;
            let endpoint = self.endpoint(&remote).await?;

            let conn = endpoint
                .connect_with(config, remote, &target.address.host)
                .map_err(|e| RpcStatus::unavailable(format!("dial {}: {e}", target.address)))?
                .await
                .map_err(|e| RpcStatus::unavailable(format!("handshake {}: {e}", target.address)))?;

            tracing::debug!(address = %target.address, %remote, "transport: quic channel open");
            Ok(Arc::new(QuicChannel { conn, user_agent }))
        } else {
            let stream = TcpStream::connect(remote)
                .await
                .map_err(|e| RpcStatus::unavailable(format!("dial {}: {e}", target.address)))?;
            stream
                .set_nodelay(true)
                .map_err(|e| RpcStatus::unavailable(e.to_string()))?;

            tracing::debug!(address = %target.address, %remote, "transport: tcp channel open");
            Ok(Arc::new(TcpChannel::new(remote, stream, user_agent)))
        }
    }
}

impl Default for TransportConnector {
    fn default() -> Self {
        Self::new(ledgerlink_protocol::DEFAULT_TIMING.dial_timeout())
    }
}

impl Connector for TransportConnector {
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'_, Result<Arc<dyn Channel>, RpcStatus>> {
        Box::pin(async move {
            match tokio::time::timeout(self.dial_timeout, self.dial(&target)).await {
                Ok(result) => result,
                Err(_) => Err(RpcStatus::deadline_exceeded(format!(
                    "dial {} timed out after {:?}",
                    target.address, self.dial_timeout
                ))),
            }
        })
    }
}
