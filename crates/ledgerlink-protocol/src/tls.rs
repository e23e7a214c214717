//! TLS configuration and certificate pinning for secure peers.
//!
//! Secure peers are reached over QUIC. Trust comes from the address book, not
//! from a CA: the presented certificate is PEM-encoded, hashed with SHA-384 and
//! compared against the peer's pinned hash.
//! ALPN protocol: "ledgerlink/1".

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha384};

use crate::DEFAULT_TIMING;

/// ALPN protocol identifier.
pub const ALPN_LEDGERLINK: &[u8] = b"ledgerlink/1";

const PEM_LINE_WIDTH: usize = 64;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lowercase hex SHA-384 of the PEM encoding of a DER certificate.
pub fn certificate_hash(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / PEM_LINE_WIDTH + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII
        pem.push_str(std::str::from_utf8(line).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");

    hex::encode(Sha384::digest(pem.as_bytes()))
}

// ============================================================================
// Verifier
// ============================================================================

/// Server certificate verifier pinned to one address book hash.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    cert_hash: Option<String>,
    verify: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedCertVerifier {
    pub fn new(cert_hash: Option<String>, verify: bool) -> Self {
        Self {
            cert_hash,
            verify,
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }

    fn matches(&self, expected: &str, cert: &CertificateDer<'_>) -> bool {
        certificate_hash(cert.as_ref()).eq_ignore_ascii_case(expected.trim())
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let Some(expected) = self.cert_hash.as_deref() else {
            tracing::warn!("tls: no pinned certificate hash for peer, skipping verification");
            return Ok(ServerCertVerified::assertion());
        };

        if !self.verify {
            return Ok(ServerCertVerified::assertion());
        }

        let presented = std::iter::once(end_entity).chain(intermediates.iter());
        for cert in presented {
            if self.matches(expected, cert) {
                return Ok(ServerCertVerified::assertion());
            }
        }

        tracing::warn!(expected, "tls: presented certificate does not match pinned hash");
        Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

// ============================================================================
// Config builders
// ============================================================================

fn transport_config() -> Result<quinn::TransportConfig, BoxError> {
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(quinn::IdleTimeout::try_from(Duration::from_secs(
        DEFAULT_TIMING.quic_idle_timeout_secs,
    ))?));
    transport.keep_alive_interval(Some(Duration::from_secs(DEFAULT_TIMING.quic_keepalive_secs)));
    Ok(transport)
}

fn ring_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Generate a self-signed X.509 certificate from an Ed25519 PKCS#8 DER keypair.
///
/// Returns (certificate DER bytes, private key DER bytes).
pub fn generate_self_signed_cert(
    pkcs8_der: &[u8],
    server_names: Vec<String>,
) -> Result<(Vec<u8>, Vec<u8>), BoxError> {
    let pkcs8_key = rustls::pki_types::PrivatePkcs8KeyDer::from(pkcs8_der.to_vec());
    let key_pair = rcgen::KeyPair::from_pkcs8_der_and_sign_algo(&pkcs8_key, &rcgen::PKCS_ED25519)?;

    let mut params = rcgen::CertificateParams::new(server_names)?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "ledgerlink-node");

    let cert = params.self_signed(&key_pair)?;
    Ok((cert.der().to_vec(), pkcs8_der.to_vec()))
}

/// QUIC server config presenting the given certificate. Used by test nodes
/// and local tooling.
pub fn build_server_config(
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
) -> Result<quinn::ServerConfig, BoxError> {
    let cert = CertificateDer::from(cert_der);
    let key = rustls::pki_types::PrivateKeyDer::try_from(key_der)
        .map_err(|e| format!("invalid private key DER: {e}"))?;

    let mut server_crypto = rustls::ServerConfig::builder_with_provider(ring_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;
    server_crypto.alpn_protocols = vec![ALPN_LEDGERLINK.to_vec()];

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)?,
    ));
    server_config.transport_config(Arc::new(transport_config()?));
    Ok(server_config)
}

/// QUIC client config verifying the server against a pinned hash.
pub fn build_client_config(verifier: PinnedCertVerifier) -> Result<quinn::ClientConfig, BoxError> {
    let mut client_crypto = rustls::ClientConfig::builder_with_provider(ring_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    client_crypto.alpn_protocols = vec![ALPN_LEDGERLINK.to_vec()];

    let mut client_config = quinn::ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)?,
    ));
    client_config.transport_config(Arc::new(transport_config()?));
    Ok(client_config)
}
