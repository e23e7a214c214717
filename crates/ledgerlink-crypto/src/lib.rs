//! ledgerlink crypto -- the signing capability consumed by request execution.
//!
//! Execution only needs `sign(bytes) -> bytes` and a comparable public key.
//! `Ed25519Signer` is the stock implementation, backed by ring.

use std::fmt;

pub mod ed25519;

pub use ed25519::Ed25519Signer;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key error: {0}")]
    Key(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw public key bytes, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check an Ed25519 signature made by the holder of this key.
    pub fn verify_ed25519(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, &self.0)
            .verify(message, signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Anything that can sign request bytes on behalf of an operator.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Vec<u8>;
    fn public_key(&self) -> PublicKey;
}
