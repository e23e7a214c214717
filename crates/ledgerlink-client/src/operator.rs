//! Operator -- the paying account and the signer that authorizes its requests.

use std::sync::Arc;

use ledgerlink_crypto::{PublicKey, Signer};
use ledgerlink_protocol::{AccountId, RpcRequest};

pub const OPERATOR_HEADER: &str = "x-operator";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const PUBLIC_KEY_HEADER: &str = "x-public-key";

#[derive(Clone)]
pub struct Operator {
    account_id: AccountId,
    signer: Arc<dyn Signer>,
}

impl Operator {
    pub fn new(account_id: AccountId, signer: Arc<dyn Signer>) -> Self {
        Self { account_id, signer }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signer.sign(message)
    }

    /// Sign `message` and attach operator, signature and public key headers.
    pub fn sign_request(&self, request: RpcRequest, message: &[u8]) -> RpcRequest {
        let signature = self.sign(message);
        request
            .with_metadata(OPERATOR_HEADER, self.account_id.to_string())
            .with_metadata(SIGNATURE_HEADER, hex::encode(signature))
            .with_metadata(PUBLIC_KEY_HEADER, self.public_key().to_string())
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("account_id", &self.account_id)
            .field("public_key", &self.public_key().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerlink_crypto::Ed25519Signer;

    #[test]
    fn test_sign_request_headers_verify() {
        let signer = Arc::new(Ed25519Signer::generate().unwrap());
        let operator = Operator::new(AccountId::new(0, 0, 1001), signer.clone());

        let request = operator.sign_request(RpcRequest::new("crypto/transfer", b"body".to_vec()), b"body");
        assert_eq!(request.metadata.get(OPERATOR_HEADER).unwrap(), "0.0.1001");

        let sig = hex::decode(request.metadata.get(SIGNATURE_HEADER).unwrap()).unwrap();
        assert!(signer.public_key().verify_ed25519(b"body", &sig).is_ok());
        assert_eq!(
            request.metadata.get(PUBLIC_KEY_HEADER).unwrap(),
            &signer.public_key().to_string()
        );
    }
}
