//! RSA signing key management for the LTI 1.3 security framework.
//!
//! Generates, persists, and retrieves the tool's RSA keypairs and produces
//! the public JWKS document platforms use to verify the tool's signatures.

use base64::prelude::*;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{SigningError, StorageError};
use crate::lti::types::{JwkSetDocument, PublicJwk, SigningKeyPair};
use crate::storage::traits::SigningKeyStore;

const RSA_KEY_BITS: usize = 2048;
const SIGNING_ALGORITHM: &str = "RS256";

/// Service managing the tool's asymmetric signing keys
#[derive(Clone)]
pub struct KeyService {
    store: Arc<dyn SigningKeyStore + Send + Sync>,
}

impl KeyService {
    pub fn new(store: Arc<dyn SigningKeyStore + Send + Sync>) -> Self {
        Self { store }
    }

    /// Generate a 2048-bit RSA keypair tagged for signature use, persist both
    /// halves, and return the fresh `kid`.
    pub async fn generate_key_pair(&self) -> Result<String, SigningError> {
        let kid = Uuid::new_v4().to_string();

        let private_key =
            RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|e| SigningError::KeyMaterial {
                kid: kid.clone(),
                reason: format!("RSA generation failed: {}", e),
            })?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::KeyMaterial {
                kid: kid.clone(),
                reason: format!("PKCS#8 export failed: {}", e),
            })?
            .to_string();

        let public_jwk = PublicJwk {
            kty: "RSA".to_string(),
            alg: SIGNING_ALGORITHM.to_string(),
            key_use: "sig".to_string(),
            kid: kid.clone(),
            n: BASE64_URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: BASE64_URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        };

        let pair = SigningKeyPair {
            kid: kid.clone(),
            algorithm: SIGNING_ALGORITHM.to_string(),
            private_key_pem,
            public_jwk,
        };
        self.store.store_key_pair(&pair).await?;

        tracing::debug!(kid = %kid, "generated signing key pair");
        Ok(kid)
    }

    /// Retrieve a keypair by exact `kid` match.
    ///
    /// `None` is a normal recoverable branch; callers that require the key to
    /// exist convert it to [`SigningError::KeyNotFound`].
    pub async fn private_key(&self, kid: &str) -> Result<Option<SigningKeyPair>, StorageError> {
        self.store.get_key_pair(kid).await
    }

    /// All public keys in JWKS shape, stable order across repeated calls
    pub async fn public_jwks(&self) -> Result<JwkSetDocument, StorageError> {
        let keys = self.store.list_public_keys().await?;
        Ok(JwkSetDocument { keys })
    }
}
