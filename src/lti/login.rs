//! OIDC third-party initiated login flow, step 1 of an LTI 1.3 launch.
//!
//! `begin_login` issues a one-time state/nonce challenge and builds the
//! platform authorization redirect; `complete_login` consumes the challenge
//! (exactly once, regardless of outcome) and validates the returned ID
//! token. A replayed state or nonce terminates the launch unauthorized.

use base64::prelude::*;
use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use url::Url;

use crate::errors::{LoginError, StorageError, TokenError};
use crate::lti::types::{LoginChallenge, PlatformRegistration};
use crate::lti::validation::{IdTokenClaims, JwtValidator};
use crate::storage::traits::{LoginChallengeStore, PlatformStore};

/// Parameters of an inbound third-party login request
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub iss: String,
    pub login_hint: String,
    pub target_link_uri: String,
    pub lti_message_hint: Option<String>,
}

/// Cryptographically random URL-safe token with 256 bits of entropy
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Read `iss` and the first `aud` entry from an unverified token payload.
///
/// Only used to select the registration to validate against; every claim is
/// re-checked after signature verification.
fn peek_issuer_audience(id_token: &str) -> Result<(String, String), TokenError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::Malformed("Not a compact JWT serialization".to_string()))?;
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("Payload is not base64url: {}", e)))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("Payload is not JSON: {}", e)))?;

    let iss = value
        .get("iss")
        .and_then(|v| v.as_str())
        .ok_or(TokenError::ClaimInvalid {
            claim: "iss",
            reason: "claim absent".to_string(),
        })?
        .to_string();
    let aud = match value.get("aud") {
        Some(serde_json::Value::String(aud)) => aud.clone(),
        Some(serde_json::Value::Array(auds)) => auds
            .first()
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(TokenError::ClaimInvalid {
                claim: "aud",
                reason: "empty audience list".to_string(),
            })?,
        _ => {
            return Err(TokenError::ClaimInvalid {
                claim: "aud",
                reason: "claim absent".to_string(),
            });
        }
    };
    Ok((iss, aud))
}

/// Drives the OIDC login handshake with a platform
#[derive(Clone)]
pub struct OidcLoginFlow {
    platforms: Arc<dyn PlatformStore + Send + Sync>,
    challenges: Arc<dyn LoginChallengeStore>,
    validator: JwtValidator,
}

impl OidcLoginFlow {
    pub fn new(
        platforms: Arc<dyn PlatformStore + Send + Sync>,
        challenges: Arc<dyn LoginChallengeStore>,
        validator: JwtValidator,
    ) -> Self {
        Self {
            platforms,
            challenges,
            validator,
        }
    }

    /// Look up the platform by issuer, store a fresh state/nonce challenge
    /// against the caller's session, and build the authorization redirect.
    pub async fn begin_login(
        &self,
        session_key: &str,
        request: &LoginRequest,
    ) -> Result<Url, LoginError> {
        let platform = self
            .platforms
            .find_by_issuer(&request.iss)
            .await?
            .ok_or_else(|| LoginError::UnknownPlatform(request.iss.clone()))?;

        let challenge = LoginChallenge {
            state: random_token(),
            nonce: random_token(),
            created_at: Utc::now(),
        };
        self.challenges
            .store_challenge(session_key, &challenge)
            .await?;

        let mut redirect = Url::parse(&platform.oidc_auth_url).map_err(|e| {
            LoginError::Storage(StorageError::InvalidData(format!(
                "Registered oidc_auth_url does not parse: {}",
                e
            )))
        })?;
        redirect
            .query_pairs_mut()
            .append_pair("scope", "openid")
            .append_pair("response_type", "id_token")
            .append_pair("client_id", &platform.client_id)
            .append_pair("redirect_uri", &request.target_link_uri)
            .append_pair("login_hint", &request.login_hint)
            .append_pair("state", &challenge.state)
            .append_pair("nonce", &challenge.nonce);
        if let Some(hint) = &request.lti_message_hint {
            redirect.query_pairs_mut().append_pair("lti_message_hint", hint);
        }

        tracing::debug!(issuer = %platform.issuer, client_id = %platform.client_id, "login initiated");
        Ok(redirect)
    }

    /// Validate the return leg of the login: state, signature, claims, nonce.
    ///
    /// The stored challenge is consumed before any other check, so a second
    /// attempt with the same state fails even if this one does.
    pub async fn complete_login(
        &self,
        session_key: &str,
        received_state: Option<&str>,
        id_token: &str,
    ) -> Result<(PlatformRegistration, IdTokenClaims), LoginError> {
        let challenge = self.challenges.take_challenge(session_key).await?;

        let challenge = challenge.ok_or(LoginError::StateMismatch)?;
        match received_state {
            Some(state) if state == challenge.state => {}
            _ => {
                tracing::error!("OIDC state mismatch or missing, treating as CSRF");
                return Err(LoginError::StateMismatch);
            }
        }

        let (iss, client_id) = peek_issuer_audience(id_token).map_err(LoginError::Token)?;
        let platform = self
            .platforms
            .find_by_client_id(&client_id)
            .await?
            .filter(|registration| registration.issuer == iss)
            .ok_or_else(|| LoginError::UnknownPlatform(iss.clone()))?;

        let claims = self.validator.validate(id_token, &platform).await?;

        match claims.nonce.as_deref() {
            Some(nonce) if nonce == challenge.nonce => {}
            _ => {
                tracing::error!(issuer = %platform.issuer, "OIDC nonce mismatch, treating as replay");
                return Err(LoginError::NonceMismatch);
            }
        }

        Ok((platform, claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lti::jwt::JwtIssuer;
    use crate::lti::keys::KeyService;
    use crate::lti::validation::JwksFetcher;
    use crate::storage::inmemory::{MemoryChallengeStore, MemoryToolStorage};
    use async_trait::async_trait;
    use jsonwebtoken::jwk::JwkSet;
    use serde_json::json;
    use std::collections::HashMap;

    struct StaticJwksFetcher {
        jwks: JwkSet,
    }

    #[async_trait]
    impl JwksFetcher for StaticJwksFetcher {
        async fn fetch(&self, _jwks_url: &str) -> Result<JwkSet, TokenError> {
            Ok(self.jwks.clone())
        }
    }

    struct Platform {
        keys: KeyService,
        issuer: JwtIssuer,
        kid: String,
    }

    async fn fake_platform() -> Platform {
        let keys = KeyService::new(Arc::new(MemoryToolStorage::new()));
        let kid = keys.generate_key_pair().await.unwrap();
        Platform {
            issuer: JwtIssuer::new(keys.clone()),
            keys,
            kid,
        }
    }

    async fn flow_against(platform_keys: &KeyService) -> (OidcLoginFlow, Arc<MemoryToolStorage>) {
        let storage = Arc::new(MemoryToolStorage::new());
        storage
            .store_platform(&PlatformRegistration {
                issuer: "https://lms.example.com".to_string(),
                client_id: "client-1".to_string(),
                oidc_auth_url: "https://lms.example.com/auth".to_string(),
                jwks_url: "https://lms.example.com/jwks".to_string(),
                token_url: "https://lms.example.com/token".to_string(),
                deployment_id: "dep-1".to_string(),
            })
            .await
            .unwrap();

        let document = platform_keys.public_jwks().await.unwrap();
        let jwks: JwkSet = serde_json::from_value(serde_json::to_value(&document).unwrap()).unwrap();
        let validator = JwtValidator::with_fetcher(Arc::new(StaticJwksFetcher { jwks }));
        let flow = OidcLoginFlow::new(
            storage.clone(),
            Arc::new(MemoryChallengeStore::new()),
            validator,
        );
        (flow, storage)
    }

    fn login_request() -> LoginRequest {
        LoginRequest {
            iss: "https://lms.example.com".to_string(),
            login_hint: "hint-1".to_string(),
            target_link_uri: "https://tool.example.com/tools".to_string(),
            lti_message_hint: Some("mh-1".to_string()),
        }
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    async fn id_token_for(platform: &Platform, nonce: &str) -> String {
        let exp = Utc::now().timestamp() + 600;
        platform
            .issuer
            .sign(
                &platform.kid,
                &json!({
                    "iss": "https://lms.example.com",
                    "aud": "client-1",
                    "sub": "platform-user-1",
                    "exp": exp,
                    "iat": exp - 600,
                    "nonce": nonce,
                }),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn begin_login_builds_authorization_redirect() {
        let platform = fake_platform().await;
        let (flow, _) = flow_against(&platform.keys).await;

        let url = flow.begin_login("session-1", &login_request()).await.unwrap();
        let query = query_map(&url);

        assert!(url.as_str().starts_with("https://lms.example.com/auth?"));
        assert_eq!(query.get("scope").map(String::as_str), Some("openid"));
        assert_eq!(
            query.get("response_type").map(String::as_str),
            Some("id_token")
        );
        assert_eq!(query.get("client_id").map(String::as_str), Some("client-1"));
        assert_eq!(
            query.get("redirect_uri").map(String::as_str),
            Some("https://tool.example.com/tools")
        );
        assert_eq!(query.get("lti_message_hint").map(String::as_str), Some("mh-1"));
        // >= 128 bits of entropy, base64url encoded
        assert!(query.get("state").unwrap().len() >= 22);
        assert!(query.get("nonce").unwrap().len() >= 22);
    }

    #[tokio::test]
    async fn begin_login_rejects_unknown_issuer() {
        let platform = fake_platform().await;
        let (flow, _) = flow_against(&platform.keys).await;

        let mut request = login_request();
        request.iss = "https://unknown.example.com".to_string();
        let err = flow.begin_login("session-1", &request).await.unwrap_err();
        assert!(matches!(err, LoginError::UnknownPlatform(_)));
    }

    #[tokio::test]
    async fn complete_login_succeeds_exactly_once() {
        let platform = fake_platform().await;
        let (flow, _) = flow_against(&platform.keys).await;

        let url = flow.begin_login("session-1", &login_request()).await.unwrap();
        let query = query_map(&url);
        let state = query.get("state").unwrap().clone();
        let nonce = query.get("nonce").unwrap().clone();
        let token = id_token_for(&platform, &nonce).await;

        let (registration, claims) = flow
            .complete_login("session-1", Some(&state), &token)
            .await
            .unwrap();
        assert_eq!(registration.client_id, "client-1");
        assert_eq!(claims.sub.as_deref(), Some("platform-user-1"));

        // the challenge is gone, a replay of the same state must fail
        let err = flow
            .complete_login("session-1", Some(&state), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::StateMismatch));
    }

    #[tokio::test]
    async fn mismatched_state_is_csrf() {
        let platform = fake_platform().await;
        let (flow, _) = flow_against(&platform.keys).await;

        let url = flow.begin_login("session-1", &login_request()).await.unwrap();
        let nonce = query_map(&url).get("nonce").unwrap().clone();
        let token = id_token_for(&platform, &nonce).await;

        let err = flow
            .complete_login("session-1", Some("attacker-state"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::StateMismatch));

        // even the correct state is now dead: single use was enforced
        let state = query_map(&url).get("state").unwrap().clone();
        let err = flow
            .complete_login("session-1", Some(&state), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::StateMismatch));
    }

    #[tokio::test]
    async fn mismatched_nonce_is_replay() {
        let platform = fake_platform().await;
        let (flow, _) = flow_against(&platform.keys).await;

        let url = flow.begin_login("session-1", &login_request()).await.unwrap();
        let state = query_map(&url).get("state").unwrap().clone();
        let token = id_token_for(&platform, "wrong-nonce").await;

        let err = flow
            .complete_login("session-1", Some(&state), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::NonceMismatch));
    }

    #[tokio::test]
    async fn concurrent_completions_cannot_both_succeed() {
        let platform = fake_platform().await;
        let (flow, _) = flow_against(&platform.keys).await;

        let url = flow.begin_login("session-1", &login_request()).await.unwrap();
        let query = query_map(&url);
        let state = query.get("state").unwrap().clone();
        let nonce = query.get("nonce").unwrap().clone();
        let token = id_token_for(&platform, &nonce).await;

        let (first, second) = tokio::join!(
            flow.complete_login("session-1", Some(&state), &token),
            flow.complete_login("session-1", Some(&state), &token),
        );
        let successes = [first.is_ok(), second.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(successes, 1);
    }
}
