//! Inbound ID token validation against a platform's published key set.
//!
//! Each validation call is a stateless pass through
//! parse -> fetch JWKS -> verify signature -> verify claims. Nonce
//! consumption is deliberately not handled here: nonce state belongs to the
//! login session, not the token (see the login module).

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::TokenError;
use crate::lti::types::{
    AgsEndpointClaim, Audience, ContextClaim, DeepLinkingSettingsClaim, LaunchPresentationClaim,
    PlatformRegistration, ResourceLinkClaim,
};

/// Clock skew tolerance in seconds for time-based claim checks
const CLOCK_SKEW_TOLERANCE: i64 = 60;

/// Claim set of a validated LTI 1.3 ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: Option<String>,
    pub aud: Option<Audience>,
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub nbf: Option<i64>,
    pub nonce: Option<String>,
    pub azp: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub lti_version: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
    pub roles: Option<Vec<String>>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/context")]
    pub context: Option<ContextClaim>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link")]
    pub resource_link: Option<ResourceLinkClaim>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/launch_presentation")]
    pub launch_presentation: Option<LaunchPresentationClaim>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/custom")]
    pub custom: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint")]
    pub ags_endpoint: Option<AgsEndpointClaim>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings")]
    pub deep_linking_settings: Option<DeepLinkingSettingsClaim>,
    /// Claims the tool does not model explicitly
    #[serde(flatten)]
    pub additional_claims: HashMap<String, serde_json::Value>,
}

/// Retrieves a platform's published key set.
///
/// Failures are surfaced as [`TokenError::KeyDiscovery`] without retrying;
/// the caller decides whether to re-attempt the whole validation.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, jwks_url: &str) -> Result<JwkSet, TokenError>;
}

/// HTTP key set fetcher used in production
pub struct HttpJwksFetcher {
    http: reqwest::Client,
}

impl HttpJwksFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, jwks_url: &str) -> Result<JwkSet, TokenError> {
        let response = self
            .http
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| TokenError::KeyDiscovery(format!("JWKS fetch failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(TokenError::KeyDiscovery(format!(
                "JWKS endpoint returned HTTP {}",
                response.status()
            )));
        }
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| TokenError::KeyDiscovery(format!("JWKS parse failed: {}", e)))
    }
}

/// Validates inbound platform ID tokens
#[derive(Clone)]
pub struct JwtValidator {
    fetcher: Arc<dyn JwksFetcher>,
}

impl JwtValidator {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            fetcher: Arc::new(HttpJwksFetcher::new(http)),
        }
    }

    /// Create a validator with a custom key set source
    pub fn with_fetcher(fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self { fetcher }
    }

    /// Validate an ID token against the platform's published keys and its
    /// registration, returning the claim set on success.
    pub async fn validate(
        &self,
        id_token: &str,
        platform: &PlatformRegistration,
    ) -> Result<IdTokenClaims, TokenError> {
        // parse before any network round trip
        decode_header(id_token).map_err(|e| TokenError::Malformed(e.to_string()))?;

        let jwks = self.fetcher.fetch(&platform.jwks_url).await?;
        let claims = Self::verify_with_jwks(id_token, &jwks, platform);
        if let Err(err) = &claims {
            tracing::warn!(
                issuer = %platform.issuer,
                client_id = %platform.client_id,
                error = %err,
                "ID token validation failed"
            );
        }
        claims
    }

    /// Signature and claim verification against an already-fetched key set
    pub fn verify_with_jwks(
        id_token: &str,
        jwks: &JwkSet,
        platform: &PlatformRegistration,
    ) -> Result<IdTokenClaims, TokenError> {
        let header = decode_header(id_token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| TokenError::SignatureInvalid("Token header has no kid".to_string()))?;
        let jwk = jwks.find(&kid).ok_or_else(|| {
            TokenError::SignatureInvalid(format!("No JWKS entry for kid {}", kid))
        })?;
        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| TokenError::SignatureInvalid(format!("Unusable JWKS entry: {}", e)))?;

        // claim checks are done below with explicit error kinds
        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data =
            decode::<IdTokenClaims>(id_token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                        TokenError::Malformed(e.to_string())
                    }
                    _ => TokenError::SignatureInvalid(e.to_string()),
                }
            })?;
        let claims = data.claims;

        if claims.iss.as_deref() != Some(platform.issuer.as_str()) {
            return Err(TokenError::ClaimInvalid {
                claim: "iss",
                reason: format!(
                    "expected {}, got {}",
                    platform.issuer,
                    claims.iss.as_deref().unwrap_or("<absent>")
                ),
            });
        }

        let audience_ok = claims
            .aud
            .as_ref()
            .map(|aud| aud.contains(&platform.client_id))
            .unwrap_or(false);
        if !audience_ok {
            return Err(TokenError::ClaimInvalid {
                claim: "aud",
                reason: format!("audience does not contain {}", platform.client_id),
            });
        }

        let now = chrono::Utc::now().timestamp();
        match claims.exp {
            Some(exp) if exp + CLOCK_SKEW_TOLERANCE >= now => {}
            Some(_) => {
                return Err(TokenError::ClaimInvalid {
                    claim: "exp",
                    reason: "token expired".to_string(),
                });
            }
            None => {
                return Err(TokenError::ClaimInvalid {
                    claim: "exp",
                    reason: "claim absent".to_string(),
                });
            }
        }
        if let Some(nbf) = claims.nbf {
            if nbf - CLOCK_SKEW_TOLERANCE > now {
                return Err(TokenError::ClaimInvalid {
                    claim: "nbf",
                    reason: "token not yet valid".to_string(),
                });
            }
        }

        Ok(claims)
    }
}
