//! Outbound JWT signing for the LTI 1.3 security framework.
//!
//! One RS256 primitive signs every JWT the tool emits: OAuth2 client
//! assertions for the token endpoint and Deep Linking response messages.
//! A missing or unusable private key is a configuration error, fatal for
//! the current request; callers never retry it.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::SigningError;
use crate::lti::keys::KeyService;
use crate::lti::types::{ContentItem, Lti13Launch};

/// Client assertion lifetime in seconds
const CLIENT_ASSERTION_TTL_SECS: i64 = 300;

/// Deep Linking response lifetime in seconds
const DEEP_LINKING_TTL_SECS: i64 = 600;

/// OAuth2 JWT-bearer client assertion claims (RFC 7523)
#[derive(Debug, Clone, Serialize)]
pub struct ClientAssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// LTI Deep Linking response message claims
#[derive(Debug, Clone, Serialize)]
pub struct DeepLinkingResponseClaims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub version: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-dl/claim/content_items")]
    pub content_items: Vec<ContentItem>,
    /// Opaque platform value echoed from the launch's deep_linking_settings
    #[serde(
        rename = "https://purl.imsglobal.org/spec/lti-dl/claim/data",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<String>,
}

/// Signs the tool's outbound JWTs with a named RSA key
#[derive(Clone)]
pub struct JwtIssuer {
    keys: KeyService,
}

impl JwtIssuer {
    pub fn new(keys: KeyService) -> Self {
        Self { keys }
    }

    async fn encoding_key(&self, kid: &str) -> Result<EncodingKey, SigningError> {
        let pair = self
            .keys
            .private_key(kid)
            .await
            .map_err(SigningError::from)?
            .ok_or_else(|| SigningError::KeyNotFound(kid.to_string()))?;
        EncodingKey::from_rsa_pem(pair.private_key_pem.as_bytes()).map_err(|e| {
            SigningError::KeyMaterial {
                kid: kid.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Sign arbitrary claims with the named key, RS256, `kid` in the header
    pub async fn sign<T: Serialize>(&self, kid: &str, claims: &T) -> Result<String, SigningError> {
        let key = self.encoding_key(kid).await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &key).map_err(|e| SigningError::Encoding(e.to_string()))
    }

    /// Build and sign an OAuth2 JWT-bearer client assertion for the
    /// platform's token endpoint
    pub async fn client_assertion(
        &self,
        client_id: &str,
        token_url: &str,
        kid: &str,
    ) -> Result<String, SigningError> {
        let iat = Utc::now().timestamp();
        let claims = ClientAssertionClaims {
            iss: client_id.to_string(),
            sub: client_id.to_string(),
            aud: token_url.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat + CLIENT_ASSERTION_TTL_SECS,
        };
        self.sign(kid, &claims).await
    }

    /// Build and sign the Deep Linking response JWT for a content selection
    /// made during a deep-linking launch.
    ///
    /// The platform's opaque `data` value from the launch settings is echoed
    /// back when present.
    pub async fn deep_linking_response(
        &self,
        launch: &Lti13Launch,
        items: &[ContentItem],
        kid: &str,
    ) -> Result<String, SigningError> {
        let iat = Utc::now().timestamp();
        let claims = DeepLinkingResponseClaims {
            iss: launch.client_id.clone(),
            aud: launch.issuer.clone(),
            iat,
            exp: iat + DEEP_LINKING_TTL_SECS,
            nonce: Uuid::new_v4().to_string(),
            message_type: "LtiDeepLinkingResponse".to_string(),
            version: "1.3.0".to_string(),
            deployment_id: launch.deployment_id.clone(),
            content_items: items.to_vec(),
            data: launch
                .deep_linking
                .as_ref()
                .and_then(|settings| settings.data.clone()),
        };
        self.sign(kid, &claims).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lti::types::{DeepLinkingSettingsClaim, LtiMessageType};
    use crate::storage::inmemory::MemoryToolStorage;
    use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn issuer_with_key() -> (JwtIssuer, KeyService, String) {
        let keys = KeyService::new(Arc::new(MemoryToolStorage::new()));
        let kid = keys.generate_key_pair().await.unwrap();
        (JwtIssuer::new(keys.clone()), keys, kid)
    }

    fn lenient_validation() -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation
    }

    #[tokio::test]
    async fn client_assertion_validates_against_published_jwk() {
        let (issuer, keys, kid) = issuer_with_key().await;
        let token = issuer
            .client_assertion("client-1", "https://lms.example.com/token", &kid)
            .await
            .unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(kid.as_str()));

        // verify with only the public half, straight out of the JWKS
        let jwks = keys.public_jwks().await.unwrap();
        let jwk = jwks.keys.iter().find(|k| k.kid == kid).unwrap();
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
        let data =
            decode::<serde_json::Value>(&token, &decoding_key, &lenient_validation()).unwrap();

        assert_eq!(data.claims["iss"], "client-1");
        assert_eq!(data.claims["sub"], "client-1");
        assert_eq!(data.claims["aud"], "https://lms.example.com/token");
        assert!(data.claims["jti"].as_str().is_some());
        let iat = data.claims["iat"].as_i64().unwrap();
        let exp = data.claims["exp"].as_i64().unwrap();
        assert_eq!(exp - iat, CLIENT_ASSERTION_TTL_SECS);
    }

    #[tokio::test]
    async fn deep_linking_response_echoes_platform_data() {
        let (issuer, keys, kid) = issuer_with_key().await;
        let launch = Lti13Launch {
            issuer: "https://lms.example.com".to_string(),
            client_id: "client-1".to_string(),
            deployment_id: "dep-1".to_string(),
            user_id: "sub-1".to_string(),
            message_type: LtiMessageType::DeepLinkingRequest,
            roles: vec![],
            context: None,
            resource_link: None,
            ags: None,
            deep_linking: Some(DeepLinkingSettingsClaim {
                deep_link_return_url: "https://lms.example.com/dl-return".to_string(),
                accept_types: vec!["ltiResourceLink".to_string()],
                accept_presentation_document_targets: vec!["iframe".to_string()],
                accept_multiple: None,
                data: Some("opaque-dl-state".to_string()),
                title: None,
                text: None,
            }),
            presentation: None,
            custom: HashMap::new(),
        };
        let items = vec![
            ContentItem::resource_link("Exercise 1", "https://tool.example.com/tools")
                .with_custom("assignment", "ex1"),
        ];

        let token = issuer
            .deep_linking_response(&launch, &items, &kid)
            .await
            .unwrap();

        let jwks = keys.public_jwks().await.unwrap();
        let jwk = &jwks.keys[0];
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
        let data =
            decode::<serde_json::Value>(&token, &decoding_key, &lenient_validation()).unwrap();

        assert_eq!(data.claims["iss"], "client-1");
        assert_eq!(data.claims["aud"], "https://lms.example.com");
        assert_eq!(
            data.claims["https://purl.imsglobal.org/spec/lti/claim/message_type"],
            "LtiDeepLinkingResponse"
        );
        assert_eq!(
            data.claims["https://purl.imsglobal.org/spec/lti/claim/version"],
            "1.3.0"
        );
        assert_eq!(
            data.claims["https://purl.imsglobal.org/spec/lti/claim/deployment_id"],
            "dep-1"
        );
        assert_eq!(
            data.claims["https://purl.imsglobal.org/spec/lti-dl/claim/data"],
            "opaque-dl-state"
        );
        let content_items =
            &data.claims["https://purl.imsglobal.org/spec/lti-dl/claim/content_items"];
        assert_eq!(content_items[0]["type"], "ltiResourceLink");
        assert_eq!(content_items[0]["title"], "Exercise 1");
        assert_eq!(content_items[0]["custom"]["assignment"], "ex1");
    }

    #[tokio::test]
    async fn missing_key_is_fatal() {
        let keys = KeyService::new(Arc::new(MemoryToolStorage::new()));
        let issuer = JwtIssuer::new(keys);
        let result = issuer
            .client_assertion("client-1", "https://lms.example.com/token", "no-such-kid")
            .await;
        assert!(matches!(result, Err(SigningError::KeyNotFound(_))));
    }
}
