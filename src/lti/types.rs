//! LTI core types and data structures.
//!
//! Defines the credential, registration, challenge, and launch-session types
//! shared by the login, launch, and outcome modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LTI protocol versions the tool speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LtiVersion {
    #[serde(rename = "1.1")]
    V1p1,
    #[serde(rename = "1.3.0")]
    V1p3,
}

/// OAuth 1.0a credential identifying the tool to one LMS.
///
/// Immutable once issued; used to sign one outcome request or verify one
/// inbound launch at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolKey {
    /// Consumer key
    pub key: String,
    /// Shared secret
    pub secret: String,
}

/// LTI 1.3 platform registration, looked up by issuer on the login leg and by
/// client id on the launch-validation leg. Unique per issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRegistration {
    /// Platform issuer identifier (`iss`)
    pub issuer: String,
    /// Client id the platform assigned to this tool
    pub client_id: String,
    /// Platform OIDC authorization endpoint
    pub oidc_auth_url: String,
    /// Platform public key set endpoint
    pub jwks_url: String,
    /// Platform OAuth2 token endpoint for AGS access tokens
    pub token_url: String,
    /// Deployment id of this tool placement
    pub deployment_id: String,
}

/// One RSA signing keypair owned by the tool.
///
/// The private half never leaves the crate; the public half is republished
/// verbatim in the JWKS document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyPair {
    /// Key id, globally unique
    pub kid: String,
    /// JWS algorithm (always RS256)
    pub algorithm: String,
    /// Private half, PKCS#8 PEM
    pub private_key_pem: String,
    /// Public half, JWK shape
    pub public_jwk: PublicJwk,
}

/// Public JWK entry as published in the tool's key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    /// Base64url-encoded RSA modulus
    pub n: String,
    /// Base64url-encoded RSA public exponent
    pub e: String,
}

/// The tool's published key set document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSetDocument {
    pub keys: Vec<PublicJwk>,
}

/// One-time `state`/`nonce` pair issued per login attempt.
///
/// Consumed (deleted) exactly once on completion; a second presentation of
/// the same pair is a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginChallenge {
    pub state: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

/// `aud` claim: a single audience or a list of them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::One(aud) => aud == client_id,
            Audience::Many(auds) => auds.iter().any(|a| a == client_id),
        }
    }

    /// First audience entry, conventionally the client id
    pub fn first(&self) -> Option<&str> {
        match self {
            Audience::One(aud) => Some(aud.as_str()),
            Audience::Many(auds) => auds.first().map(|a| a.as_str()),
        }
    }
}

/// `https://purl.imsglobal.org/spec/lti/claim/context`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextClaim {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub context_types: Option<Vec<String>>,
}

/// `https://purl.imsglobal.org/spec/lti/claim/resource_link`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLinkClaim {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `https://purl.imsglobal.org/spec/lti-ags/claim/endpoint`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgsEndpointClaim {
    /// Line item this launch is bound to, target of score POSTs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineitem: Option<String>,
    /// Line item collection URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineitems: Option<String>,
    /// AGS scopes the platform granted this deployment
    #[serde(default)]
    pub scope: Vec<String>,
}

/// `https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepLinkingSettingsClaim {
    pub deep_link_return_url: String,
    #[serde(default)]
    pub accept_types: Vec<String>,
    #[serde(default)]
    pub accept_presentation_document_targets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_multiple: Option<bool>,
    /// Opaque platform value, echoed back in the response JWT
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// `https://purl.imsglobal.org/spec/lti/claim/launch_presentation`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchPresentationClaim {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Launch message types the tool handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LtiMessageType {
    #[serde(rename = "LtiResourceLinkRequest")]
    ResourceLink,
    #[serde(rename = "LtiDeepLinkingRequest")]
    DeepLinkingRequest,
}

/// Normalized result of a verified LTI 1.1 launch POST
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lti11Launch {
    pub consumer_key: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub context_id: Option<String>,
    pub resource_link_id: String,
    /// `lis_result_sourcedid`, the grade record handle
    pub result_sourcedid: Option<String>,
    /// `lis_outcome_service_url`, the POX endpoint
    pub outcome_service_url: Option<String>,
    pub person_name: Option<String>,
    pub person_email: Option<String>,
    pub return_url: Option<String>,
    pub locale: Option<String>,
    pub custom: HashMap<String, String>,
}

/// Normalized result of a validated LTI 1.3 launch token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lti13Launch {
    pub issuer: String,
    pub client_id: String,
    pub deployment_id: String,
    /// `sub` claim, the platform user id
    pub user_id: String,
    pub message_type: LtiMessageType,
    pub roles: Vec<String>,
    pub context: Option<ContextClaim>,
    pub resource_link: Option<ResourceLinkClaim>,
    pub ags: Option<AgsEndpointClaim>,
    pub deep_linking: Option<DeepLinkingSettingsClaim>,
    pub presentation: Option<LaunchPresentationClaim>,
    pub custom: HashMap<String, serde_json::Value>,
}

/// Normalized launch session, one variant per protocol path.
///
/// Owned by the session-scoped state of the embedding web layer; this crate
/// only produces and reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LaunchSession {
    Lti11(Lti11Launch),
    Lti13(Lti13Launch),
}

impl LaunchSession {
    pub fn lti_version(&self) -> LtiVersion {
        match self {
            LaunchSession::Lti11(_) => LtiVersion::V1p1,
            LaunchSession::Lti13(_) => LtiVersion::V1p3,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            LaunchSession::Lti11(launch) => &launch.user_id,
            LaunchSession::Lti13(launch) => &launch.user_id,
        }
    }

    pub fn roles(&self) -> &[String] {
        match self {
            LaunchSession::Lti11(launch) => &launch.roles,
            LaunchSession::Lti13(launch) => &launch.roles,
        }
    }

    pub fn context_id(&self) -> Option<&str> {
        match self {
            LaunchSession::Lti11(launch) => launch.context_id.as_deref(),
            LaunchSession::Lti13(launch) => launch.context.as_ref().map(|c| c.id.as_str()),
        }
    }

    pub fn resource_link_id(&self) -> Option<&str> {
        match self {
            LaunchSession::Lti11(launch) => Some(&launch.resource_link_id),
            LaunchSession::Lti13(launch) => launch.resource_link.as_ref().map(|r| r.id.as_str()),
        }
    }

    /// The grade record handle: `lis_result_sourcedid` for 1.1, the platform
    /// user id for 1.3 (AGS records are keyed by user).
    pub fn result_sourcedid(&self) -> Option<&str> {
        match self {
            LaunchSession::Lti11(launch) => launch.result_sourcedid.as_deref(),
            LaunchSession::Lti13(launch) => Some(&launch.user_id),
        }
    }

    /// The grade passback endpoint: POX service URL for 1.1, the AGS line
    /// item URL for 1.3.
    pub fn outcome_service_url(&self) -> Option<&str> {
        match self {
            LaunchSession::Lti11(launch) => launch.outcome_service_url.as_deref(),
            LaunchSession::Lti13(launch) => {
                launch.ags.as_ref().and_then(|a| a.lineitem.as_deref())
            }
        }
    }

    pub fn return_url(&self) -> Option<&str> {
        match self {
            LaunchSession::Lti11(launch) => launch.return_url.as_deref(),
            LaunchSession::Lti13(launch) => launch
                .presentation
                .as_ref()
                .and_then(|p| p.return_url.as_deref()),
        }
    }

    pub fn locale(&self) -> Option<&str> {
        match self {
            LaunchSession::Lti11(launch) => launch.locale.as_deref(),
            LaunchSession::Lti13(launch) => launch
                .presentation
                .as_ref()
                .and_then(|p| p.locale.as_deref()),
        }
    }

    pub fn is_deep_linking(&self) -> bool {
        match self {
            LaunchSession::Lti11(_) => false,
            LaunchSession::Lti13(launch) => {
                launch.message_type == LtiMessageType::DeepLinkingRequest
            }
        }
    }

    pub fn deep_linking(&self) -> Option<&DeepLinkingSettingsClaim> {
        match self {
            LaunchSession::Lti11(_) => None,
            LaunchSession::Lti13(launch) => launch.deep_linking.as_ref(),
        }
    }
}

/// What to do with a grade record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Read,
    Write,
    Delete,
}

/// Ephemeral value object describing one grade passback operation
#[derive(Debug, Clone)]
pub struct OutcomeRequest {
    /// `lis_result_sourcedid` (1.1) or platform user id (1.3)
    pub sourced_id: String,
    /// Score value as a decimal string; `None` for reads and deletes
    pub score_given: Option<String>,
    /// Score ceiling as a decimal string; `None` defaults per protocol path
    pub score_maximum: Option<String>,
    pub kind: OutcomeKind,
}

/// Bearer credential obtained per AGS call via client-credentials exchange
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// A content item selected during Deep Linking, returned to the platform as
/// an `ltiResourceLink` entry in the response JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub custom: HashMap<String, String>,
}

impl ContentItem {
    /// An `ltiResourceLink` item pointing back at the tool's launch URL
    pub fn resource_link(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            item_type: "ltiResourceLink".to_string(),
            title: title.into(),
            url: url.into(),
            custom: HashMap::new(),
        }
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

// LTI claim URIs
pub const CLAIM_MESSAGE_TYPE: &str = "https://purl.imsglobal.org/spec/lti/claim/message_type";
pub const CLAIM_VERSION: &str = "https://purl.imsglobal.org/spec/lti/claim/version";
pub const CLAIM_DEPLOYMENT_ID: &str = "https://purl.imsglobal.org/spec/lti/claim/deployment_id";
pub const CLAIM_ROLES: &str = "https://purl.imsglobal.org/spec/lti/claim/roles";
pub const CLAIM_CONTEXT: &str = "https://purl.imsglobal.org/spec/lti/claim/context";
pub const CLAIM_RESOURCE_LINK: &str = "https://purl.imsglobal.org/spec/lti/claim/resource_link";
pub const CLAIM_LAUNCH_PRESENTATION: &str =
    "https://purl.imsglobal.org/spec/lti/claim/launch_presentation";
pub const CLAIM_CUSTOM: &str = "https://purl.imsglobal.org/spec/lti/claim/custom";
pub const CLAIM_AGS_ENDPOINT: &str = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint";
pub const CLAIM_DL_SETTINGS: &str =
    "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings";
pub const CLAIM_DL_CONTENT_ITEMS: &str =
    "https://purl.imsglobal.org/spec/lti-dl/claim/content_items";
pub const CLAIM_DL_DATA: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/data";

// AGS scope URIs
pub const SCOPE_AGS_SCORE: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/score";
pub const SCOPE_AGS_RESULT_READONLY: &str =
    "https://purl.imsglobal.org/spec/lti-ags/scope/result.readonly";
