//! Environment-based configuration types for the tool provider runtime settings.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;

/// Path where the tool's public JWKS document is served.
/// The full URL is constructed by prepending the external_base URL; platforms
/// are registered with that URL as the tool's key set endpoint.
pub const JWKS_PATH: &str = "/jwks.json";

/// HTTP client timeout configuration
#[derive(Clone)]
pub struct HttpClientTimeout(Duration);

/// Access token cache policy for AGS grade passback.
///
/// `Fresh` performs a client-credentials exchange on every outcome call.
/// `CacheUntilExpiry` reuses a token for its advertised lifetime. Scope and
/// expiry semantics vary across platforms, so `Fresh` is the default.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessTokenCachePolicy {
    Fresh,
    CacheUntilExpiry,
}

/// Key id used to sign Deep Linking response JWTs
#[derive(Clone)]
pub struct DeepLinkingKid(Option<String>);

/// Comment attached to AGS score submissions
#[derive(Clone)]
pub struct OutcomeComment(String);

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub external_base: String,
    pub user_agent: String,
    pub http_client_timeout: HttpClientTimeout,
    pub token_cache_policy: AccessTokenCachePolicy,
    pub deep_linking_kid: DeepLinkingKid,
    pub outcome_comment: OutcomeComment,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let external_base = require_env("EXTERNAL_BASE")?;
        let default_user_agent = format!("ltp/{}", version()?);
        let user_agent = default_env("USER_AGENT", &default_user_agent);
        let http_client_timeout: HttpClientTimeout =
            default_env("HTTP_CLIENT_TIMEOUT", "30s").try_into()?;
        let token_cache_policy: AccessTokenCachePolicy =
            default_env("ACCESS_TOKEN_CACHE_POLICY", "fresh").try_into()?;
        let deep_linking_kid: DeepLinkingKid = optional_env("DEEP_LINKING_KID").into();
        let outcome_comment: OutcomeComment =
            default_env("OUTCOME_COMMENT", "Updated automatically by the tool").into();

        Ok(Self {
            version: version()?,
            external_base,
            user_agent,
            http_client_timeout,
            token_cache_policy,
            deep_linking_kid,
            outcome_comment,
        })
    }

    /// Full public URL of the tool's JWKS endpoint
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.external_base.trim_end_matches('/'), JWKS_PATH)
    }

    /// Shared outbound HTTP client honoring the configured timeout.
    /// Redirects are not followed; outcome and token endpoints must answer
    /// directly.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(*self.http_client_timeout.as_ref())
            .user_agent(self.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

impl TryFrom<String> for HttpClientTimeout {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self(Duration::from_secs(30)));
        }
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for HttpClientTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for AccessTokenCachePolicy {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "" | "fresh" => Ok(Self::Fresh),
            "cache" => Ok(Self::CacheUntilExpiry),
            other => Err(ConfigError::UnknownCachePolicy(other.to_string()).into()),
        }
    }
}

impl From<Option<String>> for DeepLinkingKid {
    fn from(value: Option<String>) -> Self {
        Self(value.filter(|v| !v.is_empty()))
    }
}

impl DeepLinkingKid {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<String> for OutcomeComment {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for OutcomeComment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
