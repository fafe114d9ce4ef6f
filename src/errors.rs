//! Standardized error types following the `error-ltp-<domain>-<number>` format.

use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-ltp-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when version information is not available
    #[error("error-ltp-config-2 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when a duration string cannot be parsed
    #[error("error-ltp-config-3 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when the access token cache policy is not recognized
    #[error("error-ltp-config-4 Unknown access token cache policy '{0}': expected fresh/cache")]
    UnknownCachePolicy(String),
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when storage backend connection fails
    #[error("error-ltp-storage-1 Storage connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-ltp-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when data serialization fails
    #[error("error-ltp-storage-3 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when data validation fails
    #[error("error-ltp-storage-4 Invalid data: {0}")]
    InvalidData(String),
}

/// OIDC third-party login errors
#[derive(Debug, Error)]
pub enum LoginError {
    /// No platform registration exists for the requesting issuer
    #[error("error-ltp-login-1 No platform registered for issuer: {0}")]
    UnknownPlatform(String),

    /// Returned `state` does not match the stored login challenge (CSRF)
    #[error("error-ltp-login-2 OIDC state mismatch or missing login challenge")]
    StateMismatch,

    /// Token `nonce` claim does not match the stored login challenge (replay)
    #[error("error-ltp-login-3 OIDC nonce mismatch")]
    NonceMismatch,

    /// ID token failed validation
    #[error("error-ltp-login-4 ID token rejected: {0}")]
    Token(#[from] TokenError),

    /// Challenge store failure
    #[error("error-ltp-login-5 Login challenge storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Inbound platform JWT validation errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// The compact serialization cannot be split into header/claims/signature
    #[error("error-ltp-token-1 Malformed token: {0}")]
    Malformed(String),

    /// The platform JWKS document could not be fetched or parsed
    #[error("error-ltp-token-2 Platform key discovery failed: {0}")]
    KeyDiscovery(String),

    /// No JWKS entry matches the token `kid`, or the RS256 check failed
    #[error("error-ltp-token-3 Token signature invalid: {0}")]
    SignatureInvalid(String),

    /// A registered claim failed validation
    #[error("error-ltp-token-4 Token claim '{claim}' invalid: {reason}")]
    ClaimInvalid { claim: &'static str, reason: String },
}

/// Outbound JWT signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    /// The referenced private key does not exist
    #[error("error-ltp-sign-1 Signing key not found: {0}")]
    KeyNotFound(String),

    /// The stored key material could not be used
    #[error("error-ltp-sign-2 Bad signing key material for kid {kid}: {reason}")]
    KeyMaterial { kid: String, reason: String },

    /// JWT encoding failed
    #[error("error-ltp-sign-3 JWT encoding failed: {0}")]
    Encoding(String),

    /// Key store failure
    #[error("error-ltp-sign-4 Signing key storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// LTI launch validation errors
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Inbound OAuth 1.0a launch signature did not verify
    #[error("error-ltp-launch-1 Launch signature invalid: {0}")]
    SignatureInvalid(String),

    /// Launch timestamp outside the freshness window
    #[error("error-ltp-launch-2 Launch timestamp stale or invalid")]
    StaleTimestamp,

    /// A required launch parameter or claim is absent
    #[error("error-ltp-launch-3 Missing launch parameter: {0}")]
    MissingParameter(&'static str),

    /// The LTI message type is not a launch the tool handles
    #[error("error-ltp-launch-4 Unsupported LTI message type: {0}")]
    UnsupportedMessageType(String),

    /// The LTI version marker is not one the tool handles
    #[error("error-ltp-launch-5 Unsupported LTI version: {0}")]
    UnsupportedVersion(String),
}

/// Grade passback errors
#[derive(Debug, Error)]
pub enum OutcomeError {
    /// Network failure or timeout talking to the platform
    #[error("error-ltp-outcome-1 Outcome transport failed: {0}")]
    Transport(String),

    /// The platform response had an unexpected shape or status
    #[error("error-ltp-outcome-2 Outcome protocol error: {0}")]
    Protocol(String),

    /// The OAuth2 client-credentials exchange did not yield an access token
    #[error("error-ltp-outcome-3 Access token exchange failed: {0}")]
    TokenExchange(String),

    /// The client assertion or OAuth1 header could not be signed
    #[error("error-ltp-outcome-4 Outcome request signing failed: {0}")]
    Signing(#[from] SigningError),

    /// The launch session carries no outcome service URL
    #[error("error-ltp-outcome-5 No outcome service URL for this launch")]
    MissingServiceUrl,
}
