//! Storage trait definitions for tool keys, platform registrations, signing
//! keys, and login challenges.
//!
//! Defines async storage interfaces that can be implemented by various
//! backend providers. The core assumes each implementation serializes
//! concurrent access per key; it performs no locking of its own.

use crate::errors::StorageError;
use crate::lti::types::{LoginChallenge, PlatformRegistration, PublicJwk, SigningKeyPair, ToolKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving the tool's RSA signing keypairs
#[async_trait]
pub trait SigningKeyStore {
    /// Persist a keypair under its `kid`. Fails if the `kid` already exists.
    async fn store_key_pair(&self, pair: &SigningKeyPair) -> Result<()>;

    /// Retrieve a keypair by exact `kid` match; `None` when absent
    async fn get_key_pair(&self, kid: &str) -> Result<Option<SigningKeyPair>>;

    /// All public halves, in an order stable across calls absent writes
    async fn list_public_keys(&self) -> Result<Vec<PublicJwk>>;
}

/// Trait for storing and retrieving LTI 1.3 platform registrations
#[async_trait]
pub trait PlatformStore {
    /// Store a platform registration, replacing any previous one for the
    /// same issuer
    async fn store_platform(&self, registration: &PlatformRegistration) -> Result<()>;

    /// Look up a registration by issuer (OIDC login leg)
    async fn find_by_issuer(&self, issuer: &str) -> Result<Option<PlatformRegistration>>;

    /// Look up a registration by client id (launch-validation leg)
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<PlatformRegistration>>;
}

/// Trait for storing and retrieving LTI 1.1 OAuth1 tool keys
#[async_trait]
pub trait ToolKeyStore {
    /// Store a tool key, keyed by its consumer key
    async fn store_tool_key(&self, tool_key: &ToolKey) -> Result<()>;

    /// Retrieve a tool key by consumer key
    async fn get_tool_key(&self, consumer_key: &str) -> Result<Option<ToolKey>>;
}

/// Trait for storing one-time OIDC login challenges.
///
/// A challenge must be consumable at most once even under concurrent
/// completion attempts: `take_challenge` is an atomic check-and-delete.
#[async_trait]
pub trait LoginChallengeStore: Send + Sync {
    /// Store a challenge against the caller's session key, replacing any
    /// previous one
    async fn store_challenge(&self, session_key: &str, challenge: &LoginChallenge) -> Result<()>;

    /// Atomically remove and return the challenge for a session key.
    /// A second call for the same key returns `None`.
    async fn take_challenge(&self, session_key: &str) -> Result<Option<LoginChallenge>>;

    /// Delete challenges created before the given instant
    async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// Combined storage trait for everything the tool persists
pub trait ToolStorage:
    SigningKeyStore + PlatformStore + ToolKeyStore + LoginChallengeStore + Send + Sync
{
}
