//! In-memory login challenge storage implementation
//!
//! Challenges are stored per session key and removed on first take, which is
//! what makes replayed `state`/`nonce` pairs fail.

use crate::errors::StorageError;
use crate::lti::types::LoginChallenge;
use crate::storage::traits::LoginChallengeStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory login challenge store (for testing/development)
#[derive(Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<String, LoginChallenge>>,
}

impl MemoryChallengeStore {
    /// Create a new memory challenge store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoginChallengeStore for MemoryChallengeStore {
    async fn store_challenge(
        &self,
        session_key: &str,
        challenge: &LoginChallenge,
    ) -> Result<(), StorageError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|e| StorageError::QueryFailed(format!("Lock error: {}", e)))?;
        challenges.insert(session_key.to_string(), challenge.clone());
        Ok(())
    }

    async fn take_challenge(
        &self,
        session_key: &str,
    ) -> Result<Option<LoginChallenge>, StorageError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|e| StorageError::QueryFailed(format!("Lock error: {}", e)))?;
        // remove() under the lock is the atomic check-and-delete
        Ok(challenges.remove(session_key))
    }

    async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|e| StorageError::QueryFailed(format!("Lock error: {}", e)))?;
        let initial_count = challenges.len();
        challenges.retain(|_, challenge| challenge.created_at >= older_than);
        Ok(initial_count - challenges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge() -> LoginChallenge {
        LoginChallenge {
            state: "state-1".to_string(),
            nonce: "nonce-1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let store = MemoryChallengeStore::new();
        store.store_challenge("session-1", &challenge()).await.unwrap();

        let first = store.take_challenge("session-1").await.unwrap();
        assert!(first.is_some());

        let second = store.take_challenge("session-1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_old_challenges() {
        let store = MemoryChallengeStore::new();
        let mut old = challenge();
        old.created_at = Utc::now() - Duration::hours(2);
        store.store_challenge("session-old", &old).await.unwrap();
        store.store_challenge("session-new", &challenge()).await.unwrap();

        let removed = store
            .cleanup_expired(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.take_challenge("session-old").await.unwrap().is_none());
        assert!(store.take_challenge("session-new").await.unwrap().is_some());
    }
}
