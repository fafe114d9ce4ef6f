//! Grade passback against both outcome protocols.
//!
//! LTI 1.1 wraps results in an OAuth1-signed POX envelope; LTI 1.3 AGS first
//! exchanges a client assertion for a bearer token, then talks JSON to the
//! line item's `/scores` and `/results` resources. Each call is stateless
//! and performs no retries; the caller decides whether to re-attempt a
//! failed passback.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

use crate::config::AccessTokenCachePolicy;
use crate::errors::OutcomeError;
use crate::lti::jwt::JwtIssuer;
use crate::lti::oauth1;
use crate::lti::pox::{self, PoxRequestKind, PoxResponse};
use crate::lti::types::{
    AccessTokenResponse, OutcomeKind, OutcomeRequest, PlatformRegistration, SCOPE_AGS_RESULT_READONLY,
    SCOPE_AGS_SCORE, ToolKey,
};

/// Responses larger than this are treated as failure, not partial success
const MAX_RESPONSE_BYTES: u64 = 65535;

/// Seconds of remaining lifetime below which a cached token is not reused
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 30;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const SCORE_MEDIA_TYPE: &str = "application/vnd.ims.lis.v1.score+json";
const RESULT_CONTAINER_MEDIA_TYPE: &str = "application/vnd.ims.lis.v2.resultcontainer+json";

/// AGS score publication payload
#[derive(Debug, Clone, Serialize)]
pub struct Score {
    pub timestamp: String,
    #[serde(rename = "scoreGiven", skip_serializing_if = "Option::is_none")]
    pub score_given: Option<f64>,
    #[serde(rename = "scoreMaximum", skip_serializing_if = "Option::is_none")]
    pub score_maximum: Option<f64>,
    pub comment: String,
    #[serde(rename = "activityProgress")]
    pub activity_progress: String,
    #[serde(rename = "gradingProgress")]
    pub grading_progress: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Build the score payload for a write (both score fields present) or a
/// delete (both omitted, which clears the platform's grade record).
pub fn build_score(
    user_id: &str,
    score_given: Option<&str>,
    score_maximum: Option<&str>,
    comment: &str,
) -> Result<Score, OutcomeError> {
    let parse = |field: &'static str, value: &str| {
        value.parse::<f64>().map_err(|_| {
            OutcomeError::Protocol(format!("Score field {} is not numeric: {}", field, value))
        })
    };
    let score_given = score_given
        .map(|value| parse("scoreGiven", value))
        .transpose()?;
    let score_maximum = score_maximum
        .map(|value| parse("scoreMaximum", value))
        .transpose()?;

    Ok(Score {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        score_given,
        score_maximum,
        comment: comment.to_string(),
        activity_progress: "Completed".to_string(),
        grading_progress: "FullyGraded".to_string(),
        user_id: user_id.to_string(),
    })
}

/// Resolve the grade passback endpoint a launch session carries, failing
/// when the platform did not provision one
pub fn outcome_url(session: &crate::lti::types::LaunchSession) -> Result<&str, OutcomeError> {
    session
        .outcome_service_url()
        .ok_or(OutcomeError::MissingServiceUrl)
}

/// Append an AGS suffix (`/scores`, `/results`) to a line item URL, keeping
/// any query string the platform put there
fn service_url(lineitem_url: &str, suffix: &str) -> Result<Url, OutcomeError> {
    let mut url = Url::parse(lineitem_url)
        .map_err(|e| OutcomeError::Protocol(format!("Bad line item URL: {}", e)))?;
    if !url.path().ends_with(suffix) {
        let path = format!("{}{}", url.path(), suffix);
        url.set_path(&path);
    }
    Ok(url)
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Orchestrates outcome reads, writes, and deletes against a platform
pub struct OutcomeClient {
    http: reqwest::Client,
    jwt: JwtIssuer,
    cache_policy: AccessTokenCachePolicy,
    comment: String,
    token_cache: tokio::sync::RwLock<HashMap<String, CachedToken>>,
}

impl OutcomeClient {
    pub fn new(http: reqwest::Client, jwt: JwtIssuer) -> Self {
        Self {
            http,
            jwt,
            cache_policy: AccessTokenCachePolicy::Fresh,
            comment: "Updated automatically by the tool".to_string(),
            token_cache: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn with_cache_policy(mut self, cache_policy: AccessTokenCachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    // ===== LTI 1.1 POX path =====

    /// Write an outcome value. A `None` value is sent as an empty string,
    /// matching what legacy platforms expect from a cleared score.
    pub async fn write_outcome(
        &self,
        tool_key: &ToolKey,
        service_url: &str,
        sourced_id: &str,
        value: Option<&str>,
    ) -> Result<(), OutcomeError> {
        let value = value.unwrap_or("");
        let response = self
            .pox_request(
                PoxRequestKind::ReplaceResult,
                service_url,
                sourced_id,
                Some(value),
                tool_key,
            )
            .await?;
        Self::require_success(&response, "replaceResult")
    }

    /// Read the stored outcome value, `None` when the platform has none
    pub async fn read_outcome(
        &self,
        tool_key: &ToolKey,
        service_url: &str,
        sourced_id: &str,
    ) -> Result<Option<String>, OutcomeError> {
        let response = self
            .pox_request(
                PoxRequestKind::ReadResult,
                service_url,
                sourced_id,
                None,
                tool_key,
            )
            .await?;
        Self::require_success(&response, "readResult")?;
        Ok(response.text_string)
    }

    /// Delete the stored outcome record
    pub async fn delete_outcome(
        &self,
        tool_key: &ToolKey,
        service_url: &str,
        sourced_id: &str,
    ) -> Result<(), OutcomeError> {
        let response = self
            .pox_request(
                PoxRequestKind::DeleteResult,
                service_url,
                sourced_id,
                None,
                tool_key,
            )
            .await?;
        Self::require_success(&response, "deleteResult")
    }

    /// Dispatch an [`OutcomeRequest`] over the LTI 1.1 path. Reads resolve
    /// to `Some(value)`; writes and deletes to `None`.
    pub async fn execute_lti11(
        &self,
        tool_key: &ToolKey,
        service_url: &str,
        request: &OutcomeRequest,
    ) -> Result<Option<String>, OutcomeError> {
        match request.kind {
            OutcomeKind::Write => {
                self.write_outcome(
                    tool_key,
                    service_url,
                    &request.sourced_id,
                    request.score_given.as_deref(),
                )
                .await?;
                Ok(None)
            }
            OutcomeKind::Read => {
                self.read_outcome(tool_key, service_url, &request.sourced_id)
                    .await
            }
            OutcomeKind::Delete => {
                self.delete_outcome(tool_key, service_url, &request.sourced_id)
                    .await?;
                Ok(None)
            }
        }
    }

    fn require_success(response: &PoxResponse, operation: &str) -> Result<(), OutcomeError> {
        if response.is_success() {
            Ok(())
        } else {
            tracing::error!(
                operation = operation,
                code_major = %response.code_major,
                description = response.description.as_deref().unwrap_or(""),
                "platform rejected POX outcome request"
            );
            Err(OutcomeError::Protocol(format!(
                "Platform reported imsx_codeMajor={}",
                response.code_major
            )))
        }
    }

    async fn pox_request(
        &self,
        kind: PoxRequestKind,
        url: &str,
        sourced_id: &str,
        value: Option<&str>,
        tool_key: &ToolKey,
    ) -> Result<PoxResponse, OutcomeError> {
        let message_id = Uuid::new_v4().to_string();
        let body = pox::build_envelope(kind, sourced_id, value, &message_id)?;
        let signed = oauth1::sign_request("POST", url, body.as_bytes(), tool_key)?;

        let response = self
            .http
            .post(url)
            .header("Authorization", signed.authorization)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| OutcomeError::Transport(e.to_string()))?;

        let text = Self::bounded_body(response).await?;
        pox::parse_response(&text)
    }

    /// Status and size checks shared by every outcome response.
    ///
    /// Oversized and empty bodies are failures: a truncated envelope must
    /// never read as a successful write.
    async fn bounded_body(response: reqwest::Response) -> Result<String, OutcomeError> {
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(OutcomeError::Protocol(format!(
                "Platform returned HTTP {}",
                status
            )));
        }
        if let Some(length) = response.content_length() {
            if length == 0 || length >= MAX_RESPONSE_BYTES {
                return Err(OutcomeError::Protocol(format!(
                    "Response size {} out of bounds",
                    length
                )));
            }
        }
        let text = response
            .text()
            .await
            .map_err(|e| OutcomeError::Transport(e.to_string()))?;
        if text.is_empty() {
            return Err(OutcomeError::Protocol("Empty response body".to_string()));
        }
        if text.len() as u64 >= MAX_RESPONSE_BYTES {
            return Err(OutcomeError::Protocol(format!(
                "Response size {} out of bounds",
                text.len()
            )));
        }
        Ok(text)
    }

    // ===== LTI 1.3 AGS path =====

    /// Publish a score to the launch's line item. Missing values fall back
    /// to `0.0` out of `1.0` so a write always carries a complete score.
    pub async fn write_lti13_outcome(
        &self,
        platform: &PlatformRegistration,
        kid: &str,
        lineitem_url: &str,
        user_id: &str,
        value: Option<&str>,
        max_value: Option<&str>,
    ) -> Result<(), OutcomeError> {
        let token = self.access_token(platform, kid, SCOPE_AGS_SCORE).await?;
        let score = build_score(
            user_id,
            Some(value.unwrap_or("0.0")),
            Some(max_value.unwrap_or("1.0")),
            &self.comment,
        )?;
        self.post_score(lineitem_url, &token, &score).await
    }

    /// Clear the user's grade record by posting a score without values
    pub async fn delete_lti13_outcome(
        &self,
        platform: &PlatformRegistration,
        kid: &str,
        lineitem_url: &str,
        user_id: &str,
    ) -> Result<(), OutcomeError> {
        let token = self.access_token(platform, kid, SCOPE_AGS_SCORE).await?;
        let score = build_score(user_id, None, None, &self.comment)?;
        self.post_score(lineitem_url, &token, &score).await
    }

    /// Read the user's result, `None` when the platform has no record
    pub async fn read_lti13_outcome(
        &self,
        platform: &PlatformRegistration,
        kid: &str,
        lineitem_url: &str,
        user_id: &str,
    ) -> Result<Option<String>, OutcomeError> {
        let token = self
            .access_token(platform, kid, SCOPE_AGS_RESULT_READONLY)
            .await?;

        let mut url = service_url(lineitem_url, "/results")?;
        url.query_pairs_mut().append_pair("user_id", user_id);

        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", RESULT_CONTAINER_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| OutcomeError::Transport(e.to_string()))?;
        let text = Self::bounded_body(response).await?;

        let results: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| OutcomeError::Protocol(format!("Result container is not JSON: {}", e)))?;
        let results = results
            .as_array()
            .ok_or_else(|| OutcomeError::Protocol("Result container is not an array".to_string()))?;
        Ok(results.first().and_then(|result| {
            result.get("resultScore").map(|score| match score.as_str() {
                Some(text) => text.to_string(),
                None => score.to_string(),
            })
        }))
    }

    /// Dispatch an [`OutcomeRequest`] over the AGS path
    pub async fn execute_lti13(
        &self,
        platform: &PlatformRegistration,
        kid: &str,
        lineitem_url: &str,
        request: &OutcomeRequest,
    ) -> Result<Option<String>, OutcomeError> {
        match request.kind {
            OutcomeKind::Write => {
                self.write_lti13_outcome(
                    platform,
                    kid,
                    lineitem_url,
                    &request.sourced_id,
                    request.score_given.as_deref(),
                    request.score_maximum.as_deref(),
                )
                .await?;
                Ok(None)
            }
            OutcomeKind::Read => {
                self.read_lti13_outcome(platform, kid, lineitem_url, &request.sourced_id)
                    .await
            }
            OutcomeKind::Delete => {
                self.delete_lti13_outcome(platform, kid, lineitem_url, &request.sourced_id)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn post_score(
        &self,
        lineitem_url: &str,
        token: &str,
        score: &Score,
    ) -> Result<(), OutcomeError> {
        let url = service_url(lineitem_url, "/scores")?;
        let body = serde_json::to_vec(score)
            .map_err(|e| OutcomeError::Protocol(format!("Score serialization failed: {}", e)))?;

        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", SCORE_MEDIA_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| OutcomeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            tracing::error!(status = %status, user_id = %score.user_id, "AGS score POST rejected");
            return Err(OutcomeError::Protocol(format!(
                "Platform returned HTTP {}",
                status
            )));
        }
        Ok(())
    }

    /// Obtain a bearer token for one AGS scope via the client-credentials
    /// grant, honoring the configured cache policy
    async fn access_token(
        &self,
        platform: &PlatformRegistration,
        kid: &str,
        scope: &str,
    ) -> Result<String, OutcomeError> {
        let cache_key = format!("{}|{}", platform.issuer, scope);
        if self.cache_policy == AccessTokenCachePolicy::CacheUntilExpiry {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                if cached.expires_at > Utc::now().timestamp() + TOKEN_EXPIRY_MARGIN_SECS {
                    return Ok(cached.token.clone());
                }
            }
        }

        let assertion = self
            .jwt
            .client_assertion(&platform.client_id, &platform.token_url, kid)
            .await?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&platform.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| OutcomeError::TokenExchange(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(OutcomeError::TokenExchange(format!(
                "Token endpoint returned HTTP {}",
                status
            )));
        }
        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| OutcomeError::TokenExchange(format!("Token response parse: {}", e)))?;
        let token = body.access_token.ok_or_else(|| {
            tracing::error!(
                issuer = %platform.issuer,
                client_id = %platform.client_id,
                kid = %kid,
                "token endpoint response carried no access_token"
            );
            OutcomeError::TokenExchange("No access_token in response".to_string())
        })?;

        if self.cache_policy == AccessTokenCachePolicy::CacheUntilExpiry {
            let expires_at = Utc::now().timestamp() + body.expires_in.unwrap_or(3600);
            self.token_cache.write().await.insert(
                cache_key,
                CachedToken {
                    token: token.clone(),
                    expires_at,
                },
            );
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lti::keys::KeyService;
    use crate::storage::inmemory::MemoryToolStorage;
    use std::sync::Arc;

    #[test]
    fn success_code_major_is_reported_as_success() {
        let response = PoxResponse {
            code_major: "success".to_string(),
            description: None,
            text_string: Some("0.85".to_string()),
        };
        assert!(OutcomeClient::require_success(&response, "readResult").is_ok());
    }

    #[test]
    fn failure_code_major_is_reported_as_failure() {
        let response = PoxResponse {
            code_major: "failure".to_string(),
            description: Some("no such sourcedid".to_string()),
            text_string: None,
        };
        let err = OutcomeClient::require_success(&response, "replaceResult").unwrap_err();
        assert!(matches!(err, OutcomeError::Protocol(_)));
    }

    #[tokio::test]
    async fn client_builders_set_policy_and_comment() {
        let keys = KeyService::new(Arc::new(MemoryToolStorage::new()));
        let client = OutcomeClient::new(reqwest::Client::new(), JwtIssuer::new(keys))
            .with_cache_policy(AccessTokenCachePolicy::CacheUntilExpiry)
            .with_comment("Graded by LTP");
        assert_eq!(client.cache_policy, AccessTokenCachePolicy::CacheUntilExpiry);
        assert_eq!(client.comment, "Graded by LTP");
    }

    #[test]
    fn write_score_carries_both_fields() {
        let score = build_score("user-1", Some("7"), Some("10"), "graded").unwrap();
        let json = serde_json::to_value(&score).unwrap();

        assert_eq!(json["scoreGiven"], 7.0);
        assert_eq!(json["scoreMaximum"], 10.0);
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["activityProgress"], "Completed");
        assert_eq!(json["gradingProgress"], "FullyGraded");
        assert_eq!(json["comment"], "graded");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn delete_score_omits_both_fields() {
        let score = build_score("user-1", None, None, "cleared").unwrap();
        let json = serde_json::to_value(&score).unwrap();

        assert!(json.get("scoreGiven").is_none());
        assert!(json.get("scoreMaximum").is_none());
        assert_eq!(json["userId"], "user-1");
    }

    #[test]
    fn non_numeric_score_is_rejected() {
        let err = build_score("user-1", Some("ninety"), Some("100"), "").unwrap_err();
        assert!(matches!(err, OutcomeError::Protocol(_)));
    }

    #[test]
    fn fractional_scores_survive_parsing() {
        let score = build_score("user-1", Some("0.85"), Some("1.0"), "").unwrap();
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json["scoreGiven"], 0.85);
        assert_eq!(json["scoreMaximum"], 1.0);
    }

    #[test]
    fn launch_without_outcome_url_is_an_error() {
        use crate::lti::types::{LaunchSession, Lti11Launch};

        let session = LaunchSession::Lti11(Lti11Launch {
            consumer_key: "K".to_string(),
            user_id: "u-1".to_string(),
            roles: vec![],
            context_id: None,
            resource_link_id: "rl-1".to_string(),
            result_sourcedid: None,
            outcome_service_url: None,
            person_name: None,
            person_email: None,
            return_url: None,
            locale: None,
            custom: HashMap::new(),
        });
        assert!(matches!(
            outcome_url(&session),
            Err(OutcomeError::MissingServiceUrl)
        ));
    }

    #[test]
    fn service_url_appends_suffix_once() {
        let url = service_url("https://lms.example.com/lineitems/7", "/scores").unwrap();
        assert_eq!(url.as_str(), "https://lms.example.com/lineitems/7/scores");

        let url = service_url("https://lms.example.com/lineitems/7/scores", "/scores").unwrap();
        assert_eq!(url.as_str(), "https://lms.example.com/lineitems/7/scores");
    }

    #[test]
    fn service_url_preserves_query_string() {
        let url = service_url(
            "https://lms.example.com/services.php/lineitem?type_id=2",
            "/scores",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://lms.example.com/services.php/lineitem/scores?type_id=2"
        );
    }
}
