//! Launch session construction from verified launch material.
//!
//! Maps a signature-verified LTI 1.1 form POST or a validated LTI 1.3 claim
//! set into the normalized [`LaunchSession`] union. Pure mapping plus the
//! delegated signature check: no network I/O happens here, and an invalid
//! launch fails closed before any parameter is read.

use std::collections::HashMap;

use crate::errors::LaunchError;
use crate::lti::oauth1;
use crate::lti::types::{
    LaunchSession, Lti11Launch, Lti13Launch, LtiMessageType, PlatformRegistration, ToolKey,
};
use crate::lti::validation::IdTokenClaims;

const LTI11_LAUNCH_MESSAGE_TYPE: &str = "basic-lti-launch-request";

/// Builds [`LaunchSession`] values from either protocol path
pub struct LaunchSessionBuilder;

impl LaunchSessionBuilder {
    /// Verify and map an LTI 1.1 launch POST.
    ///
    /// `params` is the full form parameter set; `method` and `url` are the
    /// request line the platform signed.
    pub fn from_lti11_form(
        method: &str,
        url: &str,
        params: &HashMap<String, String>,
        tool_key: &ToolKey,
    ) -> Result<LaunchSession, LaunchError> {
        oauth1::verify_launch(method, url, params, tool_key)?;

        let message_type = params
            .get("lti_message_type")
            .ok_or(LaunchError::MissingParameter("lti_message_type"))?;
        if message_type != LTI11_LAUNCH_MESSAGE_TYPE {
            return Err(LaunchError::UnsupportedMessageType(message_type.clone()));
        }
        let version = params
            .get("lti_version")
            .ok_or(LaunchError::MissingParameter("lti_version"))?;
        if !version.starts_with("LTI-1") {
            return Err(LaunchError::UnsupportedVersion(version.clone()));
        }

        let user_id = params
            .get("user_id")
            .ok_or(LaunchError::MissingParameter("user_id"))?
            .clone();
        let resource_link_id = params
            .get("resource_link_id")
            .ok_or(LaunchError::MissingParameter("resource_link_id"))?
            .clone();
        let consumer_key = params
            .get("oauth_consumer_key")
            .ok_or(LaunchError::MissingParameter("oauth_consumer_key"))?
            .clone();

        let roles = params
            .get("roles")
            .map(|roles| {
                roles
                    .split(',')
                    .map(|role| role.trim().to_string())
                    .filter(|role| !role.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let custom = params
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("custom_")
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        Ok(LaunchSession::Lti11(Lti11Launch {
            consumer_key,
            user_id,
            roles,
            context_id: params.get("context_id").cloned(),
            resource_link_id,
            result_sourcedid: params.get("lis_result_sourcedid").cloned(),
            outcome_service_url: params.get("lis_outcome_service_url").cloned(),
            person_name: params.get("lis_person_name_full").cloned(),
            person_email: params.get("lis_person_contact_email_primary").cloned(),
            return_url: params.get("launch_presentation_return_url").cloned(),
            locale: params.get("launch_presentation_locale").cloned(),
            custom,
        }))
    }

    /// Map an already-validated LTI 1.3 claim set.
    ///
    /// The claims must come out of the login flow's validation; this
    /// function trusts them and only checks LTI-level shape.
    pub fn from_lti13_claims(
        claims: &IdTokenClaims,
        platform: &PlatformRegistration,
    ) -> Result<LaunchSession, LaunchError> {
        let message_type = match claims.message_type.as_deref() {
            Some("LtiResourceLinkRequest") => LtiMessageType::ResourceLink,
            Some("LtiDeepLinkingRequest") => LtiMessageType::DeepLinkingRequest,
            Some(other) => return Err(LaunchError::UnsupportedMessageType(other.to_string())),
            None => return Err(LaunchError::MissingParameter("message_type claim")),
        };
        match claims.lti_version.as_deref() {
            Some("1.3.0") => {}
            Some(other) => return Err(LaunchError::UnsupportedVersion(other.to_string())),
            None => return Err(LaunchError::MissingParameter("version claim")),
        }

        let user_id = claims
            .sub
            .clone()
            .ok_or(LaunchError::MissingParameter("sub"))?;
        let deployment_id = claims
            .deployment_id
            .clone()
            .ok_or(LaunchError::MissingParameter("deployment_id claim"))?;

        // a resource launch must target a resource link; deep linking has none
        let resource_link = claims.resource_link.clone();
        if message_type == LtiMessageType::ResourceLink && resource_link.is_none() {
            return Err(LaunchError::MissingParameter("resource_link claim"));
        }
        if message_type == LtiMessageType::DeepLinkingRequest
            && claims.deep_linking_settings.is_none()
        {
            return Err(LaunchError::MissingParameter("deep_linking_settings claim"));
        }

        Ok(LaunchSession::Lti13(Lti13Launch {
            issuer: platform.issuer.clone(),
            client_id: platform.client_id.clone(),
            deployment_id,
            user_id,
            message_type,
            roles: claims.roles.clone().unwrap_or_default(),
            context: claims.context.clone(),
            resource_link,
            ags: claims.ags_endpoint.clone(),
            deep_linking: claims.deep_linking_settings.clone(),
            presentation: claims.launch_presentation.clone(),
            custom: claims.custom.clone().unwrap_or_default(),
        }))
    }
}
