//! LTI launch security and grade passback protocol engine.
//!
//! Covers both protocol generations: OAuth 1.0a signed launches with POX
//! outcomes (LTI 1.1) and the OIDC/JWT security framework with AGS grade
//! services and Deep Linking (LTI 1.3).

pub mod jwt;
pub mod keys;
pub mod launch;
pub mod login;
pub mod oauth1;
pub mod outcome;
pub mod pox;
pub mod types;
pub mod validation;

// Re-export frequently used items from each module
pub use jwt::{ClientAssertionClaims, DeepLinkingResponseClaims, JwtIssuer};
pub use keys::KeyService;
pub use launch::LaunchSessionBuilder;
pub use login::{LoginRequest, OidcLoginFlow};
pub use outcome::{OutcomeClient, Score, build_score, outcome_url};
pub use pox::{PoxRequestKind, PoxResponse};
pub use types::{
    AccessTokenResponse, ContentItem, JwkSetDocument, LaunchSession, LoginChallenge, Lti11Launch,
    Lti13Launch, LtiMessageType, LtiVersion, OutcomeKind, OutcomeRequest, PlatformRegistration,
    PublicJwk, SigningKeyPair, ToolKey,
};
pub use validation::{HttpJwksFetcher, IdTokenClaims, JwksFetcher, JwtValidator};
