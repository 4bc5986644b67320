//! Wire types for the Okta authentication API (`/api/v1/authn`).
//!
//! [`UserAuthState`] is the transaction object the provider returns from every
//! authn round-trip. It is replaced wholesale after each call; the state token
//! it carries correlates the steps, not the cookie jar.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction status reported by the provider.
///
/// The set is closed on purpose: an unrecognised status fails decoding instead
/// of silently falling through a string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    PasswordWarn,
    PasswordExpired,
    LockedOut,
    MfaEnroll,
    MfaRequired,
    MfaChallenge,
    Success,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthStatus::Unauthenticated => "UNAUTHENTICATED",
            AuthStatus::PasswordWarn => "PASSWORD_WARN",
            AuthStatus::PasswordExpired => "PASSWORD_EXPIRED",
            AuthStatus::LockedOut => "LOCKED_OUT",
            AuthStatus::MfaEnroll => "MFA_ENROLL",
            AuthStatus::MfaRequired => "MFA_REQUIRED",
            AuthStatus::MfaChallenge => "MFA_CHALLENGE",
            AuthStatus::Success => "SUCCESS",
        };
        f.write_str(label)
    }
}

/// Outcome of an out-of-band verification, reported while status is `MFA_CHALLENGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactorResult {
    Waiting,
    Success,
    Rejected,
    Timeout,
    Cancelled,
    Error,
}

impl FactorResult {
    /// The user (or the provider) ended the challenge without approving it.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            FactorResult::Rejected
                | FactorResult::Timeout
                | FactorResult::Cancelled
                | FactorResult::Error
        )
    }
}

impl fmt::Display for FactorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FactorResult::Waiting => "WAITING",
            FactorResult::Success => "SUCCESS",
            FactorResult::Rejected => "REJECTED",
            FactorResult::Timeout => "TIMEOUT",
            FactorResult::Cancelled => "CANCELLED",
            FactorResult::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Factor type tag for the out-of-band web (Duo) push, the only one handled.
pub const WEB_FACTOR_TYPE: &str = "web";

/// Primary-auth request body.
#[derive(Clone, Serialize)]
pub struct PrimaryAuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Factor verification request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTokenRequest<'a> {
    pub state_token: &'a str,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuthState {
    #[serde(default)]
    pub status: AuthStatus,

    #[serde(default)]
    pub state_token: Option<String>,

    #[serde(default)]
    pub session_token: Option<String>,

    #[serde(default)]
    pub expires_at: Option<String>,

    #[serde(default)]
    pub factor_result: Option<FactorResult>,

    #[serde(rename = "_embedded", default)]
    pub embedded: Option<AuthEmbedded>,
}

impl UserAuthState {
    /// Session token, treating an empty string the same as a missing one.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn state_token(&self) -> Option<&str> {
        self.state_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Factors offered while the transaction is `MFA_REQUIRED`.
    pub fn factors(&self) -> &[AuthFactor] {
        self.embedded
            .as_ref()
            .map(|e| e.factors.as_slice())
            .unwrap_or_default()
    }

    /// The factor being challenged while the transaction is `MFA_CHALLENGE`.
    pub fn challenged_factor(&self) -> Option<&AuthFactor> {
        self.embedded.as_ref().and_then(|e| e.factor.as_ref())
    }
}

impl fmt::Debug for UserAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAuthState")
            .field("status", &self.status)
            .field("state_token", &self.state_token().map(|_| "<redacted>"))
            .field("session_token", &self.session_token().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("factor_result", &self.factor_result)
            .field("embedded", &self.embedded)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthEmbedded {
    #[serde(default)]
    pub factors: Vec<AuthFactor>,

    #[serde(default)]
    pub factor: Option<AuthFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFactor {
    pub id: String,

    pub factor_type: String,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(rename = "_embedded", default)]
    pub embedded: Option<FactorEmbedded>,
}

impl AuthFactor {
    pub fn is_supported(&self) -> bool {
        self.factor_type == WEB_FACTOR_TYPE
    }

    pub fn verification(&self) -> Option<&FactorVerification> {
        self.embedded.as_ref().and_then(|e| e.verification.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorEmbedded {
    #[serde(default)]
    pub verification: Option<FactorVerification>,
}

/// Out-of-band challenge metadata: where to push and where to report completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorVerification {
    pub host: String,

    pub signature: String,

    #[serde(rename = "_links")]
    pub links: VerificationLinks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationLinks {
    pub complete: Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}
