//! Error taxonomy for the authentication flow.
//!
//! Every failure aborts the whole sequence; there is no partial success. The
//! variants map onto the stages of the flow so callers (and tests) can tell a
//! transport problem from a rejected MFA push or a failed role delegation.

use std::fmt;
use std::time::Duration;

/// Which of the two chained STS exchanges failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationStage {
    /// `AssumeRoleWithSAML` using the raw federation assertion.
    AssertionExchange,
    /// `AssumeRole` into the final target role.
    RoleChain,
}

impl fmt::Display for DelegationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegationStage::AssertionExchange => write!(f, "assuming role with SAML"),
            DelegationStage::RoleChain => write!(f, "assuming role"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider answered with a non-2xx status.
    #[error("{method} {url}: {status}")]
    Http {
        method: String,
        url: String,
        status: String,
    },

    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("{method} {url}: {source}")]
    Request {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid federation document: {0}")]
    InvalidAssertion(String),

    #[error("authentication failed for {username}")]
    AuthenticationFailed { username: String },

    #[error("factor {factor_type} not supported")]
    UnsupportedFactor { factor_type: String },

    #[error("no MFA factors offered for {username}")]
    NoFactors { username: String },

    #[error("MFA challenge for factor {factor_id} carried no verification details")]
    MissingVerification { factor_id: String },

    #[error("MFA verification ended with result {result}")]
    MfaRejected { result: String },

    #[error("MFA verification did not complete within {waited:?}")]
    MfaTimeout { waited: Duration },

    #[error("push challenge failed: {0}")]
    PushDispatch(String),

    #[error("authentication cancelled")]
    Cancelled,

    #[error("no AWS roles found for user {username}")]
    NoEligibleRoles { username: String },

    #[error("error {stage} {role_arn}: {message}")]
    Delegation {
        stage: DelegationStage,
        role_arn: String,
        message: String,
    },
}

impl AuthError {
    /// Role ARN attached to a delegation failure, if this is one.
    pub fn role_arn(&self) -> Option<&str> {
        match self {
            AuthError::Delegation { role_arn, .. } => Some(role_arn),
            _ => None,
        }
    }

    pub(crate) fn delegation(
        stage: DelegationStage,
        role_arn: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        AuthError::Delegation {
            stage,
            role_arn: role_arn.into(),
            message: message.into(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
