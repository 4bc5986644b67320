//! # Okta-to-AWS Authentication and Credential Issuance
//!
//! This module drives the whole login: primary authentication against Okta, the
//! optional out-of-band MFA challenge, fetching the SAML federation assertion,
//! and the two chained STS exchanges that end in credentials for the target role.
//!
//! ## Flow
//!
//! ```text
//! primary auth ──► [MFA_REQUIRED] ──► MFA challenger ──┐
//!      │                                              │
//!      └──────────────── SUCCESS ◄────────────────────┘
//!                          │
//!             fetch federation assertion
//!                          │
//!                  select SAML role
//!                          │
//!            AssumeRoleWithSAML (3600 s)
//!                          │
//!           AssumeRole into the target role
//!                          │
//!                    AwsCredentials
//! ```
//!
//! Every step is gated on the previous one. Any failure aborts the whole
//! sequence; a new call starts again from primary authentication.
//!
//! ## Collaborators
//!
//! The orchestrator only talks to traits, so each outer system can be swapped:
//! - [`IdentityProvider`] for the Okta authn API,
//! - [`PushDispatcher`] for the out-of-band push,
//! - [`DelegationClient`] for STS,
//! - [`RoleSelector`] for picking the SAML role.
//!
//! ## Security Model
//!
//! - Nothing is written to disk; the transaction state lives only for the call.
//! - Passwords, tokens and secret keys are redacted from `Debug` output and logs.
//! - The raw SAML assertion is handed to STS exactly as the provider returned it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use okta_aws_auth::app::aws_identity::{OktaAuthenticator, OktaLogin};
//! # use okta_aws_auth::app::delegation::StsDelegationClient;
//! # use okta_aws_auth::app::duo::DuoPushDispatcher;
//! # use okta_aws_auth::app::transport::OktaTransport;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = OktaTransport::new("https://acme.okta.com", "home/amazon_aws/0oa1/272")?;
//! let authenticator = OktaAuthenticator::new(
//!     OktaLogin::new("jane@acme.com", "hunter2"),
//!     Arc::new(transport),
//!     Arc::new(DuoPushDispatcher::new()),
//!     Arc::new(StsDelegationClient::new("us-west-2")),
//! );
//!
//! let credentials = authenticator
//!     .authenticate("arn:aws:iam::111122223333:role/Admin", "prod")
//!     .await?;
//! println!("Access key: {}", credentials.access_key_id);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::assertion::RolePair;
use super::delegation::{DelegationClient, ASSERTION_SESSION_SECONDS};
use super::error::{AuthError, AuthResult};
use super::mfa::{MfaChallenger, MfaSettings, PushDispatcher};
use super::okta_types::{AuthStatus, UserAuthState};
use super::role_selection::{FirstRoleSelector, RoleSelector};
use super::transport::IdentityProvider;

/// Prefix for the role session name of the final AssumeRole.
pub const SESSION_NAME_PREFIX: &str = "okta-";

const MAX_SESSION_NAME_LEN: usize = 64;

/// AWS temporary credentials for the target role.
///
/// Produced once per successful [`OktaAuthenticator::authenticate`] call and
/// owned by the caller from then on.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Temporary access key id; safe to log.
    pub access_key_id: String,

    /// Never logged or printed outside the explicit credential output.
    pub secret_access_key: String,

    pub session_token: String,

    /// Absolute UTC expiry.
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Operator credentials for primary authentication.
#[derive(Clone)]
pub struct OktaLogin {
    pub username: String,
    password: String,
}

impl OktaLogin {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for OktaLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OktaLogin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session name for the final AssumeRole, restricted to the STS alphabet.
///
/// STS accepts `[\w+=,.@-]{2,64}`; anything else becomes `-`.
pub fn role_session_name(label: &str) -> String {
    format!("{}{}", SESSION_NAME_PREFIX, label)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

/// Drives one login from username/password to target-role credentials.
pub struct OktaAuthenticator {
    login: OktaLogin,
    provider: Arc<dyn IdentityProvider>,
    dispatcher: Arc<dyn PushDispatcher>,
    delegation: Arc<dyn DelegationClient>,
    selector: Arc<dyn RoleSelector>,
    mfa: MfaSettings,
}

impl OktaAuthenticator {
    pub fn new(
        login: OktaLogin,
        provider: Arc<dyn IdentityProvider>,
        dispatcher: Arc<dyn PushDispatcher>,
        delegation: Arc<dyn DelegationClient>,
    ) -> Self {
        Self {
            login,
            provider,
            dispatcher,
            delegation,
            selector: Arc::new(FirstRoleSelector),
            mfa: MfaSettings::default(),
        }
    }

    /// Replace the default first-listed role selection.
    pub fn with_role_selector(mut self, selector: Arc<dyn RoleSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_mfa_settings(mut self, settings: MfaSettings) -> Self {
        self.mfa = settings;
        self
    }

    pub fn username(&self) -> &str {
        &self.login.username
    }

    /// Authenticate and return credentials for `target_role_arn`.
    pub async fn authenticate(
        &self,
        target_role_arn: &str,
        session_label: &str,
    ) -> AuthResult<AwsCredentials> {
        self.authenticate_with_cancel(target_role_arn, session_label, CancellationToken::new())
            .await
    }

    /// As [`Self::authenticate`], abandoning the flow once `cancel` fires.
    pub async fn authenticate_with_cancel(
        &self,
        target_role_arn: &str,
        session_label: &str,
        cancel: CancellationToken,
    ) -> AuthResult<AwsCredentials> {
        let username = self.login.username.as_str();

        trace_debug!("Step 1: primary authentication for {}", username);
        let state = guard(
            &cancel,
            self.provider.primary_auth(username, &self.login.password),
        )
        .await?;
        let state = self.complete_mfa(state, &cancel).await?;

        let session_token = state
            .session_token()
            .ok_or_else(|| AuthError::AuthenticationFailed {
                username: username.to_string(),
            })?;

        trace_debug!("Step 2: fetching federation assertion");
        let assertion = guard(&cancel, self.provider.fetch_assertion(session_token)).await?;
        if assertion.roles().is_empty() {
            return Err(AuthError::NoEligibleRoles {
                username: username.to_string(),
            });
        }

        trace_debug!("Step 3: selecting among {} role(s)", assertion.roles().len());
        let pair: RolePair = self
            .selector
            .select(assertion.roles())
            .cloned()
            .ok_or_else(|| AuthError::NoEligibleRoles {
                username: username.to_string(),
            })?;

        trace_debug!("Step 4: assuming {} with SAML", pair.role_arn);
        let temporary = guard(
            &cancel,
            self.delegation.assume_with_assertion(
                &pair.principal_arn,
                &pair.role_arn,
                assertion.raw(),
                ASSERTION_SESSION_SECONDS,
            ),
        )
        .await
        .inspect_err(|e| error!(role = %pair.role_arn, "{}", e))?;

        let session_name = role_session_name(session_label);
        trace_debug!(
            "Step 5: assuming {} as session {}",
            target_role_arn,
            session_name
        );
        let credentials = guard(
            &cancel,
            self.delegation
                .assume_role(&temporary, target_role_arn, &session_name),
        )
        .await
        .inspect_err(|e| error!(role = %target_role_arn, "{}", e))?;

        info!(
            "Issued credentials {} for {} (expires {})",
            credentials.access_key_id, target_role_arn, credentials.expiration
        );
        Ok(credentials)
    }

    async fn complete_mfa(
        &self,
        state: UserAuthState,
        cancel: &CancellationToken,
    ) -> AuthResult<UserAuthState> {
        match state.status {
            AuthStatus::MfaRequired => {
                trace_debug!("MFA required, starting challenge");
                MfaChallenger::new(
                    Arc::clone(&self.provider),
                    Arc::clone(&self.dispatcher),
                    self.mfa,
                )
                .challenge(state, &self.login.username, cancel)
                .await
            }
            AuthStatus::Success => Ok(state),
            // The session-token check that follows decides these
            AuthStatus::Unauthenticated
            | AuthStatus::PasswordWarn
            | AuthStatus::PasswordExpired
            | AuthStatus::LockedOut
            | AuthStatus::MfaEnroll
            | AuthStatus::MfaChallenge => {
                info!("Primary authentication returned status {}", state.status);
                Ok(state)
            }
        }
    }
}

async fn guard<T>(
    cancel: &CancellationToken,
    step: impl std::future::Future<Output = AuthResult<T>>,
) -> AuthResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        result = step => result,
    }
}
