//! Out-of-band MFA challenge.
//!
//! Once the provider has put the transaction into `MFA_CHALLENGE`, two things
//! run side by side:
//!
//! - a spawned task dispatches the push (Duo) and completes the web callback,
//! - the calling task keeps re-submitting the factor verification every
//!   `poll_interval` until the provider reports `SUCCESS`.
//!
//! The polling loop owns the [`UserAuthState`] outright. The dispatch task only
//! gets an owned copy of the [`PushVerification`] parameters and reports back
//! through its `JoinHandle`, which the loop watches so a failed push aborts
//! the wait immediately. The loop is bounded by a deadline and by the caller's
//! cancellation token, and the dispatch task is always joined before returning.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{AuthError, AuthResult};
use super::okta_types::{AuthFactor, AuthStatus, UserAuthState};
use super::transport::IdentityProvider;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MFA_TIMEOUT: Duration = Duration::from_secs(300);

type PollRound<'a> = Pin<Box<dyn Future<Output = AuthResult<UserAuthState>> + Send + 'a>>;

/// Parameters handed to the push service.
#[derive(Clone, PartialEq)]
pub struct PushVerification {
    pub host: String,
    pub signature: String,
    pub callback_url: String,
    pub state_token: String,
}

impl std::fmt::Debug for PushVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushVerification")
            .field("host", &self.host)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

/// Sends the out-of-band challenge to the user's device.
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn dispatch(&self, verification: PushVerification) -> AuthResult<()>;
}

/// Timing for the verification polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfaSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for MfaSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_MFA_TIMEOUT,
        }
    }
}

/// Pick the factor to challenge.
///
/// Walks the whole list and keeps the *last* supported factor. Errors only when
/// no factor in the list is supported, naming the last unsupported type seen.
pub fn select_factor<'a>(
    factors: &'a [AuthFactor],
    username: &str,
) -> AuthResult<&'a AuthFactor> {
    let mut selected = None;
    let mut last_unsupported = None;

    for factor in factors {
        if factor.is_supported() {
            selected = Some(factor);
        } else {
            debug!("Skipping unsupported factor type {}", factor.factor_type);
            last_unsupported = Some(factor.factor_type.as_str());
        }
    }

    match (selected, last_unsupported) {
        (Some(factor), _) => Ok(factor),
        (None, Some(factor_type)) => Err(AuthError::UnsupportedFactor {
            factor_type: factor_type.to_string(),
        }),
        (None, None) => Err(AuthError::NoFactors {
            username: username.to_string(),
        }),
    }
}

pub struct MfaChallenger {
    provider: Arc<dyn IdentityProvider>,
    dispatcher: Arc<dyn PushDispatcher>,
    settings: MfaSettings,
}

impl MfaChallenger {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        dispatcher: Arc<dyn PushDispatcher>,
        settings: MfaSettings,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            settings,
        }
    }

    /// Drive the challenge for an `MFA_REQUIRED` transaction.
    ///
    /// Returns the last state the provider reported. When the factor needed no
    /// out-of-band step, that may be any status; the caller checks for a
    /// session token before going on.
    pub async fn challenge(
        &self,
        state: UserAuthState,
        username: &str,
        cancel: &CancellationToken,
    ) -> AuthResult<UserAuthState> {
        let factor = select_factor(state.factors(), username)?;
        let factor_id = factor.id.clone();
        info!("Challenging MFA factor {} ({})", factor_id, factor.factor_type);

        let state_token = state
            .state_token()
            .ok_or_else(|| AuthError::AuthenticationFailed {
                username: username.to_string(),
            })?
            .to_string();

        let state = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            verified = self.provider.verify_factor(&factor_id, &state_token) => verified?,
        };

        match state.status {
            AuthStatus::MfaChallenge => {}
            AuthStatus::Success => return Ok(state),
            other => {
                debug!("Factor verification returned {}, nothing to push", other);
                return Ok(state);
            }
        }

        check_poll_status(&state)?;
        let verification = push_verification(&state, &factor_id)?;
        self.wait_for_push(state, &factor_id, verification, cancel).await
    }

    async fn wait_for_push(
        &self,
        state: UserAuthState,
        factor_id: &str,
        verification: PushVerification,
        cancel: &CancellationToken,
    ) -> AuthResult<UserAuthState> {
        let dispatch_cancel = cancel.child_token();
        let mut dispatch = self.spawn_dispatch(verification, dispatch_cancel.clone());
        let mut dispatch_finished = false;

        let deadline = Instant::now() + self.settings.timeout;
        let mut rounds: u32 = 0;

        // A round in flight survives other branches firing; its response
        // carries the next state token and must not be dropped unread.
        let outcome = match state.state_token() {
            None => Err(missing_state_token()),
            Some(state_token) => {
                let mut round = self.poll_round(factor_id, state_token.to_string());
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Err(AuthError::Cancelled),
                        _ = tokio::time::sleep_until(deadline) => {
                            let waited = self.settings.timeout;
                            warn!("MFA verification still pending after {:?}", waited);
                            break Err(AuthError::MfaTimeout { waited });
                        }
                        joined = &mut dispatch, if !dispatch_finished => {
                            dispatch_finished = true;
                            match joined {
                                Ok(Ok(())) => debug!("Push dispatch done, waiting for provider"),
                                Ok(Err(e)) => break Err(e),
                                Err(e) => break Err(AuthError::PushDispatch(e.to_string())),
                            }
                        }
                        polled = &mut round => {
                            rounds += 1;
                            let next = match polled {
                                Ok(next) => next,
                                Err(e) => break Err(e),
                            };
                            debug!("MFA poll {} returned {}", rounds, next.status);
                            if let Err(e) = check_poll_status(&next) {
                                break Err(e);
                            }
                            if next.status == AuthStatus::Success {
                                break Ok(next);
                            }
                            // The provider may rotate the token on every response
                            match next.state_token() {
                                Some(token) => {
                                    round = self.poll_round(factor_id, token.to_string());
                                }
                                None => break Err(missing_state_token()),
                            }
                        }
                    }
                }
            }
        };

        dispatch_cancel.cancel();
        if !dispatch_finished {
            if let Err(e) = dispatch.await {
                if !e.is_cancelled() {
                    warn!("Push dispatch task ended abnormally: {}", e);
                }
            }
        }

        if outcome.is_ok() {
            info!("MFA verification succeeded after {} poll(s)", rounds);
        }
        outcome
    }

    /// One poll: wait out the interval, then re-submit the verification.
    fn poll_round<'a>(&'a self, factor_id: &'a str, state_token: String) -> PollRound<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.settings.poll_interval).await;
            self.provider.verify_factor(factor_id, &state_token).await
        })
    }

    fn spawn_dispatch(
        &self,
        verification: PushVerification,
        cancel: CancellationToken,
    ) -> JoinHandle<AuthResult<()>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            info!("Dispatching push challenge to {}", verification.host);
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                result = dispatcher.dispatch(verification) => {
                    if let Err(e) = &result {
                        warn!("Push challenge failed: {}", e);
                    }
                    result
                }
            }
        })
    }
}

fn push_verification(state: &UserAuthState, factor_id: &str) -> AuthResult<PushVerification> {
    let verification = state
        .challenged_factor()
        .and_then(AuthFactor::verification)
        .ok_or_else(|| AuthError::MissingVerification {
            factor_id: factor_id.to_string(),
        })?;
    let state_token = state
        .state_token()
        .ok_or_else(|| AuthError::MissingVerification {
            factor_id: factor_id.to_string(),
        })?;

    Ok(PushVerification {
        host: verification.host.clone(),
        signature: verification.signature.clone(),
        callback_url: verification.links.complete.href.clone(),
        state_token: state_token.to_string(),
    })
}

fn missing_state_token() -> AuthError {
    AuthError::MfaRejected {
        result: "state token missing while polling".to_string(),
    }
}

/// Statuses that keep the polling loop going, and those that end it.
fn check_poll_status(state: &UserAuthState) -> AuthResult<()> {
    match state.status {
        AuthStatus::Success | AuthStatus::MfaRequired => Ok(()),
        AuthStatus::MfaChallenge => match state.factor_result {
            Some(result) if result.is_failure() => Err(AuthError::MfaRejected {
                result: result.to_string(),
            }),
            _ => Ok(()),
        },
        AuthStatus::Unauthenticated
        | AuthStatus::PasswordWarn
        | AuthStatus::PasswordExpired
        | AuthStatus::LockedOut
        | AuthStatus::MfaEnroll => Err(AuthError::MfaRejected {
            result: state.status.to_string(),
        }),
    }
}
