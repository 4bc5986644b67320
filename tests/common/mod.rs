//! Scripted fakes for the collaborator traits, shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use okta_aws_auth::app::assertion::FederationAssertion;
use okta_aws_auth::app::aws_identity::AwsCredentials;
use okta_aws_auth::app::delegation::DelegationClient;
use okta_aws_auth::app::error::{AuthError, AuthResult, DelegationStage};
use okta_aws_auth::app::mfa::{PushDispatcher, PushVerification};
use okta_aws_auth::app::okta_types::{
    AuthEmbedded, AuthFactor, AuthStatus, FactorEmbedded, FactorResult, FactorVerification,
    Link, UserAuthState, VerificationLinks,
};
use okta_aws_auth::app::transport::IdentityProvider;

pub const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

pub fn saml_xml(role_values: &[&str]) -> String {
    let values: String = role_values
        .iter()
        .map(|v| format!("<saml2:AttributeValue>{}</saml2:AttributeValue>", v))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol"><saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion"><saml2:AttributeStatement><saml2:Attribute Name="{}">{}</saml2:Attribute></saml2:AttributeStatement></saml2:Assertion></saml2p:Response>"#,
        ROLE_ATTRIBUTE, values
    )
}

/// Base64 assertion text carrying the given role attribute values.
pub fn encoded_assertion(role_values: &[&str]) -> String {
    STANDARD.encode(saml_xml(role_values))
}

pub fn credentials(tag: &str) -> AwsCredentials {
    AwsCredentials {
        access_key_id: format!("AK{}", tag),
        secret_access_key: format!("SK{}", tag),
        session_token: format!("ST{}", tag),
        expiration: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub fn success(session_token: &str) -> UserAuthState {
    UserAuthState {
        status: AuthStatus::Success,
        session_token: Some(session_token.to_string()),
        ..Default::default()
    }
}

pub fn factor(id: &str, factor_type: &str) -> AuthFactor {
    AuthFactor {
        id: id.to_string(),
        factor_type: factor_type.to_string(),
        provider: Some("DUO".to_string()),
        embedded: None,
    }
}

pub fn mfa_required(factors: Vec<AuthFactor>) -> UserAuthState {
    UserAuthState {
        status: AuthStatus::MfaRequired,
        state_token: Some("state-0".to_string()),
        embedded: Some(AuthEmbedded {
            factors,
            factor: None,
        }),
        ..Default::default()
    }
}

/// `MFA_CHALLENGE` carrying Duo verification metadata for `factor_id`.
pub fn challenge(factor_id: &str, state_token: &str, result: FactorResult) -> UserAuthState {
    let mut challenged = factor(factor_id, "web");
    challenged.embedded = Some(FactorEmbedded {
        verification: Some(FactorVerification {
            host: "api-1234.duosecurity.com".to_string(),
            signature: "TX|abc:APP|def".to_string(),
            links: VerificationLinks {
                complete: Link {
                    href: "https://acme.okta.com/api/v1/authn/factors/f1/lifecycle/duoCallback"
                        .to_string(),
                },
            },
        }),
    });
    UserAuthState {
        status: AuthStatus::MfaChallenge,
        state_token: Some(state_token.to_string()),
        factor_result: Some(result),
        embedded: Some(AuthEmbedded {
            factors: Vec::new(),
            factor: Some(challenged),
        }),
        ..Default::default()
    }
}

/// Identity provider that replays scripted states and records what it was sent.
///
/// The last scripted verify state repeats once the script is exhausted.
pub struct FakeProvider {
    primary: UserAuthState,
    verify_script: Mutex<VecDeque<UserAuthState>>,
    verify_delay: Duration,
    raw_assertion: String,
    pub primary_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub seen_state_tokens: Mutex<Vec<String>>,
    pub seen_session_tokens: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(primary: UserAuthState, raw_assertion: impl Into<String>) -> Self {
        Self {
            primary,
            verify_script: Mutex::new(VecDeque::new()),
            verify_delay: Duration::ZERO,
            raw_assertion: raw_assertion.into(),
            primary_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            seen_state_tokens: Mutex::new(Vec::new()),
            seen_session_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_verify(self, script: Vec<UserAuthState>) -> Self {
        *self.verify_script.lock().unwrap() = script.into();
        self
    }

    /// Each verify consumes its scripted state at once, then answers after `delay`.
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    pub fn raw_assertion(&self) -> &str {
        &self.raw_assertion
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn primary_auth(&self, _username: &str, _password: &str) -> AuthResult<UserAuthState> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.primary.clone())
    }

    async fn verify_factor(
        &self,
        _factor_id: &str,
        state_token: &str,
    ) -> AuthResult<UserAuthState> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_state_tokens
            .lock()
            .unwrap()
            .push(state_token.to_string());

        let next = {
            let mut script = self.verify_script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }
        Ok(next.expect("verify script is empty"))
    }

    async fn fetch_assertion(&self, session_token: &str) -> AuthResult<FederationAssertion> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_session_tokens
            .lock()
            .unwrap()
            .push(session_token.to_string());
        FederationAssertion::from_raw(self.raw_assertion.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AssertionExchange {
    pub principal_arn: String,
    pub role_arn: String,
    pub raw_assertion: String,
    pub duration_seconds: i32,
}

#[derive(Debug, Clone)]
pub struct RoleChain {
    pub caller: AwsCredentials,
    pub target_role_arn: String,
    pub session_name: String,
}

/// STS stand-in: `AK1` from the assertion exchange, `AK2` from the role chain.
pub struct FakeDelegation {
    fail_assertion_exchange: Option<String>,
    fail_role_chain: Option<String>,
    pub assertion_exchanges: Mutex<Vec<AssertionExchange>>,
    pub role_chains: Mutex<Vec<RoleChain>>,
}

impl FakeDelegation {
    pub fn new() -> Self {
        Self {
            fail_assertion_exchange: None,
            fail_role_chain: None,
            assertion_exchanges: Mutex::new(Vec::new()),
            role_chains: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_assertion_exchange(message: &str) -> Self {
        Self {
            fail_assertion_exchange: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn failing_role_chain(message: &str) -> Self {
        Self {
            fail_role_chain: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn total_calls(&self) -> usize {
        self.assertion_exchanges.lock().unwrap().len() + self.role_chains.lock().unwrap().len()
    }
}

#[async_trait]
impl DelegationClient for FakeDelegation {
    async fn assume_with_assertion(
        &self,
        principal_arn: &str,
        role_arn: &str,
        raw_assertion: &str,
        duration_seconds: i32,
    ) -> AuthResult<AwsCredentials> {
        self.assertion_exchanges
            .lock()
            .unwrap()
            .push(AssertionExchange {
                principal_arn: principal_arn.to_string(),
                role_arn: role_arn.to_string(),
                raw_assertion: raw_assertion.to_string(),
                duration_seconds,
            });
        match &self.fail_assertion_exchange {
            Some(message) => Err(AuthError::Delegation {
                stage: DelegationStage::AssertionExchange,
                role_arn: role_arn.to_string(),
                message: message.clone(),
            }),
            None => Ok(credentials("1")),
        }
    }

    async fn assume_role(
        &self,
        caller: &AwsCredentials,
        target_role_arn: &str,
        session_name: &str,
    ) -> AuthResult<AwsCredentials> {
        self.role_chains.lock().unwrap().push(RoleChain {
            caller: caller.clone(),
            target_role_arn: target_role_arn.to_string(),
            session_name: session_name.to_string(),
        });
        match &self.fail_role_chain {
            Some(message) => Err(AuthError::Delegation {
                stage: DelegationStage::RoleChain,
                role_arn: target_role_arn.to_string(),
                message: message.clone(),
            }),
            None => Ok(credentials("2")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PushBehavior {
    Approve,
    ApproveAfter(Duration),
    Fail(String),
    /// Never completes on its own.
    Hang,
}

/// Push dispatcher that records its calls and notices being dropped mid-flight.
pub struct FakeDispatcher {
    behavior: PushBehavior,
    pub calls: AtomicUsize,
    pub abandoned: Arc<AtomicBool>,
    pub seen: Mutex<Vec<PushVerification>>,
}

impl FakeDispatcher {
    pub fn new(behavior: PushBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            abandoned: Arc::new(AtomicBool::new(false)),
            seen: Mutex::new(Vec::new()),
        }
    }
}

struct AbandonGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PushDispatcher for FakeDispatcher {
    async fn dispatch(&self, verification: PushVerification) -> AuthResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(verification);
        match &self.behavior {
            PushBehavior::Approve => Ok(()),
            PushBehavior::ApproveAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            PushBehavior::Fail(message) => Err(AuthError::PushDispatch(message.clone())),
            PushBehavior::Hang => {
                let _guard = AbandonGuard {
                    flag: Arc::clone(&self.abandoned),
                    armed: true,
                };
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
