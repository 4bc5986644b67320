//! okta-aws-auth - AWS credentials from an Okta login
//!
//! Authenticates a user against an Okta organization (with an optional Duo
//! push challenge), exchanges the resulting SAML assertion for temporary AWS
//! credentials, and chains those into a target IAM role.
//!
//! # Architecture Overview
//!
//! - **Orchestrator** ([`app::aws_identity::OktaAuthenticator`]): sequences the
//!   login and both credential exchanges
//! - **Transport** ([`app::transport`]): reqwest client for the Okta authn API
//!   and the federation document
//! - **MFA** ([`app::mfa`], [`app::duo`]): factor selection, push dispatch and
//!   bounded verification polling
//! - **Delegation** ([`app::delegation`]): STS `AssumeRoleWithSAML` and `AssumeRole`
//!
//! Each outer system sits behind a trait so tests can replace it with a fake.
//!
//! # Binary
//!
//! `okta-aws-auth` loads [`app::config::OktaConfig`], runs one authentication
//! and prints the credentials in `credential_process` JSON or shell `export`
//! form. See `okta-aws-auth --help`.

#![warn(clippy::all, rust_2018_idioms)]

// Include logging macros first
#[macro_use]
pub mod logging_macros;

pub mod app;
pub use app::{AuthError, AuthResult, AwsCredentials, OktaAuthenticator, OktaLogin};
