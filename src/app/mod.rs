//! Okta authentication, MFA, and AWS credential issuance.
//!
//! Modules are layered bottom-up: wire types and transport talk to the
//! identity provider, [`mfa`] and [`duo`] handle the out-of-band challenge,
//! [`delegation`] talks to STS, and [`aws_identity`] ties them together.

pub mod assertion;
pub mod aws_identity;
pub mod config;
pub mod credential_process;
pub mod delegation;
pub mod duo;
pub mod error;
pub mod mfa;
pub mod okta_types;
pub mod role_selection;
pub mod transport;

pub use aws_identity::{AwsCredentials, OktaAuthenticator, OktaLogin};
pub use error::{AuthError, AuthResult};
