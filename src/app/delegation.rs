//! STS delegation: assertion → temporary credentials → target role credentials.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials as StaticCredentials;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::Client as StsClient;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::aws_identity::AwsCredentials;
use super::error::{AuthError, AuthResult, DelegationStage};

/// Validity requested for the SAML-derived temporary credentials.
pub const ASSERTION_SESSION_SECONDS: i32 = 3600;

/// The two chained trust exchanges.
///
/// One network round-trip each, no retries. Failures carry the role ARN that
/// was being assumed.
#[async_trait]
pub trait DelegationClient: Send + Sync {
    async fn assume_with_assertion(
        &self,
        principal_arn: &str,
        role_arn: &str,
        raw_assertion: &str,
        duration_seconds: i32,
    ) -> AuthResult<AwsCredentials>;

    async fn assume_role(
        &self,
        caller: &AwsCredentials,
        target_role_arn: &str,
        session_name: &str,
    ) -> AuthResult<AwsCredentials>;
}

/// [`DelegationClient`] backed by the AWS STS SDK.
#[derive(Debug, Clone)]
pub struct StsDelegationClient {
    region: String,
}

impl StsDelegationClient {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

#[async_trait]
impl DelegationClient for StsDelegationClient {
    async fn assume_with_assertion(
        &self,
        principal_arn: &str,
        role_arn: &str,
        raw_assertion: &str,
        duration_seconds: i32,
    ) -> AuthResult<AwsCredentials> {
        // AssumeRoleWithSAML is unsigned; the assertion is the credential
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .no_credentials()
            .load()
            .await;
        let client = StsClient::new(&config);

        debug!("Calling AssumeRoleWithSAML for {}", role_arn);
        let response = client
            .assume_role_with_saml()
            .principal_arn(principal_arn)
            .role_arn(role_arn)
            .saml_assertion(raw_assertion)
            .duration_seconds(duration_seconds)
            .send()
            .await
            .map_err(|e| {
                AuthError::delegation(
                    DelegationStage::AssertionExchange,
                    role_arn,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        let creds = response.credentials().ok_or_else(|| {
            AuthError::delegation(
                DelegationStage::AssertionExchange,
                role_arn,
                "STS returned no credentials",
            )
        })?;
        convert_credentials(creds, DelegationStage::AssertionExchange, role_arn)
    }

    async fn assume_role(
        &self,
        caller: &AwsCredentials,
        target_role_arn: &str,
        session_name: &str,
    ) -> AuthResult<AwsCredentials> {
        let static_creds = StaticCredentials::new(
            &caller.access_key_id,
            &caller.secret_access_key,
            Some(caller.session_token.clone()),
            None,
            "okta-saml",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(static_creds)
            .load()
            .await;
        let client = StsClient::new(&config);

        debug!(
            "Calling AssumeRole for {} as session {}",
            target_role_arn, session_name
        );
        let response = client
            .assume_role()
            .role_arn(target_role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(|e| {
                AuthError::delegation(
                    DelegationStage::RoleChain,
                    target_role_arn,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        let creds = response.credentials().ok_or_else(|| {
            AuthError::delegation(
                DelegationStage::RoleChain,
                target_role_arn,
                "STS returned no credentials",
            )
        })?;
        convert_credentials(creds, DelegationStage::RoleChain, target_role_arn)
    }
}

fn convert_credentials(
    creds: &aws_sdk_sts::types::Credentials,
    stage: DelegationStage,
    role_arn: &str,
) -> AuthResult<AwsCredentials> {
    let expiration = smithy_to_chrono(creds.expiration()).ok_or_else(|| {
        AuthError::delegation(
            stage,
            role_arn,
            format!("unrepresentable expiration {}", creds.expiration()),
        )
    })?;

    Ok(AwsCredentials {
        access_key_id: creds.access_key_id().to_string(),
        secret_access_key: creds.secret_access_key().to_string(),
        session_token: creds.session_token().to_string(),
        expiration,
    })
}

fn smithy_to_chrono(timestamp: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smithy_timestamp_conversion() {
        let ts = aws_smithy_types::DateTime::from_secs_and_nanos(1_700_000_000, 500);
        let converted = smithy_to_chrono(&ts).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_nanos(), 500);
    }

    #[test]
    fn test_convert_credentials_copies_all_fields() {
        let sdk_creds = aws_sdk_sts::types::Credentials::builder()
            .access_key_id("ASIAEXAMPLE")
            .secret_access_key("secret")
            .session_token("token")
            .expiration(aws_smithy_types::DateTime::from_secs(1_700_003_600))
            .build()
            .unwrap();

        let creds = convert_credentials(
            &sdk_creds,
            DelegationStage::RoleChain,
            "arn:aws:iam::111:role/Target",
        )
        .unwrap();
        assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
        assert_eq!(creds.secret_access_key, "secret");
        assert_eq!(creds.session_token, "token");
        assert_eq!(creds.expiration.timestamp(), 1_700_003_600);
    }
}
