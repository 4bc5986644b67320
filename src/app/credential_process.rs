//! Rendering of issued credentials for the AWS CLI and shells.

use chrono::SecondsFormat;
use serde::Serialize;

use super::aws_identity::AwsCredentials;

/// How the binary prints the final credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// `credential_process` JSON.
    #[default]
    Json,
    /// `export` lines for `eval`.
    Env,
}

/// The JSON document the AWS SDKs expect from a `credential_process` command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialProcessOutput<'a> {
    pub version: u8,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: &'a str,
    pub expiration: String,
}

impl<'a> From<&'a AwsCredentials> for CredentialProcessOutput<'a> {
    fn from(creds: &'a AwsCredentials) -> Self {
        Self {
            version: 1,
            access_key_id: &creds.access_key_id,
            secret_access_key: &creds.secret_access_key,
            session_token: &creds.session_token,
            expiration: creds.expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

pub fn render(creds: &AwsCredentials, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&CredentialProcessOutput::from(creds)),
        OutputFormat::Env => Ok(env_exports(creds)),
    }
}

fn env_exports(creds: &AwsCredentials) -> String {
    [
        ("AWS_ACCESS_KEY_ID", creds.access_key_id.clone()),
        ("AWS_SECRET_ACCESS_KEY", creds.secret_access_key.clone()),
        ("AWS_SESSION_TOKEN", creds.session_token.clone()),
        (
            "AWS_CREDENTIAL_EXPIRATION",
            creds.expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ]
    .iter()
    .map(|(key, value)| format!("export {}={}\n", key, value))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI".to_string(),
            session_token: "FwoGZXIvYXdzEJr".to_string(),
            expiration: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_credential_process_json() {
        let creds = credentials();
        insta::assert_json_snapshot!(CredentialProcessOutput::from(&creds), @r###"
        {
          "Version": 1,
          "AccessKeyId": "ASIAEXAMPLE",
          "SecretAccessKey": "wJalrXUtnFEMI",
          "SessionToken": "FwoGZXIvYXdzEJr",
          "Expiration": "2024-05-01T12:30:00Z"
        }
        "###);
    }

    #[test]
    fn test_env_format() {
        let rendered = render(&credentials(), OutputFormat::Env).unwrap();
        insta::assert_snapshot!(rendered.trim_end(), @r###"
        export AWS_ACCESS_KEY_ID=ASIAEXAMPLE
        export AWS_SECRET_ACCESS_KEY=wJalrXUtnFEMI
        export AWS_SESSION_TOKEN=FwoGZXIvYXdzEJr
        export AWS_CREDENTIAL_EXPIRATION=2024-05-01T12:30:00Z
        "###);
    }

    #[test]
    fn test_json_render_parses_back() {
        let rendered = render(&credentials(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["Version"], 1);
        assert_eq!(value["Expiration"], "2024-05-01T12:30:00Z");
    }
}
