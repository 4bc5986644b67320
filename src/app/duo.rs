//! Duo web-frame push dispatch.
//!
//! Drives the same exchange the Duo iframe performs in a browser: open an auth
//! frame for the transaction half of the signature, ask for a push to the
//! user's phone, wait for the approval, then post the signed response back to
//! the provider's completion callback so its own verification flips to SUCCESS.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::error::{AuthError, AuthResult};
use super::mfa::{PushDispatcher, PushVerification};

const FRAME_VERSION: &str = "2.6";

static SID_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<input[^>]*name\s*=\s*["']sid["'][^>]*value\s*=\s*["']([^"']+)["']"#)
        .expect("valid sid regex")
});

#[derive(Debug, Deserialize)]
struct DuoEnvelope<T> {
    stat: String,
    #[serde(default)]
    message: Option<String>,
    response: Option<T>,
}

impl<T> DuoEnvelope<T> {
    fn into_response(self, step: &str) -> AuthResult<T> {
        match (self.stat.as_str(), self.response) {
            ("OK", Some(response)) => Ok(response),
            _ => Err(AuthError::PushDispatch(format!(
                "{} returned {}: {}",
                step,
                self.stat,
                self.message.unwrap_or_default()
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    cookie: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    cookie: String,
}

/// Signature handed out by the provider: `TX|...:APP|...`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SplitSignature<'a> {
    tx: &'a str,
    app: &'a str,
}

fn split_signature(signature: &str) -> AuthResult<SplitSignature<'_>> {
    signature
        .split_once(':')
        .filter(|(tx, app)| !tx.is_empty() && !app.is_empty())
        .map(|(tx, app)| SplitSignature { tx, app })
        .ok_or_else(|| AuthError::PushDispatch("malformed Duo signature".to_string()))
}

/// [`PushDispatcher`] for Duo Security's web frame API.
#[derive(Debug, Clone)]
pub struct DuoPushDispatcher {
    device: String,
    factor: String,
    scheme: String,
    status_interval: Duration,
    timeout: Duration,
}

impl Default for DuoPushDispatcher {
    fn default() -> Self {
        Self {
            device: "phone1".to_string(),
            factor: "Duo Push".to_string(),
            scheme: "https".to_string(),
            status_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl DuoPushDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a device other than the user's primary phone.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Plain-HTTP frames, for local test servers.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    fn frame_url(&self, host: &str, path: &str) -> AuthResult<Url> {
        let raw = format!("{}://{}{}", self.scheme, host, path);
        Url::parse(&raw).map_err(|source| AuthError::InvalidUrl { url: raw, source })
    }

    fn client(&self) -> AuthResult<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_provider(Arc::new(reqwest::cookie::Jar::default()))
            .timeout(self.timeout)
            .build()
            .map_err(|e| AuthError::PushDispatch(format!("failed to build HTTP client: {}", e)))
    }

    async fn post_form(
        client: &reqwest::Client,
        url: Url,
        form: &[(&str, &str)],
    ) -> AuthResult<reqwest::Response> {
        let response = client
            .post(url.clone())
            .form(form)
            .send()
            .await
            .map_err(|source| AuthError::Request {
                method: "POST".to_string(),
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Http {
                method: "POST".to_string(),
                url: url.to_string(),
                status: status.to_string(),
            });
        }
        Ok(response)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        client: &reqwest::Client,
        url: Url,
        form: &[(&str, &str)],
    ) -> AuthResult<T> {
        let response = Self::post_form(client, url.clone(), form).await?;
        let text = response.text().await.map_err(|source| AuthError::Request {
            method: "POST".to_string(),
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| AuthError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Open the auth frame and return the Duo session id.
    async fn open_frame(
        &self,
        client: &reqwest::Client,
        verification: &PushVerification,
        tx: &str,
    ) -> AuthResult<String> {
        let mut url = self.frame_url(&verification.host, "/frame/web/v1/auth")?;
        url.query_pairs_mut()
            .append_pair("tx", tx)
            .append_pair("parent", &verification.callback_url)
            .append_pair("v", FRAME_VERSION);

        let response = Self::post_form(
            client,
            url.clone(),
            &[
                ("parent", verification.callback_url.as_str()),
                ("java_version", ""),
                ("flash_version", ""),
                ("screen_resolution_width", "1440"),
                ("screen_resolution_height", "900"),
                ("color_depth", "24"),
            ],
        )
        .await?;

        // Newer frames redirect to the prompt with the sid in the query
        if let Some(sid) = response
            .url()
            .query_pairs()
            .find(|(k, _)| k == "sid")
            .map(|(_, v)| v.into_owned())
        {
            return Ok(sid);
        }

        let body = response.text().await.map_err(|source| AuthError::Request {
            method: "POST".to_string(),
            url: url.to_string(),
            source,
        })?;
        SID_INPUT
            .captures(&body)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| AuthError::PushDispatch("Duo auth frame returned no sid".to_string()))
    }

    async fn wait_for_approval(
        &self,
        client: &reqwest::Client,
        host: &str,
        sid: &str,
        txid: &str,
    ) -> AuthResult<String> {
        loop {
            let status: StatusResponse = Self::post_json::<DuoEnvelope<StatusResponse>>(
                client,
                self.frame_url(host, "/frame/status")?,
                &[("sid", sid), ("txid", txid)],
            )
            .await?
            .into_response("status")?;

            debug!(
                "Duo status: code={:?} result={:?}",
                status.status_code, status.result
            );

            match status.result.as_deref() {
                Some("SUCCESS") => {
                    if let Some(cookie) = status.cookie {
                        return Ok(cookie);
                    }
                    let result_url = status.result_url.ok_or_else(|| {
                        AuthError::PushDispatch("Duo approval carried no result".to_string())
                    })?;
                    let result: ResultResponse = Self::post_json::<DuoEnvelope<ResultResponse>>(
                        client,
                        self.frame_url(host, &result_url)?,
                        &[("sid", sid)],
                    )
                    .await?
                    .into_response("result")?;
                    return Ok(result.cookie);
                }
                Some("FAILURE") => {
                    return Err(AuthError::PushDispatch(format!(
                        "Duo push denied: {}",
                        status
                            .reason
                            .or(status.status_code)
                            .unwrap_or_else(|| "unknown".to_string())
                    )));
                }
                _ => tokio::time::sleep(self.status_interval).await,
            }
        }
    }
}

#[async_trait]
impl PushDispatcher for DuoPushDispatcher {
    async fn dispatch(&self, verification: PushVerification) -> AuthResult<()> {
        let signature = split_signature(&verification.signature)?;
        let client = self.client()?;

        let sid = self.open_frame(&client, &verification, signature.tx).await?;

        let prompt: PromptResponse = Self::post_json::<DuoEnvelope<PromptResponse>>(
            &client,
            self.frame_url(&verification.host, "/frame/prompt")?,
            &[
                ("sid", sid.as_str()),
                ("device", self.device.as_str()),
                ("factor", self.factor.as_str()),
                ("out_of_date", "False"),
            ],
        )
        .await?
        .into_response("prompt")?;
        info!("Duo push sent to {}", self.device);

        let cookie = self
            .wait_for_approval(&client, &verification.host, &sid, &prompt.txid)
            .await?;

        let sig_response = format!("{}:{}", cookie, signature.app);
        let callback = Url::parse(&verification.callback_url).map_err(|source| {
            AuthError::InvalidUrl {
                url: verification.callback_url.clone(),
                source,
            }
        })?;
        Self::post_form(
            &client,
            callback,
            &[
                ("stateToken", verification.state_token.as_str()),
                ("sig_response", sig_response.as_str()),
            ],
        )
        .await?;

        info!("Duo approval posted back to the provider");
        Ok(())
    }
}
