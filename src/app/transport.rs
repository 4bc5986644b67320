//! HTTP transport to the identity provider.
//!
//! Each request builds its own client with a fresh cookie jar; the provider
//! flow is correlated through the state/session tokens in the payloads, so no
//! cookies are carried between calls.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::assertion::FederationAssertion;
use super::error::{AuthError, AuthResult};
use super::okta_types::{PrimaryAuthRequest, StateTokenRequest, UserAuthState};

const AUTHN_PATH: &str = "api/v1/authn";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The identity-provider endpoints the authentication flow needs.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Submit username and password; returns the new transaction state.
    async fn primary_auth(&self, username: &str, password: &str) -> AuthResult<UserAuthState>;

    /// Verify (or re-poll) a factor using the transaction's state token.
    async fn verify_factor(&self, factor_id: &str, state_token: &str)
        -> AuthResult<UserAuthState>;

    /// Fetch the federation document with a one-time session token.
    async fn fetch_assertion(&self, session_token: &str) -> AuthResult<FederationAssertion>;
}

/// reqwest-backed transport against `https://{organization}.{domain}/`.
#[derive(Debug, Clone)]
pub struct OktaTransport {
    base_url: Url,
    federation_path: String,
}

impl OktaTransport {
    pub fn new(base_url: &str, federation_path: impl Into<String>) -> AuthResult<Self> {
        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|source| AuthError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        Ok(Self {
            base_url,
            federation_path: federation_path.into().trim_start_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        self.base_url
            .join(path)
            .map_err(|source| AuthError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                source,
            })
    }

    fn client(&self) -> reqwest::Result<reqwest::Client> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(REQUEST_TIMEOUT)
            .build()
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        json: bool,
    ) -> AuthResult<Response> {
        let client = self.client().map_err(|source| AuthError::Request {
            method: method.to_string(),
            url: redact_query(&url),
            source,
        })?;
        let mut request = client.request(method.clone(), url.clone());

        if json {
            let mut headers = HeaderMap::new();
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            request = request.headers(headers);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {}", method, redact_query(&url));
        let response = request.send().await.map_err(|source| AuthError::Request {
            method: method.to_string(),
            url: redact_query(&url),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Http {
                method: method.to_string(),
                url: redact_query(&url),
                status: status.to_string(),
            });
        }
        Ok(response)
    }

    async fn read_body(method: &Method, url: &Url, response: Response) -> AuthResult<String> {
        response.text().await.map_err(|source| AuthError::Request {
            method: method.to_string(),
            url: redact_query(url),
            source,
        })
    }

    /// Send a JSON request and strictly decode the JSON response.
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> AuthResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path)?;
        let response = self.send(method.clone(), url.clone(), body, true).await?;
        let text = Self::read_body(&method, &url, response).await?;
        serde_json::from_str(&text).map_err(|source| AuthError::Decode {
            url: redact_query(&url),
            source,
        })
    }

    /// Fetch a document and hand the whole body back undecoded.
    pub async fn request_document(&self, url: Url) -> AuthResult<String> {
        let response = self.send::<()>(Method::GET, url.clone(), None, false).await?;
        Self::read_body(&Method::GET, &url, response).await
    }

    fn federation_url(&self, session_token: &str) -> AuthResult<Url> {
        let mut url = self.endpoint(&self.federation_path)?;
        url.query_pairs_mut()
            .append_pair("onetimetoken", session_token);
        Ok(url)
    }
}

#[async_trait]
impl IdentityProvider for OktaTransport {
    async fn primary_auth(&self, username: &str, password: &str) -> AuthResult<UserAuthState> {
        let body = PrimaryAuthRequest { username, password };
        self.request_json(Method::POST, AUTHN_PATH, Some(&body)).await
    }

    async fn verify_factor(
        &self,
        factor_id: &str,
        state_token: &str,
    ) -> AuthResult<UserAuthState> {
        let path = format!("{}/factors/{}/verify", AUTHN_PATH, factor_id);
        let body = StateTokenRequest { state_token };
        self.request_json(Method::POST, &path, Some(&body)).await
    }

    async fn fetch_assertion(&self, session_token: &str) -> AuthResult<FederationAssertion> {
        let url = self.federation_url(session_token)?;
        let document = self.request_document(url).await?;
        FederationAssertion::from_document(&document)
    }
}

/// One-time tokens travel in the query string; keep them out of errors and logs.
fn redact_query(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.query().is_some() {
        let keys: Vec<String> = shown.query_pairs().map(|(k, _)| k.into_owned()).collect();
        shown.query_pairs_mut().clear();
        for key in keys {
            shown.query_pairs_mut().append_pair(&key, "redacted");
        }
    }
    shown.to_string()
}
