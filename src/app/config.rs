//! Configuration loader.
//!
//! Settings live in a TOML file under the platform config directory
//! (`~/.config/okta-aws-auth/config.toml` on Linux). A few keys can be
//! overridden from the environment; the password is only ever read from the
//! environment.
//!
//! # config.toml Format
//!
//! ```toml
//! organization = "acme"
//! domain = "okta.com"
//! username = "jane@acme.com"
//! federation_path = "home/amazon_aws/0oa1b2c3d4/272"
//! region = "us-west-2"
//! source_role_arn = "arn:aws:iam::111122223333:role/OktaLogin"
//!
//! [mfa]
//! poll_interval_secs = 2
//! timeout_secs = 300
//! device = "phone2"
//!
//! [profiles.prod]
//! role_arn = "arn:aws:iam::444455556666:role/Admin"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::aws_identity::OktaLogin;
use super::mfa::MfaSettings;

pub const ENV_USERNAME: &str = "OKTA_USERNAME";
pub const ENV_ORGANIZATION: &str = "OKTA_ORGANIZATION";
pub const ENV_PASSWORD: &str = "OKTA_PASSWORD";

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfaConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,

    /// Duo device to push to; the user's primary phone when unset.
    pub device: Option<String>,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            timeout_secs: 300,
            device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub role_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OktaConfig {
    /// Okta tenant, e.g. `acme` for `acme.okta.com`.
    pub organization: String,

    pub domain: String,

    pub username: Option<String>,

    /// Path of the AWS app's embed link, e.g. `home/amazon_aws/<app-id>/272`.
    pub federation_path: String,

    /// Region used for STS calls.
    pub region: String,

    /// Replaces `https://{organization}.{domain}/` when set.
    pub base_url: Option<String>,

    /// SAML role to prefer when the assertion offers several.
    pub source_role_arn: Option<String>,

    pub mfa: MfaConfig,

    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Default for OktaConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            domain: "okta.com".to_string(),
            username: None,
            federation_path: String::new(),
            region: "us-west-2".to_string(),
            base_url: None,
            source_role_arn: None,
            mfa: MfaConfig::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl OktaConfig {
    /// `<config_dir>/config.toml` for this application, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "", "okta-aws-auth")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or from [`Self::default_path`] when none is given.
    ///
    /// A missing default file yields the defaults so the environment alone can
    /// configure a run; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_path(&path),
                Some(path) => {
                    debug!("No config file at {:?}, using defaults", path);
                    Ok(Self::default())
                }
                None => {
                    warn!("Could not determine a config directory, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: OktaConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(
            "Loaded config: organization={}, domain={}, region={}, profiles={}",
            config.organization,
            config.domain,
            config.region,
            config.profiles.len()
        );
        Ok(config)
    }

    /// Apply `OKTA_USERNAME` and `OKTA_ORGANIZATION` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.username = Some(username);
        }
        if let Some(organization) = lookup(ENV_ORGANIZATION).filter(|v| !v.is_empty()) {
            self.organization = organization;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.organization.trim().is_empty() && self.base_url.is_none() {
            bail!("organization is not configured (set it or {ENV_ORGANIZATION})");
        }
        if self.federation_path.trim().is_empty() {
            bail!("federation_path is not configured");
        }
        if self.mfa.poll_interval_secs == 0 {
            bail!("mfa.poll_interval_secs must be greater than zero");
        }
        if self.mfa.timeout_secs == 0 {
            bail!("mfa.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://{}.{}/", self.organization, self.domain),
        }
    }

    pub fn mfa_settings(&self) -> MfaSettings {
        MfaSettings {
            poll_interval: Duration::from_secs(self.mfa.poll_interval_secs),
            timeout: Duration::from_secs(self.mfa.timeout_secs),
        }
    }

    /// Target role from an explicit ARN or a named profile.
    pub fn resolve_role(&self, profile: Option<&str>, role_arn: Option<&str>) -> Result<String> {
        match (profile, role_arn) {
            (_, Some(arn)) => Ok(arn.to_string()),
            (Some(name), None) => self
                .profiles
                .get(name)
                .map(|p| p.role_arn.clone())
                .ok_or_else(|| anyhow!("unknown profile '{}'", name)),
            (None, None) => bail!("no target role: pass --role-arn or --profile"),
        }
    }

    /// Username from config and password from `OKTA_PASSWORD`.
    pub fn login<F>(&self, lookup: F) -> Result<OktaLogin>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = self
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("username is not configured (set it or {ENV_USERNAME})"))?;
        let password = lookup(ENV_PASSWORD)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("{ENV_PASSWORD} is not set"))?;
        Ok(OktaLogin::new(username, password))
    }
}
