//! Federation assertion extraction.
//!
//! The provider's federation endpoint returns an HTML page whose auto-submit
//! form carries the base64 SAML response. The raw value is kept exactly as the
//! page delivered it (STS wants the same base64 text back), and the decoded XML
//! is only read to list the `(principal, role)` pairs it grants.

use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::error::{AuthError, AuthResult};

/// SAML attribute listing the roles the identity may assume.
pub const AWS_ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

const SAML_RESPONSE_FIELD: &str = "SAMLResponse";

static INPUT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("valid input tag regex"));

static TAG_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute regex")
});

static CHAR_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);").expect("valid entity regex")
});

/// One assumable role and the SAML provider that vouches for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RolePair {
    pub principal_arn: String,
    pub role_arn: String,
}

impl RolePair {
    pub fn new(principal_arn: impl Into<String>, role_arn: impl Into<String>) -> Self {
        Self {
            principal_arn: principal_arn.into(),
            role_arn: role_arn.into(),
        }
    }

    /// Parse a role attribute value: `principal,role` in either order.
    fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return None;
        }
        let principal = parts.iter().find(|p| p.contains(":saml-provider/"))?;
        let role = parts.iter().find(|p| p.contains(":role/"))?;
        Some(Self::new(*principal, *role))
    }
}

/// The assertion as delivered by the provider plus the role pairs it grants.
#[derive(Clone, PartialEq)]
pub struct FederationAssertion {
    raw: String,
    roles: Vec<RolePair>,
}

impl FederationAssertion {
    /// Extract the assertion from the provider's federation document.
    pub fn from_document(document: &str) -> AuthResult<Self> {
        let raw = find_saml_response(document).ok_or_else(|| {
            AuthError::InvalidAssertion(format!("no {} field in document", SAML_RESPONSE_FIELD))
        })?;
        Self::from_raw(raw)
    }

    /// Build from the base64 SAML response text.
    pub fn from_raw(raw: String) -> AuthResult<Self> {
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let xml_bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| AuthError::InvalidAssertion(format!("base64 decode failed: {}", e)))?;
        let xml = String::from_utf8(xml_bytes)
            .map_err(|e| AuthError::InvalidAssertion(format!("assertion is not UTF-8: {}", e)))?;
        let roles = roles_from_xml(&xml)?;

        debug!("Federation assertion grants {} role(s)", roles.len());
        Ok(Self { raw, roles })
    }

    /// Base64 assertion exactly as the provider returned it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Candidate role pairs in document order.
    pub fn roles(&self) -> &[RolePair] {
        &self.roles
    }
}

impl std::fmt::Debug for FederationAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationAssertion")
            .field("raw_len", &self.raw.len())
            .field("roles", &self.roles)
            .finish()
    }
}

fn find_saml_response(document: &str) -> Option<String> {
    INPUT_TAG.find_iter(document).find_map(|tag| {
        let mut name = None;
        let mut value = None;
        for caps in TAG_ATTRIBUTE.captures_iter(tag.as_str()) {
            let attr_value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match caps[1].to_ascii_lowercase().as_str() {
                "name" => name = attr_value,
                "value" => value = attr_value,
                _ => {}
            }
        }
        match (name, value) {
            (Some(SAML_RESPONSE_FIELD), Some(v)) => Some(decode_char_references(v)),
            _ => None,
        }
    })
}

/// Resolve HTML character references (`&#x2b;`, `&#61;`, `&amp;`...).
fn decode_char_references(value: &str) -> String {
    CHAR_REFERENCE
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = if let Some(hex) = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        entity[1..].parse::<u32>().ok()
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn roles_from_xml(xml: &str) -> AuthResult<Vec<RolePair>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| AuthError::InvalidAssertion(format!("malformed SAML XML: {}", e)))?;

    let mut roles = Vec::new();
    for attribute in doc.descendants().filter(|n| {
        n.is_element()
            && n.tag_name().name() == "Attribute"
            && n.attribute("Name") == Some(AWS_ROLE_ATTRIBUTE)
    }) {
        for value in attribute
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "AttributeValue")
        {
            let text = value.text().unwrap_or_default();
            match RolePair::parse(text) {
                Some(pair) => roles.push(pair),
                None => warn!("Skipping malformed role attribute value: {}", text.trim()),
            }
        }
    }
    Ok(roles)
}
