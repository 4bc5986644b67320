//! Choosing which SAML role to exchange the assertion for.

use super::assertion::RolePair;

/// Picks one role pair out of the assertion's candidates.
///
/// Implementations must be deterministic: the same candidate list in the same
/// order always yields the same pair.
pub trait RoleSelector: Send + Sync {
    fn select<'a>(&self, candidates: &'a [RolePair]) -> Option<&'a RolePair>;
}

/// First listed candidate wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstRoleSelector;

impl RoleSelector for FirstRoleSelector {
    fn select<'a>(&self, candidates: &'a [RolePair]) -> Option<&'a RolePair> {
        candidates.first()
    }
}

/// Prefers the configured source role, falling back to the first candidate.
#[derive(Debug, Clone)]
pub struct PreferredRoleSelector {
    role_arn: String,
}

impl PreferredRoleSelector {
    pub fn new(role_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
        }
    }
}

impl RoleSelector for PreferredRoleSelector {
    fn select<'a>(&self, candidates: &'a [RolePair]) -> Option<&'a RolePair> {
        candidates
            .iter()
            .find(|pair| pair.role_arn == self.role_arn)
            .or_else(|| {
                tracing::warn!(
                    "Source role {} not granted by the assertion, using first candidate",
                    self.role_arn
                );
                candidates.first()
            })
    }
}
