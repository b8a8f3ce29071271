//! Tenant identifiers.
//!
//! Every chunk, vector, and query belongs to exactly one tenant. The identifier doubles as a
//! payload filter value for Qdrant and as part of a file name for the local store, so the
//! accepted alphabet is deliberately narrow.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_TENANT_LEN: usize = 128;

/// Reasons a tenant identifier was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenantError {
    /// Identifier was empty after trimming.
    #[error("tenant id must not be empty")]
    Empty,
    /// Identifier exceeded the maximum length.
    #[error("tenant id exceeds {MAX_TENANT_LEN} characters")]
    TooLong,
    /// Identifier contained characters outside `[A-Za-z0-9._-]` or started with a dot.
    #[error("tenant id contains invalid characters: {0}")]
    InvalidCharacters(String),
}

/// Validated tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant identifier.
    pub fn new(value: impl AsRef<str>) -> Result<Self, TenantError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TenantError::Empty);
        }
        if trimmed.len() > MAX_TENANT_LEN {
            return Err(TenantError::TooLong);
        }
        let valid_chars = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_chars || trimmed.starts_with('.') {
            return Err(TenantError::InvalidCharacters(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl std::str::FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_trims_simple_ids() {
        let tenant = TenantId::new("  device-42_a.b ").expect("valid tenant");
        assert_eq!(tenant.as_str(), "device-42_a.b");
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        assert_eq!(TenantId::new("   "), Err(TenantError::Empty));
        assert!(matches!(
            TenantId::new("../etc"),
            Err(TenantError::InvalidCharacters(_))
        ));
        assert!(matches!(
            TenantId::new("a/b"),
            Err(TenantError::InvalidCharacters(_))
        ));
        assert_eq!(TenantId::new("x".repeat(129)), Err(TenantError::TooLong));
    }

    #[test]
    fn serde_round_trip_validates() {
        let tenant: TenantId = serde_json::from_str("\"acme\"").expect("deserialize");
        assert_eq!(tenant.as_str(), "acme");
        assert!(serde_json::from_str::<TenantId>("\"bad id\"").is_err());
    }
}
