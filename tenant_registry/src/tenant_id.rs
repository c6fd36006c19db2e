//! Tenant identifier normalization
//!
//! Callers name a tenant either as `acme` or `tenant_acme`. Both must land on
//! the same cache entry and the same physical database, so every id passes
//! through [`TenantIdNormalizer`] before it is used as a key or a name.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, TenantError};

/// MySQL identifier length limit
pub const MAX_DATABASE_NAME_LEN: usize = 64;

/// Canonical tenant id. Only [`TenantIdNormalizer::normalize`] constructs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct TenantIdNormalizer {
    prefix: String,
    // Set when the prefix cannot form a database name; every id is then rejected
    prefix_error: Option<String>,
}

impl TenantIdNormalizer {
    /// Normalizer for `prefix`. An unusable prefix is not fatal here, but
    /// every [`normalize`](Self::normalize) call then fails with
    /// `InvalidIdentifier`. Use [`try_new`](Self::try_new) to reject it up front.
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim().to_ascii_lowercase();
        let prefix_error = check_prefix(&prefix).err();
        Self {
            prefix,
            prefix_error,
        }
    }

    pub fn try_new(prefix: &str) -> Result<Self> {
        let normalizer = Self::new(prefix);
        match &normalizer.prefix_error {
            Some(reason) => Err(TenantError::InvalidIdentifier(reason.clone())),
            None => Ok(normalizer),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Why the configured prefix is unusable, if it is
    pub fn prefix_error(&self) -> Option<&str> {
        self.prefix_error.as_deref()
    }

    /// Canonicalize a raw tenant id: trim, lowercase, strip every leading
    /// prefix, then check the result against the database-name charset.
    pub fn normalize(&self, raw: &str) -> Result<CanonicalId> {
        if let Some(reason) = &self.prefix_error {
            return Err(TenantError::InvalidIdentifier(reason.clone()));
        }

        let lowered = raw.trim().to_ascii_lowercase();

        let mut id = lowered.as_str();
        if !self.prefix.is_empty() {
            while let Some(rest) = id.strip_prefix(self.prefix.as_str()) {
                id = rest;
            }
        }

        if id.is_empty() {
            return Err(TenantError::InvalidIdentifier(format!(
                "tenant id {:?} is empty",
                raw
            )));
        }

        if let Some(bad) = id.chars().find(|c| !is_safe_char(*c)) {
            return Err(TenantError::InvalidIdentifier(format!(
                "tenant id {:?} contains disallowed character {:?}",
                raw, bad
            )));
        }

        if self.prefix.len() + id.len() > MAX_DATABASE_NAME_LEN {
            return Err(TenantError::InvalidIdentifier(format!(
                "tenant id {:?} is longer than {} characters",
                raw,
                MAX_DATABASE_NAME_LEN.saturating_sub(self.prefix.len())
            )));
        }

        Ok(CanonicalId(id.to_string()))
    }

    /// Physical database name for a tenant
    pub fn database_name(&self, id: &CanonicalId) -> String {
        format!("{}{}", self.prefix, id.0)
    }
}

/// A prefix must use the id charset and leave room for at least one id character
fn check_prefix(prefix: &str) -> std::result::Result<(), String> {
    if let Some(bad) = prefix.chars().find(|c| !is_safe_char(*c)) {
        return Err(format!(
            "tenant prefix {:?} contains disallowed character {:?}",
            prefix, bad
        ));
    }
    if prefix.len() >= MAX_DATABASE_NAME_LEN {
        return Err(format!(
            "tenant prefix {:?} leaves no room for a tenant id within {} characters",
            prefix, MAX_DATABASE_NAME_LEN
        ));
    }
    Ok(())
}

/// Characters allowed in tenant ids and seeded collection names
pub fn is_safe_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

/// Validate a collection name with the same charset as tenant ids
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_DATABASE_NAME_LEN || !name.chars().all(is_safe_char) {
        return Err(TenantError::InvalidIdentifier(format!(
            "collection name {:?} is not allowed",
            name
        )));
    }
    Ok(())
}
