//! Error types for the tenant connection registry

use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

use crate::registry::deletion::DeletionReport;
use crate::registry::provision::ProvisionStage;

#[derive(Error, Debug)]
pub enum TenantError {
    #[error("Invalid tenant identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Timed out after {timeout:?} connecting to tenant {tenant}")]
    ConnectTimeout { tenant: String, timeout: Duration },

    #[error("Failed to connect to tenant {tenant}: {reason}")]
    ConnectError { tenant: String, reason: String },

    #[error("Provisioning tenant {tenant} failed at {stage}: {reason}")]
    ProvisionFailed {
        tenant: String,
        stage: ProvisionStage,
        reason: String,
    },

    #[error("Deletion of tenant {} incomplete: {}", .0.tenant_id, .0.summary())]
    PartialDeletion(Box<DeletionReport>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Directory error: {0}")]
    Directory(#[from] DbErr),
}

impl TenantError {
    /// Whether this error means "the tenant is absent or unreachable" rather
    /// than an internal failure. Request handlers map the former to a
    /// "check your organization id / try again later" response.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TenantError::NotFound(_)
                | TenantError::ConnectTimeout { .. }
                | TenantError::ConnectError { .. }
        )
    }

    pub(crate) fn connect(tenant: impl Into<String>, reason: impl ToString) -> Self {
        TenantError::ConnectError {
            tenant: tenant.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TenantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(TenantError::NotFound("acme".into()).is_unavailable());
        assert!(TenantError::connect("acme", "refused").is_unavailable());
        assert!(TenantError::ConnectTimeout {
            tenant: "acme".into(),
            timeout: Duration::from_secs(1),
        }
        .is_unavailable());

        assert!(!TenantError::InvalidIdentifier("a b".into()).is_unavailable());
        assert!(!TenantError::Conflict("acme".into()).is_unavailable());
        assert!(!TenantError::ProvisionFailed {
            tenant: "acme".into(),
            stage: ProvisionStage::Marker,
            reason: "disk full".into(),
        }
        .is_unavailable());
    }

    #[test]
    fn test_display_includes_stage() {
        let err = TenantError::ProvisionFailed {
            tenant: "acme".into(),
            stage: ProvisionStage::Probe,
            reason: "ping failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provisioning tenant acme failed at probe: ping failed"
        );
    }
}
