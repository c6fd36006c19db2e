//! tenant_registry
//!
//! Per-tenant database connection registry for a multi-tenant backend.
//! Each organization's data lives in its own database; this crate resolves
//! tenant ids to ready pooled connections, provisions and deletes tenant
//! databases, and keeps the organization directory on the core database.

pub mod admin;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod registry;
pub mod tenant_id;

pub use admin::{AddOrganizationRequest, AddedOrganization, OrganizationAdmin, RemovalOutcome};
pub use config::RegistryConfig;
pub use db::{InitMarker, SeaOrmDriver, StorageDriver};
pub use directory::{NewOrganization, OrganizationDirectory, TenantDirectory};
pub use error::{Result, TenantError};
pub use registry::deletion::{CollectionFailure, DeletionReport, DeletionStage};
pub use registry::health::HealthReport;
pub use registry::provision::{ProvisionOutcome, ProvisionStage, ProvisioningResult, Verification};
pub use registry::{EntryState, TenantConnection, TenantConnectionRegistry};
pub use tenant_id::{CanonicalId, TenantIdNormalizer};

// Re-export common utilities
pub use tenant_common::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registry over MySQL, as wired by a production composition root
pub type MySqlTenantRegistry = TenantConnectionRegistry<SeaOrmDriver>;

/// Build the production registry from a configuration
pub fn mysql_registry(config: RegistryConfig) -> MySqlTenantRegistry {
    let driver = SeaOrmDriver::new(config.clone());
    TenantConnectionRegistry::new(config, driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'), "Version should be in semver format");
    }

    #[tokio::test]
    async fn test_mysql_registry_starts_empty() {
        let registry = mysql_registry(RegistryConfig::default());
        assert!(registry.cached_tenants().is_empty());
        assert_eq!(registry.entry_state("acme").unwrap(), None);
        assert!(!registry.is_shut_down());
    }
}
