//! End-to-end checks against a real MySQL server
//!
//! Ignored by default. Run with a server reachable at `TENANT_BASE_DATABASE_URL`:
//! cargo test --test test_mysql_driver -- --ignored --nocapture

use serial_test::serial;
use tenant_registry::{
    mysql_registry, OrganizationDirectory, ProvisionOutcome, RegistryConfig, StorageDriver,
    TenantDirectory, TenantError, Verification,
};

fn live_config() -> RegistryConfig {
    RegistryConfig::from_env()
        .with_core_database("tenant_core_it")
        .with_tenant_prefix("tenant_it_")
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_provision_and_delete_roundtrip() {
    tenant_registry::set_and_init_console_logging("debug", "tenant_registry");
    let config = live_config();
    let registry = mysql_registry(config.clone());

    // Leftovers from an aborted run
    let _ = registry.delete_tenant("roundtrip").await;

    let collections = vec!["employees".to_string(), "leaves".to_string()];
    let provisioned = registry
        .provision_tenant("roundtrip", Some(collections.as_slice()))
        .await
        .expect("provisioning against MySQL");
    assert_eq!(provisioned.database_name, "tenant_it_roundtrip");
    assert_eq!(provisioned.outcome, ProvisionOutcome::Created);
    assert_eq!(provisioned.verification, Verification::Confirmed);

    let again = registry.provision_tenant("roundtrip", None).await.unwrap();
    assert_eq!(again.outcome, ProvisionOutcome::AlreadyProvisioned);
    assert!(registry.tenant_exists("tenant_it_roundtrip").await.unwrap());

    let report = registry.delete_tenant("roundtrip").await.unwrap();
    // Seeded collections plus the marker table
    assert_eq!(report.collections_found.len(), 3);
    assert!(report.is_complete());

    assert!(!registry.tenant_exists("roundtrip").await.unwrap());
    let err = registry.delete_tenant("roundtrip").await.unwrap_err();
    assert!(matches!(err, TenantError::NotFound(_)));

    registry.shutdown().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_directory_migrates_on_core_database() {
    let config = live_config();
    let registry = mysql_registry(config.clone());

    registry
        .driver()
        .create_database(&config.core_database)
        .await
        .expect("create core database");

    let directory = OrganizationDirectory::from_registry(&registry)
        .await
        .expect("open directory");
    directory.list().await.expect("organizations table exists");

    let health = registry.health_check().await;
    assert!(health.core);

    registry.shutdown().await;
}
