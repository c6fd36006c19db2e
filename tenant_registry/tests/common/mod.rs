//! Shared helpers for the registry integration tests
//!
//! `FakeDriver` keeps databases, collections and markers in memory, counts
//! connect attempts per database and can be told to hang, fail or slow down.
//! `InMemoryDirectory` stands in for the organizations table.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DbErr;
use tenant_registry::db::entities::{OrganizationModel, OrganizationStatus};
use tenant_registry::{
    CanonicalId, InitMarker, NewOrganization, RegistryConfig, StorageDriver, TenantConnectionRegistry,
    TenantDirectory,
};
use uuid::Uuid;

#[allow(dead_code)]
pub const CORE_DATABASE: &str = "tenant_core_test";

/// Connection handle handed out by [`FakeDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeConn {
    pub database: String,
    pub serial: u64,
}

#[derive(Debug, Default)]
struct FakeDatabase {
    collections: BTreeSet<String>,
    marker: Option<InitMarker>,
}

#[derive(Debug, Default)]
struct FakeState {
    databases: BTreeMap<String, FakeDatabase>,
    connect_attempts: HashMap<String, usize>,
    open: HashSet<u64>,
    closed: Vec<FakeConn>,
    // Remaining connect attempts per database that never complete
    hanging_connects: HashMap<String, usize>,
    failing_connects: HashSet<String>,
    failing_pings: HashSet<String>,
    failing_drops: HashSet<(String, String)>,
    failing_collection_lists: HashSet<String>,
    failing_database_list: bool,
    failing_database_drops: HashSet<String>,
    failing_marker_writes: HashSet<String>,
    // Marker reads per database that still answer before the rest hang
    marker_reads_before_hang: HashMap<String, usize>,
    shutdown_calls: usize,
}

#[derive(Debug)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
    connect_delay: Duration,
    next_serial: AtomicU64,
}

fn fake_err(message: impl Into<String>) -> DbErr {
    DbErr::Custom(message.into())
}

#[allow(dead_code)]
impl FakeDriver {
    /// Driver whose server already holds the core database
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state
            .databases
            .insert(CORE_DATABASE.to_string(), FakeDatabase::default());

        Self {
            state: Mutex::new(state),
            connect_delay: Duration::ZERO,
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Create a database holding `collections`, as if provisioned earlier
    pub fn add_database(&self, database: &str, collections: &[&str]) {
        let mut state = self.state();
        let db = state.databases.entry(database.to_string()).or_default();
        db.collections
            .extend(collections.iter().map(|name| name.to_string()));
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.state().databases.contains_key(database)
    }

    pub fn collections(&self, database: &str) -> Vec<String> {
        self.state()
            .databases
            .get(database)
            .map(|db| db.collections.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn marker(&self, database: &str) -> Option<InitMarker> {
        self.state()
            .databases
            .get(database)
            .and_then(|db| db.marker.clone())
    }

    pub fn connect_attempts(&self, database: &str) -> usize {
        self.state()
            .connect_attempts
            .get(database)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_connect_attempts(&self) -> usize {
        self.state().connect_attempts.values().sum()
    }

    pub fn open_connections(&self) -> usize {
        self.state().open.len()
    }

    pub fn closed_connections(&self) -> Vec<FakeConn> {
        self.state().closed.clone()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state().shutdown_calls
    }

    /// The next `attempts` connects to `database` never complete
    pub fn hang_connects(&self, database: &str, attempts: usize) {
        self.state()
            .hanging_connects
            .insert(database.to_string(), attempts);
    }

    pub fn fail_connects(&self, database: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing_connects.insert(database.to_string());
        } else {
            state.failing_connects.remove(database);
        }
    }

    pub fn fail_pings(&self, database: &str) {
        self.state().failing_pings.insert(database.to_string());
    }

    pub fn fail_drop(&self, database: &str, collection: &str) {
        self.state()
            .failing_drops
            .insert((database.to_string(), collection.to_string()));
    }

    pub fn fail_collection_list(&self, database: &str) {
        self.state()
            .failing_collection_lists
            .insert(database.to_string());
    }

    pub fn fail_database_list(&self, fail: bool) {
        self.state().failing_database_list = fail;
    }

    pub fn fail_database_drop(&self, database: &str) {
        self.state()
            .failing_database_drops
            .insert(database.to_string());
    }

    pub fn fail_marker_writes(&self, database: &str) {
        self.state()
            .failing_marker_writes
            .insert(database.to_string());
    }

    /// Marker reads on `database` hang once `answered` of them have returned
    pub fn hang_marker_reads_after(&self, database: &str, answered: usize) {
        self.state()
            .marker_reads_before_hang
            .insert(database.to_string(), answered);
    }
}

#[async_trait]
impl StorageDriver for FakeDriver {
    type Conn = FakeConn;

    async fn connect(&self, database: &str) -> Result<FakeConn, DbErr> {
        let hang = {
            let mut state = self.state();
            *state
                .connect_attempts
                .entry(database.to_string())
                .or_insert(0) += 1;

            match state.hanging_connects.get_mut(database) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let mut state = self.state();
        if state.failing_connects.contains(database) {
            return Err(fake_err(format!("Access denied to database '{}'", database)));
        }
        if !state.databases.contains_key(database) {
            return Err(fake_err(format!("Unknown database '{}'", database)));
        }

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        state.open.insert(serial);
        Ok(FakeConn {
            database: database.to_string(),
            serial,
        })
    }

    async fn ping(&self, conn: &FakeConn) -> Result<(), DbErr> {
        let state = self.state();
        if !state.open.contains(&conn.serial) {
            return Err(fake_err("connection is closed"));
        }
        if state.failing_pings.contains(&conn.database) {
            return Err(fake_err("server has gone away"));
        }
        if !state.databases.contains_key(&conn.database) {
            return Err(fake_err(format!("Unknown database '{}'", conn.database)));
        }
        Ok(())
    }

    async fn close(&self, conn: FakeConn) -> Result<(), DbErr> {
        let mut state = self.state();
        state.open.remove(&conn.serial);
        state.closed.push(conn);
        Ok(())
    }

    async fn create_database(&self, database: &str) -> Result<(), DbErr> {
        self.state()
            .databases
            .entry(database.to_string())
            .or_default();
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, DbErr> {
        let state = self.state();
        if state.failing_database_list {
            return Err(fake_err("SHOW DATABASES denied"));
        }
        Ok(state.databases.keys().cloned().collect())
    }

    async fn drop_database(&self, database: &str) -> Result<(), DbErr> {
        let mut state = self.state();
        if state.failing_database_drops.contains(database) {
            return Err(fake_err(format!("Can't drop database '{}'", database)));
        }
        state
            .databases
            .remove(database)
            .map(|_| ())
            .ok_or_else(|| fake_err(format!("Unknown database '{}'", database)))
    }

    async fn list_collections(&self, conn: &FakeConn) -> Result<Vec<String>, DbErr> {
        let state = self.state();
        if state.failing_collection_lists.contains(&conn.database) {
            return Err(fake_err("information_schema unavailable"));
        }
        state
            .databases
            .get(&conn.database)
            .map(|db| db.collections.iter().cloned().collect())
            .ok_or_else(|| fake_err(format!("Unknown database '{}'", conn.database)))
    }

    async fn create_collection(&self, conn: &FakeConn, name: &str) -> Result<(), DbErr> {
        let mut state = self.state();
        let db = state
            .databases
            .get_mut(&conn.database)
            .ok_or_else(|| fake_err(format!("Unknown database '{}'", conn.database)))?;
        db.collections.insert(name.to_string());
        Ok(())
    }

    async fn drop_collection(&self, conn: &FakeConn, name: &str) -> Result<(), DbErr> {
        let mut state = self.state();
        if state
            .failing_drops
            .contains(&(conn.database.clone(), name.to_string()))
        {
            return Err(fake_err(format!("Lock wait timeout dropping '{}'", name)));
        }
        let db = state
            .databases
            .get_mut(&conn.database)
            .ok_or_else(|| fake_err(format!("Unknown database '{}'", conn.database)))?;
        if db.collections.remove(name) {
            Ok(())
        } else {
            Err(fake_err(format!("Unknown table '{}'", name)))
        }
    }

    async fn read_marker(&self, conn: &FakeConn) -> Result<Option<InitMarker>, DbErr> {
        let hang = match self.state().marker_reads_before_hang.get_mut(&conn.database) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        if hang {
            std::future::pending::<()>().await;
        }

        self.state()
            .databases
            .get(&conn.database)
            .map(|db| db.marker.clone())
            .ok_or_else(|| fake_err(format!("Unknown database '{}'", conn.database)))
    }

    async fn write_marker(&self, conn: &FakeConn, marker: &InitMarker) -> Result<(), DbErr> {
        let mut state = self.state();
        if state.failing_marker_writes.contains(&conn.database) {
            return Err(fake_err("INSERT command denied on '_tenant_meta'"));
        }
        let db = state
            .databases
            .get_mut(&conn.database)
            .ok_or_else(|| fake_err(format!("Unknown database '{}'", conn.database)))?;
        if db.marker.is_some() {
            return Err(fake_err("Duplicate entry for key 'PRIMARY'"));
        }
        db.marker = Some(marker.clone());
        Ok(())
    }

    async fn shutdown(&self) {
        self.state().shutdown_calls += 1;
    }
}

/// Short timeouts so hanging connects fail fast
#[allow(dead_code)]
pub fn test_config() -> RegistryConfig {
    RegistryConfig::default()
        .with_core_database(CORE_DATABASE)
        .with_connect_timeout(Duration::from_millis(200))
        .with_probe_timeout(Duration::from_millis(100))
        .with_operation_timeout(Duration::from_secs(2))
}

#[allow(dead_code)]
pub fn registry() -> TenantConnectionRegistry<FakeDriver> {
    registry_with(FakeDriver::new())
}

#[allow(dead_code)]
pub fn registry_with(driver: FakeDriver) -> TenantConnectionRegistry<FakeDriver> {
    init_test_logging();
    TenantConnectionRegistry::new(test_config(), driver)
}

#[allow(dead_code)]
pub fn init_test_logging() {
    tenant_registry::set_and_init_console_logging("debug", "tenant_registry");
}

/// Organizations table kept in memory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    records: Mutex<BTreeMap<String, OrganizationModel>>,
    fail_inserts: Mutex<bool>,
    fail_removals: Mutex<bool>,
}

#[allow(dead_code)]
impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        *self.fail_inserts.lock().unwrap() = fail;
    }

    pub fn fail_removals(&self, fail: bool) {
        *self.fail_removals.lock().unwrap() = fail;
    }

    pub fn contains(&self, code: &str) -> bool {
        self.records.lock().unwrap().contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryDirectory {
    async fn find_by_code(&self, code: &CanonicalId) -> Result<Option<OrganizationModel>, DbErr> {
        Ok(self.records.lock().unwrap().get(code.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<OrganizationModel>, DbErr> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn insert(&self, org: NewOrganization) -> Result<OrganizationModel, DbErr> {
        if *self.fail_inserts.lock().unwrap() {
            return Err(fake_err("directory is read-only"));
        }

        let mut records = self.records.lock().unwrap();
        if records.contains_key(org.code.as_str()) {
            return Err(fake_err("Duplicate entry for key 'idx_organizations_code'"));
        }

        let now = Utc::now();
        let model = OrganizationModel {
            id: Uuid::new_v4().to_string(),
            name: org.name,
            code: org.code.to_string(),
            database_name: org.database_name,
            description: org.description,
            contact_info: org.contact_info,
            status: OrganizationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        records.insert(model.code.clone(), model.clone());
        Ok(model)
    }

    async fn set_status(
        &self,
        code: &CanonicalId,
        status: OrganizationStatus,
    ) -> Result<Option<OrganizationModel>, DbErr> {
        let mut records = self.records.lock().unwrap();
        Ok(records.get_mut(code.as_str()).map(|record| {
            record.status = status;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn remove_by_code(&self, code: &CanonicalId) -> Result<bool, DbErr> {
        if *self.fail_removals.lock().unwrap() {
            return Err(fake_err("directory is read-only"));
        }
        Ok(self.records.lock().unwrap().remove(code.as_str()).is_some())
    }
}
