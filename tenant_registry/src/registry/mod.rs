//! Tenant connection registry
//!
//! Maps canonical tenant ids to pooled connections, plus one connection to
//! the shared core database. The registry is an ordinary value built by the
//! composition root; clones share the same map.
//!
//! Creation is single-flight: the `DashMap` entry API makes check-then-insert
//! atomic, and only the caller that inserted the `Connecting` entry starts a
//! connect. The connect runs on its own task so a cancelled request cannot
//! leave the entry stuck in `Connecting`.

pub mod deletion;
pub mod entry;
pub mod health;
pub mod provision;

use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use sea_orm::DbErr;

use crate::config::RegistryConfig;
use crate::db::StorageDriver;
use crate::error::{Result, TenantError};
use crate::tenant_id::{CanonicalId, TenantIdNormalizer};
use crate::{debug, error, info, warn};

pub use entry::{ConnectFailure, ConnectionEntry, EntryState};

/// Map key: the core database or one tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Core,
    Tenant(CanonicalId),
}

impl EntryKey {
    fn label(&self) -> &str {
        match self {
            EntryKey::Core => "core",
            EntryKey::Tenant(id) => id.as_str(),
        }
    }
}

/// A ready tenant connection handed to request handlers
#[derive(Debug, Clone)]
pub struct TenantConnection<C> {
    tenant_id: CanonicalId,
    database_name: String,
    conn: C,
}

impl<C> TenantConnection<C> {
    pub fn tenant_id(&self) -> &CanonicalId {
        &self.tenant_id
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }
}

impl<C> Deref for TenantConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

type SharedEntry<D> = Arc<ConnectionEntry<<D as StorageDriver>::Conn>>;

struct RegistryInner<D: StorageDriver> {
    config: RegistryConfig,
    normalizer: TenantIdNormalizer,
    driver: D,
    entries: DashMap<EntryKey, SharedEntry<D>>,
    // Tenants with a deletion in progress
    deleting: DashSet<CanonicalId>,
    shut_down: AtomicBool,
}

pub struct TenantConnectionRegistry<D: StorageDriver> {
    inner: Arc<RegistryInner<D>>,
}

impl<D: StorageDriver> Clone for TenantConnectionRegistry<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: StorageDriver> TenantConnectionRegistry<D> {
    pub fn new(config: RegistryConfig, driver: D) -> Self {
        info!(
            "[REGISTRY] Creating tenant connection registry (core database: {}, prefix: {:?})",
            config.core_database, config.tenant_prefix
        );

        let normalizer = TenantIdNormalizer::new(&config.tenant_prefix);
        if let Some(reason) = normalizer.prefix_error() {
            error!("[REGISTRY] Every tenant lookup will be refused: {}", reason);
        }

        Self {
            inner: Arc::new(RegistryInner {
                normalizer,
                config,
                driver,
                entries: DashMap::new(),
                deleting: DashSet::new(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Canonicalize a raw tenant id without touching storage
    pub fn normalize(&self, raw: &str) -> Result<CanonicalId> {
        self.inner.normalizer.normalize(raw)
    }

    pub fn database_name(&self, id: &CanonicalId) -> String {
        self.inner.normalizer.database_name(id)
    }

    /// Ready connection for a tenant, creating it on first use
    pub async fn get_connection(&self, tenant: &str) -> Result<TenantConnection<D::Conn>> {
        let id = self.normalize(tenant)?;
        if self.inner.deleting.contains(&id) {
            return Err(TenantError::NotFound(format!(
                "tenant {} is being deleted",
                id
            )));
        }
        self.connect_tenant(&id).await
    }

    /// Ready connection to the shared core database
    pub async fn get_core_connection(&self) -> Result<D::Conn> {
        self.inner.ensure_open("core")?;
        self.inner.connect(&EntryKey::Core).await
    }

    /// Connect or reuse, then ping. Any failure reads as "does not exist".
    pub async fn tenant_exists(&self, tenant: &str) -> Result<bool> {
        let id = self.normalize(tenant)?;

        match self.get_connection(id.as_str()).await {
            Ok(conn) => Ok(self.inner.probe(conn.conn()).await),
            Err(e) => {
                debug!("[REGISTRY] Tenant {} not reachable: {}", id, e);
                Ok(false)
            }
        }
    }

    /// Evict and close one tenant's connection. Returns whether an entry was cached.
    pub async fn close_connection(&self, tenant: &str) -> Result<bool> {
        let id = self.normalize(tenant)?;
        Ok(self.inner.close_key(&EntryKey::Tenant(id)).await)
    }

    /// Evict and close every connection, core included. Individual failures
    /// are logged; returns how many entries were evicted.
    pub async fn close_all(&self) -> usize {
        let keys: Vec<EntryKey> = self
            .inner
            .entries
            .iter()
            .map(|item| item.key().clone())
            .collect();

        info!("[REGISTRY] Closing {} cached connections", keys.len());

        let mut closed = 0;
        for key in keys {
            if self.inner.close_key(&key).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close everything and refuse further lookups. Called once at process exit.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!("[REGISTRY] Shutdown already performed");
            return;
        }

        info!("[REGISTRY] Shutting down tenant connection registry...");
        let closed = self.close_all().await;
        self.inner.driver.shutdown().await;
        info!(
            "[REGISTRY] Shutdown completed, {} connections closed",
            closed
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Canonical ids of every cached tenant entry
    pub fn cached_tenants(&self) -> Vec<CanonicalId> {
        let mut tenants: Vec<CanonicalId> = self
            .inner
            .entries
            .iter()
            .filter_map(|item| match item.key() {
                EntryKey::Tenant(id) => Some(id.clone()),
                EntryKey::Core => None,
            })
            .collect();
        tenants.sort();
        tenants
    }

    /// State of a tenant's cached entry, `None` when nothing is cached
    pub fn entry_state(&self, tenant: &str) -> Result<Option<EntryState>> {
        let id = self.normalize(tenant)?;
        Ok(self
            .inner
            .entries
            .get(&EntryKey::Tenant(id))
            .map(|entry| entry.state()))
    }

    /// Lookup without the deletion guard; used by the workflows themselves
    pub(crate) async fn connect_tenant(
        &self,
        id: &CanonicalId,
    ) -> Result<TenantConnection<D::Conn>> {
        self.inner.ensure_open(id.as_str())?;
        let conn = self.inner.connect(&EntryKey::Tenant(id.clone())).await?;

        Ok(TenantConnection {
            tenant_id: id.clone(),
            database_name: self.database_name(id),
            conn,
        })
    }

    pub(crate) async fn evict_tenant(&self, id: &CanonicalId) -> bool {
        self.inner.close_key(&EntryKey::Tenant(id.clone())).await
    }

    /// Claim a tenant for deletion; `None` if another deletion holds it
    pub(crate) fn claim_deletion(&self, id: &CanonicalId) -> Option<DeletionClaim<D>> {
        if self.inner.deleting.insert(id.clone()) {
            Some(DeletionClaim {
                inner: self.inner.clone(),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub(crate) fn is_deleting(&self, id: &CanonicalId) -> bool {
        self.inner.deleting.contains(id)
    }

    pub(crate) async fn probe(&self, conn: &D::Conn) -> bool {
        self.inner.probe(conn).await
    }

    /// Run a storage operation bounded by the operation timeout
    pub(crate) async fn bounded<T, F>(&self, what: &str, fut: F) -> std::result::Result<T, DbErr>
    where
        F: Future<Output = std::result::Result<T, DbErr>>,
    {
        let limit = self.inner.config.operation_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(DbErr::Custom(format!(
                "{} timed out after {:?}",
                what, limit
            ))),
        }
    }
}

/// Releases the deletion claim when the workflow exits, whatever the path
pub(crate) struct DeletionClaim<D: StorageDriver> {
    inner: Arc<RegistryInner<D>>,
    id: CanonicalId,
}

impl<D: StorageDriver> Drop for DeletionClaim<D> {
    fn drop(&mut self) {
        self.inner.deleting.remove(&self.id);
    }
}

impl<D: StorageDriver> RegistryInner<D> {
    fn ensure_open(&self, label: &str) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TenantError::connect(label, "registry is shut down"));
        }
        Ok(())
    }

    fn database_name(&self, key: &EntryKey) -> String {
        match key {
            EntryKey::Core => self.config.core_database.clone(),
            EntryKey::Tenant(id) => self.normalizer.database_name(id),
        }
    }

    /// Existing entry, or a fresh `Connecting` one whose connect has been started
    fn acquire(self: &Arc<Self>, key: &EntryKey) -> SharedEntry<D> {
        loop {
            match self.entries.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    let entry = occupied.get().clone();
                    match entry.state() {
                        EntryState::Connecting | EntryState::Ready => return entry,
                        // Settled badly but not yet evicted; replace it
                        EntryState::Errored | EntryState::Closed => {
                            occupied.remove();
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    let entry = Arc::new(ConnectionEntry::connecting(
                        key.label(),
                        self.database_name(key),
                    ));
                    vacant.insert(entry.clone());

                    debug!(
                        "[REGISTRY] Created entry for {}, starting connect to {}",
                        key.label(),
                        entry.database_name()
                    );
                    tokio::spawn(self.clone().drive_connect(key.clone(), entry.clone()));
                    return entry;
                }
            }
        }
    }

    async fn connect(self: &Arc<Self>, key: &EntryKey) -> Result<D::Conn> {
        let entry = self.acquire(key);

        // Shutdown may have snapshotted the map between our open check and the insert
        if self.shut_down.load(Ordering::SeqCst) {
            if self
                .entries
                .remove_if(key, |_, cached| Arc::ptr_eq(cached, &entry))
                .is_some()
            {
                self.close_entry(key, &entry).await;
            }
            return Err(TenantError::connect(key.label(), "registry is shut down"));
        }

        if let Some(conn) = entry.handle() {
            return Ok(conn);
        }

        match entry.wait_ready(self.config.connect_timeout).await {
            Ok(conn) => Ok(conn),
            Err(failure) => {
                self.evict_settled(key, &entry);
                Err(failure.into_error(key.label()))
            }
        }
    }

    async fn drive_connect(self: Arc<Self>, key: EntryKey, entry: SharedEntry<D>) {
        let limit = self.config.connect_timeout;
        let attempt = tokio::time::timeout(limit, self.driver.connect(entry.database_name())).await;

        match attempt {
            Ok(Ok(conn)) => match entry.mark_ready(conn) {
                Ok(()) => info!(
                    "[REGISTRY] Connection for {} ready ({})",
                    key.label(),
                    entry.database_name()
                ),
                Err(late) => {
                    warn!(
                        "[REGISTRY] Connection for {} finished after its entry was settled, closing it",
                        key.label()
                    );
                    if let Err(e) = self.driver.close(late).await {
                        error!(
                            "[REGISTRY] Failed to close late connection for {}: {}",
                            key.label(),
                            e
                        );
                    }
                }
            },
            Ok(Err(e)) => {
                error!("[REGISTRY] Connect to {} failed: {}", key.label(), e);
                entry.mark_errored(ConnectFailure::Driver(e.to_string()));
                self.evict_settled(&key, &entry);
            }
            Err(_) => {
                warn!(
                    "[REGISTRY] Connect to {} timed out after {:?}",
                    key.label(),
                    limit
                );
                entry.mark_errored(ConnectFailure::Timeout(limit));
                self.evict_settled(&key, &entry);
            }
        }
    }

    /// Drop the map slot only if it still holds this exact entry
    fn evict_settled(&self, key: &EntryKey, entry: &SharedEntry<D>) {
        if self
            .entries
            .remove_if(key, |_, cached| Arc::ptr_eq(cached, entry))
            .is_some()
        {
            debug!("[REGISTRY] Evicted failed entry for {}", key.label());
        }
    }

    async fn close_key(&self, key: &EntryKey) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        self.close_entry(key, &entry).await;
        true
    }

    /// Settle an already evicted entry as `Closed` and close its handle
    async fn close_entry(&self, key: &EntryKey, entry: &SharedEntry<D>) {
        if let Some(conn) = entry.close() {
            let closing = tokio::time::timeout(self.config.operation_timeout, self.driver.close(conn));
            match closing.await {
                Ok(Ok(())) => debug!("[REGISTRY] Closed connection for {}", key.label()),
                Ok(Err(e)) => error!(
                    "[REGISTRY] Failed to close connection for {}: {}",
                    key.label(),
                    e
                ),
                Err(_) => error!(
                    "[REGISTRY] Closing connection for {} timed out",
                    key.label()
                ),
            }
        }
    }

    async fn probe(&self, conn: &D::Conn) -> bool {
        matches!(
            tokio::time::timeout(self.config.probe_timeout, self.driver.ping(conn)).await,
            Ok(Ok(()))
        )
    }
}
