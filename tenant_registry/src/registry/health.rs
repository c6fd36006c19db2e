//! Health check over the core connection and every cached tenant

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::task::JoinSet;

use super::{EntryKey, TenantConnectionRegistry};
use crate::db::StorageDriver;
use crate::{debug, error, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub core: bool,
    /// Canonical tenant id to probe result, cached tenants only
    pub tenants: BTreeMap<String, bool>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.core && self.tenants.values().all(|healthy| *healthy)
    }

    pub fn unhealthy_tenants(&self) -> Vec<&str> {
        self.tenants
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(tenant, _)| tenant.as_str())
            .collect()
    }
}

impl<D: StorageDriver> TenantConnectionRegistry<D> {
    /// Probe the cached core connection and each cached tenant entry concurrently.
    ///
    /// Never opens a connection: uncached tenants are absent from the report,
    /// entries that are not `Ready` yet report `false`, and so does a core
    /// connection nobody has asked for yet.
    pub async fn health_check(&self) -> HealthReport {
        let mut core_handle = None;
        let mut snapshot: Vec<(String, Option<D::Conn>)> = Vec::new();
        for item in self.inner.entries.iter() {
            match item.key() {
                EntryKey::Tenant(id) => snapshot.push((id.to_string(), item.value().handle())),
                EntryKey::Core => core_handle = item.value().handle(),
            }
        }

        let mut probes = JoinSet::new();
        for (tenant, handle) in snapshot {
            let inner = self.inner.clone();
            probes.spawn(async move {
                let healthy = match handle {
                    Some(conn) => inner.probe(&conn).await,
                    None => false,
                };
                (tenant, healthy)
            });
        }

        let core = match core_handle {
            Some(conn) => self.inner.probe(&conn).await,
            None => {
                warn!("[REGISTRY] Core connection not established, reporting it unhealthy");
                false
            }
        };

        let mut tenants = BTreeMap::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((tenant, healthy)) => {
                    if !healthy {
                        warn!("[REGISTRY] Tenant {} failed its health probe", tenant);
                    }
                    tenants.insert(tenant, healthy);
                }
                Err(e) => error!("[REGISTRY] Health probe task failed: {}", e),
            }
        }

        debug!(
            "[REGISTRY] Health check finished: core={}, {} tenants probed",
            core,
            tenants.len()
        );
        HealthReport { core, tenants }
    }
}
