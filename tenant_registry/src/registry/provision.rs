//! Provisioning workflow: create a tenant database and make it ready for use

use std::fmt;

use chrono::Utc;
use serde::Serialize;

use super::TenantConnectionRegistry;
use crate::db::entities::MARKER_TABLE;
use crate::db::{InitMarker, StorageDriver, SCHEMA_VERSION};
use crate::error::{Result, TenantError};
use crate::tenant_id::{validate_collection_name, CanonicalId};
use crate::{debug, error, info, warn};

/// Step at which provisioning gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    Materialize,
    Connect,
    Probe,
    Marker,
    Seed,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStage::Materialize => "materialize",
            ProvisionStage::Connect => "connect",
            ProvisionStage::Probe => "probe",
            ProvisionStage::Marker => "marker",
            ProvisionStage::Seed => "seed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Created,
    AlreadyProvisioned,
}

/// Whether the server listed the new database after provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Confirmed,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningResult {
    pub tenant_id: CanonicalId,
    pub database_name: String,
    pub outcome: ProvisionOutcome,
    pub verification: Verification,
    pub seeded_collections: Vec<String>,
}

impl ProvisioningResult {
    pub fn is_created(&self) -> bool {
        self.outcome == ProvisionOutcome::Created
    }
}

impl<D: StorageDriver> TenantConnectionRegistry<D> {
    /// Create the tenant database if needed, connect, record the marker and
    /// seed collections.
    ///
    /// `collections` overrides the configured default collections. Running it
    /// again for a provisioned tenant is harmless and reports
    /// [`ProvisionOutcome::AlreadyProvisioned`].
    pub async fn provision_tenant(
        &self,
        tenant: &str,
        collections: Option<&[String]>,
    ) -> Result<ProvisioningResult> {
        let id = self.normalize(tenant)?;
        if self.is_deleting(&id) {
            return Err(TenantError::NotFound(format!(
                "tenant {} is being deleted",
                id
            )));
        }

        let seeds = self.seed_list(collections)?;
        let database_name = self.database_name(&id);
        let failed = |stage: ProvisionStage, reason: String| {
            error!(
                "[PROVISION] Provisioning {} failed at {}: {}",
                id, stage, reason
            );
            TenantError::ProvisionFailed {
                tenant: id.to_string(),
                stage,
                reason,
            }
        };

        info!(
            "[PROVISION] Provisioning tenant {} into database {}",
            id, database_name
        );

        self.bounded(
            "create database",
            self.driver().create_database(&database_name),
        )
        .await
        .map_err(|e| failed(ProvisionStage::Materialize, e.to_string()))?;

        let conn = self
            .connect_tenant(&id)
            .await
            .map_err(|e| failed(ProvisionStage::Connect, e.to_string()))?;

        if !self.probe(conn.conn()).await {
            return Err(failed(
                ProvisionStage::Probe,
                "database did not answer the liveness probe".to_string(),
            ));
        }

        let outcome = self
            .record_marker(&id, conn.conn())
            .await
            .map_err(|reason| failed(ProvisionStage::Marker, reason))?;

        let verification = self.verify_listed(&database_name).await;

        for name in &seeds {
            self.bounded(
                "create collection",
                self.driver().create_collection(conn.conn(), name),
            )
            .await
            .map_err(|e| failed(ProvisionStage::Seed, format!("{}: {}", name, e)))?;
            debug!("[PROVISION] Collection {} ready in {}", name, database_name);
        }

        info!(
            "[PROVISION] Tenant {} provisioned ({:?}, {} collections seeded)",
            id,
            outcome,
            seeds.len()
        );

        Ok(ProvisioningResult {
            tenant_id: id,
            database_name,
            outcome,
            verification,
            seeded_collections: seeds,
        })
    }

    /// Requested collections, or the configured defaults, validated and deduplicated
    fn seed_list(&self, collections: Option<&[String]>) -> Result<Vec<String>> {
        let requested = collections.unwrap_or(self.config().default_collections.as_slice());

        let mut seeds: Vec<String> = Vec::with_capacity(requested.len());
        for name in requested {
            validate_collection_name(name)?;
            if name == MARKER_TABLE {
                return Err(TenantError::InvalidIdentifier(format!(
                    "collection name {:?} is reserved",
                    name
                )));
            }
            if !seeds.contains(name) {
                seeds.push(name.clone());
            }
        }
        Ok(seeds)
    }

    /// Write the marker unless one exists. A concurrent provisioner may win
    /// the insert, in which case the marker is read back.
    async fn record_marker(
        &self,
        id: &CanonicalId,
        conn: &D::Conn,
    ) -> std::result::Result<ProvisionOutcome, String> {
        let existing = self
            .bounded("read marker", self.driver().read_marker(conn))
            .await
            .map_err(|e| e.to_string())?;

        if let Some(marker) = existing {
            info!(
                "[PROVISION] Tenant {} already provisioned at {} (schema version {})",
                id, marker.created_at, marker.schema_version
            );
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }

        let marker = InitMarker {
            tenant_id: id.to_string(),
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
        };

        match self
            .bounded("write marker", self.driver().write_marker(conn, &marker))
            .await
        {
            Ok(()) => Ok(ProvisionOutcome::Created),
            Err(write_err) => match self
                .bounded("read marker", self.driver().read_marker(conn))
                .await
            {
                Ok(Some(_)) => {
                    debug!(
                        "[PROVISION] Marker for {} was written concurrently",
                        id
                    );
                    Ok(ProvisionOutcome::AlreadyProvisioned)
                }
                _ => Err(write_err.to_string()),
            },
        }
    }

    async fn verify_listed(&self, database_name: &str) -> Verification {
        match self
            .bounded("list databases", self.driver().list_databases())
            .await
        {
            Ok(names) if names.iter().any(|name| name == database_name) => {
                Verification::Confirmed
            }
            Ok(_) => {
                warn!(
                    "[PROVISION] Database {} not listed by the server after provisioning",
                    database_name
                );
                Verification::Inconclusive
            }
            Err(e) => {
                warn!(
                    "[PROVISION] Could not list databases to verify {}: {}",
                    database_name, e
                );
                Verification::Inconclusive
            }
        }
    }
}
