//! Organization admin flows
//!
//! Sign-up provisions storage before writing the directory record. Removal
//! deletes storage before removing the record. Each step can fail
//! independently, and the outcome says which remediation an operator needs.

use serde::Serialize;

use crate::db::entities::{OrganizationModel, OrganizationStatus};
use crate::db::StorageDriver;
use crate::directory::{NewOrganization, TenantDirectory};
use crate::error::{Result, TenantError};
use crate::registry::deletion::DeletionReport;
use crate::registry::provision::ProvisioningResult;
use crate::registry::TenantConnectionRegistry;
use crate::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOrganizationRequest {
    pub name: String,
    /// Raw tenant id, with or without the prefix
    pub code: String,
    pub description: Option<String>,
    pub contact_info: Option<serde_json::Value>,
    /// Collections to create in the new database; `None` uses the configured defaults
    pub default_collections: Option<Vec<String>>,
}

impl AddOrganizationRequest {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            description: None,
            contact_info: None,
            default_collections: None,
        }
    }

    pub fn with_default_collections(mut self, collections: Vec<String>) -> Self {
        self.default_collections = Some(collections);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedOrganization {
    pub organization: OrganizationModel,
    pub provisioning: ProvisioningResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemovalOutcome {
    /// Storage dropped and directory record removed
    FullyDeleted { report: DeletionReport },
    /// Storage dropped; the directory record still has to be removed by hand
    StorageDroppedDirectoryRemains {
        report: DeletionReport,
        reason: String,
    },
    /// Storage deletion refused before anything was dropped
    NothingDeleted { reason: String },
}

pub struct OrganizationAdmin<D: StorageDriver, T: TenantDirectory> {
    registry: TenantConnectionRegistry<D>,
    directory: T,
}

impl<D: StorageDriver, T: TenantDirectory> OrganizationAdmin<D, T> {
    pub fn new(registry: TenantConnectionRegistry<D>, directory: T) -> Self {
        Self {
            registry,
            directory,
        }
    }

    pub fn registry(&self) -> &TenantConnectionRegistry<D> {
        &self.registry
    }

    pub fn directory(&self) -> &T {
        &self.directory
    }

    /// Provision a tenant database for a new organization and register it.
    ///
    /// An organization already in the directory is a `Conflict`. When the
    /// directory insert fails after provisioning, the database is kept and
    /// the directory error is returned.
    pub async fn add_organization(&self, request: AddOrganizationRequest) -> Result<AddedOrganization> {
        let id = self.registry.normalize(&request.code)?;

        if self.directory.find_by_code(&id).await?.is_some() {
            warn!("[ADMIN] Organization {} is already registered", id);
            return Err(TenantError::Conflict(format!(
                "organization {} already exists",
                id
            )));
        }

        let provisioning = self
            .registry
            .provision_tenant(id.as_str(), request.default_collections.as_deref())
            .await?;

        let new_org = NewOrganization {
            name: request.name,
            code: id.clone(),
            database_name: provisioning.database_name.clone(),
            description: request.description,
            contact_info: request.contact_info,
        };

        let organization = self.directory.insert(new_org).await.map_err(|e| {
            error!(
                "[ADMIN] Database {} provisioned but organization {} could not be registered, left in place: {}",
                provisioning.database_name, id, e
            );
            TenantError::Directory(e)
        })?;

        info!(
            "[ADMIN] Organization {} added ({:?})",
            id, provisioning.outcome
        );
        Ok(AddedOrganization {
            organization,
            provisioning,
        })
    }

    /// Delete an organization's storage, then its directory record.
    ///
    /// Partial storage deletion is returned as [`TenantError::PartialDeletion`]
    /// with the directory untouched.
    pub async fn remove_organization(&self, tenant: &str) -> Result<RemovalOutcome> {
        let id = self.registry.normalize(tenant)?;

        let report = match self.registry.delete_tenant(id.as_str()).await {
            Ok(report) => report,
            Err(e @ TenantError::PartialDeletion(_)) => return Err(e),
            Err(e) => {
                warn!("[ADMIN] Nothing deleted for organization {}: {}", id, e);
                return Ok(RemovalOutcome::NothingDeleted {
                    reason: e.to_string(),
                });
            }
        };

        match self.directory.remove_by_code(&id).await {
            Ok(removed) => {
                if !removed {
                    warn!("[ADMIN] Organization {} had no directory record", id);
                }
                info!("[ADMIN] Organization {} fully removed", id);
                Ok(RemovalOutcome::FullyDeleted { report })
            }
            Err(e) => {
                error!(
                    "[ADMIN] Storage of {} dropped but the directory record remains: {}",
                    id, e
                );
                Ok(RemovalOutcome::StorageDroppedDirectoryRemains {
                    report,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn list_organizations(&self) -> Result<Vec<OrganizationModel>> {
        Ok(self.directory.list().await?)
    }

    /// Change an organization's status; `NotFound` when it is not registered
    pub async fn set_status(
        &self,
        tenant: &str,
        status: OrganizationStatus,
    ) -> Result<OrganizationModel> {
        let id = self.registry.normalize(tenant)?;
        self.directory
            .set_status(&id, status)
            .await?
            .ok_or_else(|| TenantError::NotFound(format!("organization {}", id)))
    }
}
