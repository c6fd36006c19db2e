//! Deletion workflow: drop every collection, then the database, then evict
//!
//! Steps run in order and a failed step never stops the connection from
//! being evicted. The report records what happened at each step so the
//! caller can tell a clean deletion from a partial one.

use std::fmt;

use serde::Serialize;

use super::{EntryKey, TenantConnectionRegistry};
use crate::db::StorageDriver;
use crate::error::{Result, TenantError};
use crate::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionFailure {
    pub name: String,
    pub reason: String,
}

/// First step of a deletion that did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStage {
    EnumerateCollections,
    DropCollections,
    DropDatabase,
    EvictConnection,
}

impl fmt::Display for DeletionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeletionStage::EnumerateCollections => "enumerate collections",
            DeletionStage::DropCollections => "drop collections",
            DeletionStage::DropDatabase => "drop database",
            DeletionStage::EvictConnection => "evict connection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub tenant_id: String,
    pub database_name: String,
    pub collections_found: Vec<String>,
    pub collections_dropped: Vec<String>,
    pub collection_failures: Vec<CollectionFailure>,
    pub enumeration_error: Option<String>,
    pub database_dropped: bool,
    pub database_error: Option<String>,
    pub connection_evicted: bool,
}

impl DeletionReport {
    pub fn new(tenant_id: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            database_name: database_name.into(),
            collections_found: Vec::new(),
            collections_dropped: Vec::new(),
            collection_failures: Vec::new(),
            enumeration_error: None,
            database_dropped: false,
            database_error: None,
            connection_evicted: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_stage().is_none()
    }

    pub fn failed_stage(&self) -> Option<DeletionStage> {
        if self.enumeration_error.is_some() {
            Some(DeletionStage::EnumerateCollections)
        } else if !self.collection_failures.is_empty() {
            Some(DeletionStage::DropCollections)
        } else if !self.database_dropped {
            Some(DeletionStage::DropDatabase)
        } else if !self.connection_evicted {
            Some(DeletionStage::EvictConnection)
        } else {
            None
        }
    }

    /// One line, e.g. `2 of 3 collections dropped, database not dropped, connection evicted`
    pub fn summary(&self) -> String {
        let collections = match &self.enumeration_error {
            Some(reason) => format!("collections could not be listed ({})", reason),
            None => format!(
                "{} of {} collections dropped",
                self.collections_dropped.len(),
                self.collections_found.len()
            ),
        };

        let database = match (&self.database_error, self.database_dropped) {
            (_, true) => "database dropped".to_string(),
            (Some(reason), false) => format!("database not dropped ({})", reason),
            (None, false) => "database not dropped".to_string(),
        };

        let connection = if self.connection_evicted {
            "connection evicted"
        } else {
            "connection not evicted"
        };

        format!("{}, {}, {}", collections, database, connection)
    }
}

impl<D: StorageDriver> TenantConnectionRegistry<D> {
    /// Drop a tenant's collections and database and evict its connection.
    ///
    /// Returns the report when every step succeeded and
    /// [`TenantError::PartialDeletion`] carrying it otherwise. Errors before
    /// the first destructive step (`NotFound`, connect failures, a deletion
    /// already in progress) mean nothing was deleted.
    pub async fn delete_tenant(&self, tenant: &str) -> Result<DeletionReport> {
        let id = self.normalize(tenant)?;
        let _claim = self.claim_deletion(&id).ok_or_else(|| {
            TenantError::Conflict(format!("deletion of tenant {} already in progress", id))
        })?;

        let database_name = self.database_name(&id);
        info!(
            "[DELETION] Deleting tenant {} (database {})",
            id, database_name
        );

        let databases = self
            .bounded("list databases", self.driver().list_databases())
            .await
            .map_err(|e| {
                error!("[DELETION] Could not list databases: {}", e);
                TenantError::connect(id.as_str(), e)
            })?;

        if !databases.iter().any(|name| *name == database_name) {
            warn!("[DELETION] Database {} does not exist", database_name);
            self.evict_tenant(&id).await;
            return Err(TenantError::NotFound(format!(
                "database {} does not exist",
                database_name
            )));
        }

        let conn = self.connect_tenant(&id).await?;
        let mut report = DeletionReport::new(id.as_str(), database_name.as_str());

        match self
            .bounded("list collections", self.driver().list_collections(conn.conn()))
            .await
        {
            Ok(names) => report.collections_found = names,
            Err(e) => {
                error!("[DELETION] Could not list collections of {}: {}", id, e);
                report.enumeration_error = Some(e.to_string());
            }
        }

        if report.enumeration_error.is_none() {
            for name in report.collections_found.clone() {
                match self
                    .bounded(
                        "drop collection",
                        self.driver().drop_collection(conn.conn(), &name),
                    )
                    .await
                {
                    Ok(()) => report.collections_dropped.push(name),
                    Err(e) => {
                        error!(
                            "[DELETION] Failed to drop collection {} of {}: {}",
                            name, id, e
                        );
                        report.collection_failures.push(CollectionFailure {
                            name,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if report.collection_failures.is_empty() {
                match self
                    .bounded("drop database", self.driver().drop_database(&database_name))
                    .await
                {
                    Ok(()) => report.database_dropped = true,
                    Err(e) => {
                        error!(
                            "[DELETION] Failed to drop database {}: {}",
                            database_name, e
                        );
                        report.database_error = Some(e.to_string());
                    }
                }
            } else {
                warn!(
                    "[DELETION] Keeping database {}: {} collections could not be dropped",
                    database_name,
                    report.collection_failures.len()
                );
            }
        }

        drop(conn);
        self.evict_tenant(&id).await;
        report.connection_evicted = !self
            .inner
            .entries
            .contains_key(&EntryKey::Tenant(id.clone()));

        if report.is_complete() {
            info!("[DELETION] Tenant {} deleted: {}", id, report.summary());
            Ok(report)
        } else {
            error!(
                "[DELETION] Tenant {} only partially deleted: {}",
                id,
                report.summary()
            );
            Err(TenantError::PartialDeletion(Box::new(report)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_collections() -> DeletionReport {
        let mut report = DeletionReport::new("acme", "tenant_acme");
        report.collections_found = vec!["employees".into(), "leaves".into(), "salaries".into()];
        report
    }

    #[test]
    fn test_complete_report() {
        let mut report = three_collections();
        report.collections_dropped = report.collections_found.clone();
        report.database_dropped = true;
        report.connection_evicted = true;

        assert!(report.is_complete());
        assert_eq!(report.failed_stage(), None);
        assert_eq!(
            report.summary(),
            "3 of 3 collections dropped, database dropped, connection evicted"
        );
    }

    #[test]
    fn test_collection_failure_report() {
        let mut report = three_collections();
        report.collections_dropped = vec!["employees".into(), "salaries".into()];
        report.collection_failures.push(CollectionFailure {
            name: "leaves".into(),
            reason: "lock wait timeout".into(),
        });
        report.connection_evicted = true;

        assert!(!report.is_complete());
        assert_eq!(report.failed_stage(), Some(DeletionStage::DropCollections));
        assert_eq!(
            report.summary(),
            "2 of 3 collections dropped, database not dropped, connection evicted"
        );
    }

    #[test]
    fn test_enumeration_failure_report() {
        let mut report = DeletionReport::new("acme", "tenant_acme");
        report.enumeration_error = Some("access denied".into());
        report.connection_evicted = true;

        assert_eq!(
            report.failed_stage(),
            Some(DeletionStage::EnumerateCollections)
        );
        assert!(report.summary().starts_with("collections could not be listed (access denied)"));
    }

    #[test]
    fn test_database_error_in_summary() {
        let mut report = three_collections();
        report.collections_dropped = report.collections_found.clone();
        report.database_error = Some("database is busy".into());

        assert_eq!(report.failed_stage(), Some(DeletionStage::DropDatabase));
        assert!(report.summary().contains("database not dropped (database is busy)"));
        assert!(report.summary().ends_with("connection not evicted"));
    }

    #[test]
    fn test_partial_deletion_error_message() {
        let mut report = three_collections();
        report.collections_dropped = report.collections_found.clone();
        report.database_dropped = true;

        let err = TenantError::PartialDeletion(Box::new(report));
        assert_eq!(
            err.to_string(),
            "Deletion of tenant acme incomplete: 3 of 3 collections dropped, database dropped, connection not evicted"
        );
    }
}
