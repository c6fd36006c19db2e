//! Organization directory on the core database
//!
//! One `organizations` row per tenant, keyed by the canonical tenant id in
//! `code`. The admin flows talk to it through [`TenantDirectory`] so they can
//! run against an in-memory directory in tests.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use crate::db::entities::{
    OrganizationActiveModel, OrganizationColumn, OrganizationModel, OrganizationStatus,
    Organizations,
};
use crate::db::migrations::Migrator;
use crate::db::{SharedConnection, StorageDriver};
use crate::error::Result;
use crate::registry::TenantConnectionRegistry;
use crate::tenant_id::CanonicalId;
use crate::{debug, info};

/// Fields supplied when registering an organization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrganization {
    pub name: String,
    pub code: CanonicalId,
    pub database_name: String,
    pub description: Option<String>,
    pub contact_info: Option<serde_json::Value>,
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_code(&self, code: &CanonicalId) -> std::result::Result<Option<OrganizationModel>, DbErr>;

    /// All organizations ordered by code
    async fn list(&self) -> std::result::Result<Vec<OrganizationModel>, DbErr>;

    async fn insert(&self, org: NewOrganization) -> std::result::Result<OrganizationModel, DbErr>;

    /// Updated record, `None` when no organization has this code
    async fn set_status(
        &self,
        code: &CanonicalId,
        status: OrganizationStatus,
    ) -> std::result::Result<Option<OrganizationModel>, DbErr>;

    /// Whether a record was removed
    async fn remove_by_code(&self, code: &CanonicalId) -> std::result::Result<bool, DbErr>;
}

/// [`TenantDirectory`] backed by the `organizations` table
#[derive(Debug, Clone)]
pub struct OrganizationDirectory {
    db: SharedConnection,
}

impl OrganizationDirectory {
    /// Wrap a core database connection without running migrations
    pub fn new(db: impl Into<SharedConnection>) -> Self {
        Self { db: db.into() }
    }

    /// Run pending migrations, then wrap the connection
    pub async fn open(db: impl Into<SharedConnection>) -> Result<Self> {
        let db: SharedConnection = db.into();
        info!("[DIRECTORY] Running directory migrations...");
        Migrator::up(db.as_ref(), None).await?;
        info!("[DIRECTORY] Directory migrations completed");
        Ok(Self::new(db))
    }

    /// Open the directory over the registry's core connection
    pub async fn from_registry<D>(registry: &TenantConnectionRegistry<D>) -> Result<Self>
    where
        D: StorageDriver<Conn = SharedConnection>,
    {
        let core = registry.get_core_connection().await?;
        Self::open(core).await
    }

    pub fn orm(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

#[async_trait]
impl TenantDirectory for OrganizationDirectory {
    async fn find_by_code(&self, code: &CanonicalId) -> std::result::Result<Option<OrganizationModel>, DbErr> {
        Organizations::find()
            .filter(OrganizationColumn::Code.eq(code.as_str()))
            .one(self.orm())
            .await
    }

    async fn list(&self) -> std::result::Result<Vec<OrganizationModel>, DbErr> {
        Organizations::find()
            .order_by_asc(OrganizationColumn::Code)
            .all(self.orm())
            .await
    }

    async fn insert(&self, org: NewOrganization) -> std::result::Result<OrganizationModel, DbErr> {
        let now = Utc::now();
        let model = OrganizationActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            name: Set(org.name),
            code: Set(org.code.to_string()),
            database_name: Set(org.database_name),
            description: Set(org.description),
            contact_info: Set(org.contact_info),
            status: Set(OrganizationStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = model.insert(self.orm()).await?;
        info!(
            "[DIRECTORY] Registered organization {} ({})",
            inserted.code, inserted.id
        );
        Ok(inserted)
    }

    async fn set_status(
        &self,
        code: &CanonicalId,
        status: OrganizationStatus,
    ) -> std::result::Result<Option<OrganizationModel>, DbErr> {
        let Some(existing) = self.find_by_code(code).await? else {
            return Ok(None);
        };

        let mut active_model: OrganizationActiveModel = existing.into();
        active_model.status = Set(status.clone());
        active_model.updated_at = Set(Utc::now());

        let updated = active_model.update(self.orm()).await?;
        debug!("[DIRECTORY] Organization {} is now {:?}", code, status);
        Ok(Some(updated))
    }

    async fn remove_by_code(&self, code: &CanonicalId) -> std::result::Result<bool, DbErr> {
        let result = Organizations::delete_many()
            .filter(OrganizationColumn::Code.eq(code.as_str()))
            .exec(self.orm())
            .await?;

        if result.rows_affected > 0 {
            info!("[DIRECTORY] Removed organization {}", code);
        }
        Ok(result.rows_affected > 0)
    }
}
