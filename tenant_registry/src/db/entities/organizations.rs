//! Organization entity: one row per tenant in the core database

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization status enumeration
#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(50))")]
pub enum OrganizationStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
    #[sea_orm(string_value = "suspended")]
    Suspended,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Char(Some(36))")]
    pub id: String,

    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub name: String,

    /// Canonical tenant id
    #[sea_orm(unique, column_type = "String(StringLen::N(64))")]
    pub code: String,

    #[sea_orm(column_type = "String(StringLen::N(64))")]
    pub database_name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(column_type = "Json", nullable)]
    pub contact_info: Option<Json>,

    pub status: OrganizationStatus,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Get organization ID as UUID
    pub fn id_uuid(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.id)
    }

    /// Check if organization is active
    pub fn is_active(&self) -> bool {
        self.status == OrganizationStatus::Active
    }

    /// Parse contact info from JSON
    pub fn contact_info_parsed<T>(&self) -> Option<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        self.contact_info
            .as_ref()
            .and_then(|info| serde_json::from_value(info.clone()).ok())
    }
}
