//! Initialization marker stored inside each tenant database

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Bookkeeping table name; leading underscore keeps it apart from domain tables
pub const MARKER_TABLE: &str = "_tenant_meta";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "_tenant_meta")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::N(64))")]
    pub tenant_id: String,

    pub schema_version: i32,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
