//! Database module for the tenant registry
//!
//! This module provides the MySQL storage driver, the SQL it issues, the
//! core-database entities and the directory migrations.

pub mod connection;
pub mod driver;
pub mod entities;
pub mod migrations;
pub mod statements;

pub use driver::{SeaOrmDriver, SharedConnection, StorageDriver};

/// Initialization marker row written into every provisioned tenant database
pub type InitMarker = entities::TenantMarkerModel;

/// Version recorded in new markers; bump when the tenant bookkeeping changes
pub const SCHEMA_VERSION: i32 = 1;
