//! Database entities for the tenant registry
//!
//! `organizations` lives in the core database and forms the tenant directory.
//! `tenant_markers` lives in every tenant database and records provisioning.

pub mod organizations;
pub mod tenant_markers;

// Re-exports for convenience
pub use organizations::{
    ActiveModel as OrganizationActiveModel, Column as OrganizationColumn, Entity as Organizations,
    Model as OrganizationModel, OrganizationStatus,
};

pub use tenant_markers::{
    ActiveModel as TenantMarkerActiveModel, Entity as TenantMarkers, Model as TenantMarkerModel, MARKER_TABLE,
};
