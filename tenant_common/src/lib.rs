//! tenant_common
//!
//! Common utilities shared by the tenant connection crates.
//! This crate provides logging setup, panic recovery and the logging macros
//! used across the workspace.

mod logging;

pub use logging::*;

// Re-exported so the logging macros resolve without a direct dependency
#[doc(hidden)]
pub use tracing;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
