//! Logging module for the tenant connection crates
//!
//! This module provides logging initialization and panic recovery functionality
//! shared by the registry and any binary embedding it.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, Once};

use anyhow::Context;
use once_cell::sync::Lazy;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for logging setup
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub module_name: String,
}

impl LoggingConfig {
    pub fn new(level: &str, module_name: &str) -> Self {
        Self {
            log_level: level.to_string(),
            module_name: module_name.to_string(),
        }
    }

    /// Directive string used when `RUST_LOG` is not set
    fn default_directives(&self) -> String {
        let mut directives = format!("{}={}", self.module_name, self.log_level);
        for submodule in SUBMODULES {
            directives.push_str(&format!(
                ",{}::{}={}",
                self.module_name, submodule, self.log_level
            ));
        }
        directives
    }
}

/// Modules of the registry crate that get their own filter directive
const SUBMODULES: [&str; 7] = [
    "config",
    "tenant_id",
    "registry",
    "db",
    "directory",
    "admin",
    "error",
];

static CONSOLE_INIT: Once = Once::new();
static FILE_INIT: Once = Once::new();
static PANIC_HOOK_INIT: Once = Once::new();

// Non-blocking writers stop flushing once their guard is dropped
static FILE_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));
static CONSOLE_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

static LAST_PANIC: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Initialize console logging with environment variable support
pub fn init_console_logging(config: &LoggingConfig) {
    CONSOLE_INIT.call_once(|| {
        let env_filter = create_env_filter(config);

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init();

        match installed {
            Ok(()) => {
                debug!(
                    "Console logging initialized for {} (level: {})",
                    config.module_name, config.log_level
                );
                info!(
                    "[LOGGING] Console logging initialized for module: {}",
                    config.module_name
                );
            }
            Err(e) => {
                // Another subscriber (usually a test harness) already owns the global slot
                debug!("Console logging not installed: {}", e);
            }
        }

        init_panic_recovery();
    });
}

/// Initialize file logging with both file and console output
pub fn init_file_logging(config: &LoggingConfig, log_path: &str) -> anyhow::Result<()> {
    let mut init_result = Ok(());

    FILE_INIT.call_once(|| {
        init_result = install_file_subscriber(config, log_path);
        init_panic_recovery();
    });

    init_result
}

fn install_file_subscriber(config: &LoggingConfig, log_path: &str) -> anyhow::Result<()> {
    let path = Path::new(log_path);
    let log_dir = path
        .parent()
        .with_context(|| format!("Invalid log path {}: no parent directory", log_path))?;
    let log_filename = path
        .file_name()
        .with_context(|| format!("Invalid log path {}: no filename", log_path))?;

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let env_filter = create_env_filter(config);

    // File appender without rotation
    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false),
        )
        .with(
            fmt::layer()
                .with_writer(console_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true),
        )
        .try_init()
        .context("Failed to install file logging subscriber")?;

    if let Ok(mut guard) = FILE_GUARD.lock() {
        *guard = Some(file_guard);
    }
    if let Ok(mut guard) = CONSOLE_GUARD.lock() {
        *guard = Some(console_guard);
    }

    info!(
        "[LOGGING] File logging initialized for module: {} in {} (level: {})",
        config.module_name,
        log_dir.display(),
        config.log_level
    );

    Ok(())
}

/// Create environment filter for logging
fn create_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .map(|mut filter| {
            if let Ok(directive) = format!("{}={}", config.module_name, config.log_level).parse()
            {
                filter = filter.add_directive(directive);
            }
            for submodule in SUBMODULES {
                if let Ok(directive) =
                    format!("{}::{}={}", config.module_name, submodule, config.log_level).parse()
                {
                    filter = filter.add_directive(directive);
                }
            }
            filter
        })
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()))
}

/// Set configuration and initialize console logging
pub fn set_and_init_console_logging(level: &str, module_name: &str) {
    let config = LoggingConfig::new(level, module_name);
    init_console_logging(&config);
}

/// Set configuration and initialize file logging
pub fn set_and_init_file_logging(
    level: &str,
    module_name: &str,
    log_path: &str,
) -> anyhow::Result<()> {
    let config = LoggingConfig::new(level, module_name);
    init_file_logging(&config, log_path)
}

/// Initialize panic recovery hook
pub fn init_panic_recovery() {
    PANIC_HOOK_INIT.call_once(|| {
        std::panic::set_hook(Box::new(|panic_info| {
            let panic_msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let location = match panic_info.location() {
                Some(location) => format!(
                    " at {}:{}:{}",
                    location.file(),
                    location.line(),
                    location.column()
                ),
                None => " at unknown location".to_string(),
            };

            let full_msg = format!("{}{}", panic_msg, location);
            if let Ok(mut last) = LAST_PANIC.lock() {
                *last = Some(full_msg.clone());
            }

            tracing::error!("PANIC RECOVERED: {}", full_msg);
            eprintln!("[TENANT PANIC] {}", full_msg);
        }));

        info!("[LOGGING] Panic recovery hook initialized");
    });
}

/// Get the last panic message
pub fn get_last_panic() -> Option<String> {
    LAST_PANIC.lock().ok().and_then(|last| last.clone())
}

/// Clear the stored panic message
pub fn clear_last_panic() {
    if let Ok(mut last) = LAST_PANIC.lock() {
        *last = None;
    }
}

// Logging macros
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::tracing::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::tracing::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::tracing::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::tracing::trace!($($arg)*)
    };
}
