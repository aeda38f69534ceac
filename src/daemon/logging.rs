//! Structured logging for the daemon
//!
//! Every daemon event goes through the `log` facade as
//! `message | {json}`. On macOS the backend is the Unified Logging System,
//! elsewhere it is env_logger writing to stderr.

use anyhow::Result;
use log::{error, info, warn};
use serde_json::json;
use std::path::Path;

/// Daemon logger backed by the `log` facade
#[derive(Debug, Clone)]
pub struct DaemonLogger {
    /// Current logging level
    level: LogLevel,
}

/// Log levels for daemon operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

impl DaemonLogger {
    /// Initialize daemon logger with subsystem and category.
    /// A backend installed earlier in the process is kept.
    pub fn new(subsystem: String, category: String, level: LogLevel) -> Result<Self> {
        // Validate subsystem format (should be reverse DNS)
        if !subsystem.contains('.') {
            anyhow::bail!("Subsystem must be in reverse DNS format (e.g., 'com.example.app')");
        }

        if install_backend(&subsystem, &category).is_ok() {
            log::set_max_level(log::LevelFilter::Debug);
        }

        Ok(Self { level })
    }

    /// Log daemon startup event
    pub fn log_startup(&self, config_path: &Path, socket_path: &Path, pid: u32) -> Result<()> {
        let message = json!({
            "event": "daemon_startup",
            "pid": pid,
            "config_path": config_path.display().to_string(),
            "socket_path": socket_path.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon started", &message)
    }

    /// Log daemon shutdown event
    pub fn log_shutdown(&self, reason: &str, discarded: usize) -> Result<()> {
        let message = json!({
            "event": "daemon_shutdown",
            "reason": reason,
            "discarded_records": discarded,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon shutting down", &message)
    }

    /// Log a filter or queue setting change
    pub fn log_config_change(&self, what: &str, old_value: &str, new_value: &str) -> Result<()> {
        let message = json!({
            "event": "config_change",
            "setting": what,
            "old_value": old_value,
            "new_value": new_value,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, &format!("Configuration changed: {}", what), &message)
    }

    /// Log a consumer connecting or disconnecting
    pub fn log_client(&self, handle: u64, connected: bool) -> Result<()> {
        let event = if connected { "client_connected" } else { "client_disconnected" };
        let message = json!({
            "event": event,
            "handle": handle,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, event, &message)
    }

    /// Log a recoverable problem
    pub fn log_warning(&self, warning: &str, context: Option<&str>) -> Result<()> {
        let message = json!({
            "event": "warning",
            "message": warning,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Warn, warning, &message)
    }

    /// Log error events
    pub fn log_error(&self, error_message: &str, context: Option<&str>) -> Result<()> {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Error, error_message, &message)
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) -> Result<()> {
        if !self.should_log(level) {
            return Ok(());
        }

        let full_message = format_structured(message, data);
        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Warn => warn!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
        }

        Ok(())
    }

    fn should_log(&self, level: LogLevel) -> bool {
        severity(level) <= severity(self.level)
    }
}

fn severity(level: LogLevel) -> u8 {
    match level {
        LogLevel::Error => 0,
        LogLevel::Warn => 1,
        LogLevel::Info => 2,
    }
}

/// `message | {json}`
pub fn format_structured(message: &str, data: &serde_json::Value) -> String {
    format!("{} | {}", message, data)
}

#[cfg(target_os = "macos")]
fn install_backend(subsystem: &str, category: &str) -> Result<(), log::SetLoggerError> {
    let logger = oslog::OsLogger::new(subsystem).category_level_filter(category, log::LevelFilter::Debug);
    log::set_boxed_logger(Box::new(logger))
}

#[cfg(not(target_os = "macos"))]
fn install_backend(subsystem: &str, _category: &str) -> Result<(), log::SetLoggerError> {
    let logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .build();
    log::debug!("installing stderr logger for {}", subsystem);
    log::set_boxed_logger(Box::new(logger))
}
