//! Global constants for regmon
//!
//! Centralized location for application-wide constants

/// Application subsystem identifier for macOS Unified Logging System
/// Used for ULS logging and daemon identification
pub const APP_SUBSYSTEM: &str = "com.microsoft.sysinternals.regmon";

/// Default daemon category for ULS logging
pub const DAEMON_CATEGORY: &str = "daemon";

/// Subcommand names used when the daemon re-executes itself
pub const DAEMON_SUBCOMMAND: &str = "daemon";
pub const DAEMON_RUN_SUBCOMMAND: &str = "run";

/// Socket path used when running as root
pub const SYSTEM_SOCKET_PATH: &str = "/var/run/regmon.sock";

/// File name of the socket inside a per-user runtime directory
pub const USER_SOCKET_NAME: &str = "regmon.sock";

/// System-wide configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/regmon/daemon.toml";

/// Only writes under this subtree are captured by default
pub const DEFAULT_PROTECTED_ROOT: &str = r"\REGISTRY\MACHINE";

/// Registry path separator
pub const KEY_SEPARATOR: char = '\\';

/// Queue length above which the oldest record is evicted
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1024;

/// Note: bounds are enforced by DaemonConfiguration::validate
pub const MAX_QUEUE_LEN_LIMIT: usize = 65_536;

/// Largest read a single consumer request may ask for
pub const MAX_READ_CAPACITY: usize = 1 << 20;

/// Consumer defaults
pub const DEFAULT_READ_BUFFER: usize = 1 << 16;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const POLL_INTERVAL_MIN_MS: u64 = 10;
pub const POLL_INTERVAL_MAX_MS: u64 = 60_000;

/// Event type tag for captured value writes in JSON output
pub const EVENT_REGISTRY_WRITE: &str = "registry_write";
