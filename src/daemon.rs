//! Daemon module for hosting the registry observer
//!
//! This module runs regmon as a background service:
//! - Registers the observer with the notification hook at startup
//! - Serves consumers and hook adapters over a Unix socket
//! - Structured logging through the `log` facade
//! - Discards pending records and unregisters on shutdown

pub mod config;
pub mod ipc;
pub mod logging;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::{Mutex, Notify};

use crate::channel::EventChannel;
use crate::constants::{APP_SUBSYSTEM, DAEMON_CATEGORY, DAEMON_RUN_SUBCOMMAND, DAEMON_SUBCOMMAND};
use crate::daemon::config::DaemonConfiguration;
use crate::daemon::ipc::{DaemonStats, DaemonStatus, IpcServer};
use crate::daemon::logging::{DaemonLogger, LogLevel};
use crate::hook::{Cookie, LocalHook, NotificationSource, PostOperation};
use crate::observer::RegistryObserver;
use crate::queue::EventQueue;

/// Check if a regmon daemon process is already running
pub fn is_daemon_running() -> bool {
    !find_daemon_pids().is_empty()
}

/// Find PIDs of running regmon daemon processes
/// Returns a list of PIDs matching the 'regmon daemon run' pattern,
/// excluding the current process and sudo wrappers
pub fn find_daemon_pids() -> Vec<u32> {
    use sysinfo::{ProcessesToUpdate, System};

    let mut system = System::new_all();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let current_pid = std::process::id();

    system
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let pid_u32 = pid.as_u32();
            if pid_u32 == current_pid {
                return None;
            }

            let cmd = process.cmd();
            let has_regmon = cmd.iter().any(|arg| arg.to_string_lossy().contains("regmon"));
            let has_daemon = cmd.iter().any(|arg| arg == DAEMON_SUBCOMMAND);
            let has_run = cmd.iter().any(|arg| arg == DAEMON_RUN_SUBCOMMAND);
            let is_sudo = process.name() == "sudo";

            if has_regmon && has_daemon && has_run && !is_sudo {
                Some(pid_u32)
            } else {
                None
            }
        })
        .collect()
}

/// Summary of a configuration reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub filter_changed: bool,
    /// Queue limit changes only take effect after a restart
    pub restart_required: bool,
}

/// Daemon runtime state shared with every IPC connection
pub struct DaemonState {
    config: Mutex<DaemonConfiguration>,
    config_path: Option<PathBuf>,
    socket_path: PathBuf,
    queue: Arc<EventQueue>,
    observer: Arc<RegistryObserver>,
    hook: LocalHook,
    cookie: std::sync::Mutex<Option<Cookie>>,
    channel: EventChannel,
    logger: DaemonLogger,
    started: Instant,
    last_config_reload: std::sync::Mutex<Option<DateTime<Utc>>>,
    shutdown: Notify,
}

impl DaemonState {
    /// Build the queue and observer, and register the observer with the hook
    pub fn new(config: DaemonConfiguration, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;

        let logger = DaemonLogger::new(APP_SUBSYSTEM.to_string(), DAEMON_CATEGORY.to_string(), LogLevel::Info)?;

        let queue = Arc::new(EventQueue::new(config.daemon.max_queue_len));
        let hook = LocalHook::new();
        let observer = Arc::new(RegistryObserver::new(queue.clone(), config.path_filter(), hook.keys()));
        let cookie = hook
            .register(observer.clone())
            .context("Failed to register registry observer")?;
        let channel = EventChannel::new(queue.clone());
        let socket_path = config.socket_path();

        Ok(Self {
            config: Mutex::new(config),
            config_path,
            socket_path,
            queue,
            observer,
            hook,
            cookie: std::sync::Mutex::new(Some(cookie)),
            channel,
            logger,
            started: Instant::now(),
            last_config_reload: std::sync::Mutex::new(None),
            shutdown: Notify::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn observer(&self) -> &Arc<RegistryObserver> {
        &self.observer
    }

    pub fn logger(&self) -> &DaemonLogger {
        &self.logger
    }

    pub async fn get_config(&self) -> DaemonConfiguration {
        self.config.lock().await.clone()
    }

    /// Hand a completed value write to the hook, as the OS callback would
    pub fn deliver(&self, key_path: &str, operation: PostOperation) {
        self.hook.deliver_post_set_value(key_path, operation);
    }

    /// Re-read the configuration file and apply the filter settings
    pub async fn reload_config(&self) -> Result<ReloadSummary> {
        let new_config = DaemonConfiguration::load_or_default(self.config_path.as_deref())?;
        let mut config = self.config.lock().await;

        let filter_changed = config.filter != new_config.filter;
        if filter_changed {
            let old_filter = self.observer.set_filter(new_config.path_filter());
            self.logger.log_config_change(
                "filter",
                &format!("{:?}", old_filter),
                &format!("{:?}", new_config.filter),
            )?;
        }

        let restart_required = config.daemon != new_config.daemon;
        if restart_required {
            self.logger.log_warning(
                "Daemon settings changed; restart to apply",
                Some(&format!("{:?}", new_config.daemon)),
            )?;
        }

        config.filter = new_config.filter;
        *self.last_config_reload.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        Ok(ReloadSummary {
            filter_changed,
            restart_required,
        })
    }

    pub async fn status(&self) -> DaemonStatus {
        let config = self.config.lock().await;
        DaemonStatus {
            running: self.channel.is_running(),
            pid: std::process::id(),
            uptime_seconds: self.started.elapsed().as_secs(),
            config_path: self.config_path.clone(),
            socket_path: self.socket_path.clone(),
            protected_root: config.filter.protected_root.clone(),
            case_sensitive: config.filter.case_sensitive,
            max_queue_len: self.queue.max_len(),
            open_handles: self.channel.open_handles(),
            last_config_reload: *self.last_config_reload.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn stats(&self) -> DaemonStats {
        DaemonStats {
            queue: self.queue.stats(),
            observer: self.observer.stats(),
        }
    }

    /// Ask the daemon's main task to exit
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once [`request_shutdown`](Self::request_shutdown) has been called
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    /// Unregister from the hook and discard pending records.
    /// Returns the number of records discarded.
    pub fn teardown(&self, reason: &str) -> Result<usize> {
        if let Some(cookie) = self.cookie.lock().unwrap_or_else(PoisonError::into_inner).take() {
            self.hook.unregister(cookie)?;
        }
        let discarded = self.channel.shutdown();
        self.logger.log_shutdown(reason, discarded)?;
        Ok(discarded)
    }
}

/// Spawn daemon as detached child process and wait for it to become ready
pub async fn spawn_daemon_child(config_path: Option<PathBuf>) -> Result<()> {
    // Validate up front so configuration errors surface in the terminal
    let config = DaemonConfiguration::load_or_default(config_path.as_deref())?;

    if is_daemon_running() {
        bail!("Daemon already running, please stop it first.");
    }

    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = std::process::Command::new(current_exe);
    cmd.args([DAEMON_SUBCOMMAND, DAEMON_RUN_SUBCOMMAND]);

    if let Some(config) = config_path {
        cmd.arg("--config").arg(config);
    }

    // Child writes READY to stdout once the socket is bound
    cmd.stdout(std::process::Stdio::piped());

    let mut child = cmd.spawn().context("Failed to spawn daemon child process")?;

    println!("🚀 regmon daemon starting...");

    let stdout = child.stdout.take().context("Failed to capture child stdout")?;
    let mut reader = std::io::BufReader::new(stdout);
    let mut line = String::new();

    let ready_result = tokio::time::timeout(
        Duration::from_secs(30),
        tokio::task::spawn_blocking(move || reader.read_line(&mut line).map(|n| (n, line))),
    )
    .await;

    match ready_result {
        Ok(Ok(Ok((0, _)))) => {
            let status = child.try_wait().ok().flatten();
            let exit_info = status.map_or("unknown".to_string(), |s| format!("{}", s));
            eprintln!("❌ Failed to start regmon daemon");
            eprintln!("   The daemon process exited before becoming ready (exit: {})", exit_info);
            bail!("Daemon process exited before becoming ready")
        }
        Ok(Ok(Ok((_n, ref msg)))) if msg.trim() == "READY" => {
            println!("✅ regmon daemon started successfully");
            println!("  Protected root: {}", config.filter.protected_root);
            println!("  Socket: {}", config.socket_path().display());
            println!("  Watch events: regmon watch");
            println!("  Check status: regmon daemon status");
            println!("  Stop daemon: regmon daemon stop");
            Ok(())
        }
        Ok(Ok(Ok((_n, msg)))) => {
            eprintln!("❌ Failed to start regmon daemon");
            eprintln!("   Unexpected daemon output: {}", msg.trim());
            bail!("Unexpected daemon output")
        }
        Ok(Ok(Err(e))) => {
            eprintln!("❌ Failed to start regmon daemon");
            eprintln!("   Failed reading from daemon process: {}", e);
            bail!("Failed reading from daemon process: {}", e)
        }
        Ok(Err(e)) => {
            eprintln!("❌ Failed to start regmon daemon");
            eprintln!("   Internal error: {}", e);
            bail!("Internal error waiting for daemon: {}", e)
        }
        Err(_) => {
            let _ = child.kill();
            eprintln!("❌ Failed to start regmon daemon");
            eprintln!("   Daemon did not become ready within 30 seconds");
            bail!("Daemon startup timed out")
        }
    }
}

/// Run the daemon in the foreground until a signal or a Shutdown request
pub async fn run_daemon_process(config_path: Option<PathBuf>) -> Result<()> {
    let config = DaemonConfiguration::load_or_default(config_path.as_deref())?;
    config.ensure_directories().context("Failed to create required directories")?;

    let state = Arc::new(DaemonState::new(config, config_path.clone())?);

    let mut server = IpcServer::new(state.socket_path().to_path_buf(), state.clone());
    server.bind()?;

    let shown_config = match config_path {
        Some(path) => path,
        None => DaemonConfiguration::default_config_path()?,
    };
    state
        .logger()
        .log_startup(&shown_config, state.socket_path(), std::process::id())?;

    // Signal the spawning parent; a no-op when stdout is not a pipe
    println!("READY");

    let reason = tokio::select! {
        _ = shutdown_signal() => "Received shutdown signal",
        _ = state.shutdown_requested() => "Shutdown requested over IPC",
        result = server.serve() => match result {
            Ok(()) => "IPC server ended",
            Err(e) => {
                state.logger().log_error(&format!("IPC server error: {}", e), None)?;
                "IPC server failed"
            }
        },
    };

    server.stop()?;
    state.teardown(reason)?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(_) => {
            let _ = signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

/// Send SIGTERM to every running daemon. Returns the PIDs signalled.
pub fn stop_daemon() -> Result<Vec<u32>> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pids = find_daemon_pids();
    if pids.is_empty() {
        bail!("No running regmon daemon found");
    }

    for pid in &pids {
        let raw = i32::try_from(*pid).with_context(|| format!("Invalid daemon PID {}", pid))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM)
            .with_context(|| format!("Failed to signal daemon process {}", pid))?;
    }

    Ok(pids)
}
