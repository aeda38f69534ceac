#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use regmon::cli::{self, CliCommand, DaemonCommand};
use regmon::client::ChannelClient;
use regmon::{consumer, daemon};

#[tokio::main]
async fn main() -> Result<()> {
    match cli::parse_args()? {
        CliCommand::Watch(config) => {
            // Set up interrupt handling
            let interrupted = Arc::new(AtomicBool::new(false));
            let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone());
            let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone());

            consumer::watch(&config, interrupted).await?;
        }
        CliCommand::Notify {
            socket_path,
            notification,
        } => {
            let mut client = ChannelClient::connect(&socket_path)
                .await
                .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
            client.notify(notification).await?;
        }
        CliCommand::Daemon(command) => run_daemon_command(command).await?,
    }

    Ok(())
}

async fn run_daemon_command(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Run { config } => daemon::run_daemon_process(config).await,
        DaemonCommand::Start { config } => daemon::spawn_daemon_child(config).await,
        DaemonCommand::Stop => {
            let pids = daemon::stop_daemon()?;
            for pid in pids {
                println!("✅ Sent stop signal to regmon daemon (PID: {})", pid);
            }
            Ok(())
        }
        DaemonCommand::Status { socket_path } => {
            let pids = daemon::find_daemon_pids();
            let mut client = match ChannelClient::connect(&socket_path).await {
                Ok(client) => client,
                Err(e) => {
                    if pids.is_empty() {
                        println!("regmon daemon is not running");
                    } else {
                        println!("regmon daemon running (PIDs: {:?}) but not reachable: {}", pids, e);
                    }
                    return Ok(());
                }
            };

            let status = client.status().await?;
            let stats = client.stats().await?;
            println!("regmon daemon status:");
            println!("  PID: {}", status.pid);
            println!("  Uptime: {}s", status.uptime_seconds);
            println!("  Socket: {}", status.socket_path.display());
            if let Some(path) = &status.config_path {
                println!("  Config: {}", path.display());
            }
            println!(
                "  Protected root: {} ({})",
                status.protected_root,
                if status.case_sensitive { "case-sensitive" } else { "case-insensitive" }
            );
            println!("  Clients: {}", status.open_handles);
            println!("  Queue: {}/{} pending", stats.queue.pending, stats.queue.max_len);
            println!(
                "  Records: {} captured, {} evicted, {} drained, {} dropped",
                stats.observer.captured, stats.queue.evicted, stats.queue.drained, stats.observer.dropped
            );
            if let Some(reload) = status.last_config_reload {
                println!("  Last reload: {}", reload.to_rfc3339());
            }
            Ok(())
        }
        DaemonCommand::Reload { socket_path } => {
            let mut client = ChannelClient::connect(&socket_path)
                .await
                .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
            let message = client.reload_config().await?;
            println!("✅ {}", message);
            Ok(())
        }
    }
}
