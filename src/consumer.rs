//! Consumer polling loop
//!
//! Reads the channel on a fixed interval, decodes whatever whole records
//! came back and prints one line per registry write.

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelError;
use crate::client::ChannelClient;
use crate::codec::{records, EventRecord};
use crate::models::WatchConfig;
use crate::output::{create_write_event, format_event_human, format_event_json};

/// Longest single sleep, so interrupts are noticed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Outcome of decoding one read
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub printed: usize,
    /// Records of a kind this consumer does not display
    pub skipped: usize,
    /// Whether decoding stopped early on malformed bytes
    pub malformed: bool,
}

/// Totals for a whole watch session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub reads: u64,
    pub bytes: u64,
    pub printed: u64,
    pub skipped: u64,
}

/// Decode and print every record in `bytes`
pub fn print_records<W: Write>(bytes: &[u8], output_json: bool, out: &mut W) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    for record in records(bytes) {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                log::warn!("stopping at malformed record: {}", e);
                summary.malformed = true;
                break;
            }
        };

        match record {
            EventRecord::RegistrySetValue { timestamp, info } => {
                let event = create_write_event(timestamp, &info)?;
                let line = if output_json {
                    format_event_json(&event)?
                } else {
                    format_event_human(&event)
                };
                writeln!(out, "{}", line)?;
                summary.printed += 1;
            }
            EventRecord::Unknown { kind, .. } => {
                log::debug!("skipping record kind {:?}", kind);
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Poll the daemon until `interrupted` is set
pub async fn watch(config: &WatchConfig, interrupted: Arc<AtomicBool>) -> Result<WatchSummary> {
    let mut client = match ChannelClient::connect(&config.socket_path).await {
        Ok(client) => client,
        Err(ChannelError::NotRunning) => anyhow::bail!(
            "Observer is not running at {}. Start it with: regmon daemon start",
            config.socket_path.display()
        ),
        Err(e) => return Err(e.into()),
    };

    if !config.output_json {
        eprintln!(
            "Watching registry writes (interval: {}ms, buffer: {} bytes)...",
            config.interval.as_millis(),
            config.buffer_size
        );
        eprintln!("Press Ctrl+C to stop.");
    }

    let mut summary = WatchSummary::default();
    let stdout = std::io::stdout();

    while !interrupted.load(Ordering::SeqCst) {
        let bytes = client
            .read(config.buffer_size)
            .await
            .context("Failed to read from observer")?;

        summary.reads += 1;
        if !bytes.is_empty() {
            summary.bytes += bytes.len() as u64;
            let mut out = stdout.lock();
            let batch = print_records(&bytes, config.output_json, &mut out)?;
            out.flush()?;
            summary.printed += batch.printed as u64;
            summary.skipped += batch.skipped as u64;
        }

        sleep_unless_interrupted(config.interval, &interrupted).await;
    }

    if !config.output_json {
        eprintln!("Watch stopped ({} events).", summary.printed);
    }

    Ok(summary)
}

async fn sleep_unless_interrupted(total: Duration, interrupted: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !interrupted.load(Ordering::SeqCst) {
        let slice = remaining.min(SLEEP_SLICE);
        tokio::time::sleep(slice).await;
        remaining -= slice;
    }
}
