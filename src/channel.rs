//! Consumer read channel
//!
//! Byte-oriented channel over the event queue. A read drains whole records
//! from the queue front into the caller's buffer until the next record would
//! not fit, and returns the number of bytes written. Zero bytes is a normal
//! answer: either nothing is pending or the head record is larger than the
//! buffer. A record is never split across reads.

use crate::queue::EventQueue;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors surfaced to consumers of the channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("observer is not running")]
    NotRunning,

    #[error("channel handle {0} is not open")]
    HandleClosed(u64),

    #[error("cannot connect to observer at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed channel message: {0}")]
    Protocol(String),

    #[error("request rejected ({code}): {message}")]
    Rejected { code: u32, message: String },
}

/// An open consumer connection
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    id: u64,
}

impl ChannelHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// The read side of the observer
#[derive(Debug)]
pub struct EventChannel {
    queue: Arc<EventQueue>,
    running: AtomicBool,
    next_handle: AtomicU64,
    open_handles: Mutex<HashSet<u64>>,
}

impl EventChannel {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self {
            queue,
            running: AtomicBool::new(true),
            next_handle: AtomicU64::new(1),
            open_handles: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open a handle. Succeeds whenever the observer is running.
    pub fn open(&self) -> Result<ChannelHandle, ChannelError> {
        if !self.is_running() {
            return Err(ChannelError::NotRunning);
        }
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        Ok(ChannelHandle { id })
    }

    /// Drain whole records into `buf`, returning the number of bytes written
    pub fn read(&self, handle: &ChannelHandle, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.check_handle(handle)?;
        Ok(drain_into(&self.queue, buf))
    }

    /// Like [`read`](Self::read) but allocates a buffer of `capacity` bytes
    pub fn read_to_vec(&self, handle: &ChannelHandle, capacity: usize) -> Result<Vec<u8>, ChannelError> {
        self.check_handle(handle)?;
        let mut buf = vec![0u8; capacity];
        let written = drain_into(&self.queue, &mut buf);
        buf.truncate(written);
        Ok(buf)
    }

    /// Close a handle. Pending records stay queued for the next consumer.
    pub fn close(&self, handle: ChannelHandle) {
        self.open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id);
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stop serving reads and discard everything still queued.
    /// Returns the number of records discarded.
    pub fn shutdown(&self) -> usize {
        self.running.store(false, Ordering::SeqCst);
        self.open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.queue.clear()
    }

    fn check_handle(&self, handle: &ChannelHandle) -> Result<(), ChannelError> {
        if !self.is_running() {
            return Err(ChannelError::NotRunning);
        }
        let open = self.open_handles.lock().unwrap_or_else(PoisonError::into_inner);
        if !open.contains(&handle.id) {
            return Err(ChannelError::HandleClosed(handle.id));
        }
        Ok(())
    }
}

/// Move whole records from the queue front into `out` under a single lock
/// acquisition. Returns the number of bytes written.
pub fn drain_into(queue: &EventQueue, out: &mut [u8]) -> usize {
    let mut guard = queue.lock();
    let mut written = 0;
    while let Some(record) = guard.try_pop_front_if_fits(out.len() - written) {
        let size = record.size();
        out[written..written + size].copy_from_slice(record.as_bytes());
        written += size;
    }
    written
}
