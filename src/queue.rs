//! Bounded event queue
//!
//! In-memory FIFO of serialized records shared by every producer thread and
//! the single consumer. One mutex guards the whole deque; operations are O(1)
//! and never block while the lock is held.
//!
//! When an insertion pushes the length past the configured maximum, the
//! oldest record is dropped. Insertion itself never fails.

use crate::codec::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counters describing queue traffic since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub evicted: u64,
    pub drained: u64,
    pub pending: usize,
    pub max_len: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    evicted: AtomicU64,
    drained: AtomicU64,
}

/// Capacity-limited FIFO of records with oldest-first eviction
#[derive(Debug)]
pub struct EventQueue {
    records: Mutex<VecDeque<RawRecord>>,
    max_len: usize,
    counters: Counters,
}

/// Exclusive access to the queue for multi-step operations such as a drain
pub struct QueueGuard<'a> {
    records: MutexGuard<'a, VecDeque<RawRecord>>,
    counters: &'a Counters,
}

impl EventQueue {
    /// Create an empty queue holding at most `max_len` records (minimum 1)
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_len.min(1024))),
            max_len,
            counters: Counters::default(),
        }
    }

    /// Acquire the queue lock.
    ///
    /// A panic on another thread while holding the lock cannot leave the deque
    /// half-updated, so a poisoned lock is recovered rather than propagated.
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            records: self.records.lock().unwrap_or_else(PoisonError::into_inner),
            counters: &self.counters,
        }
    }

    /// Insert at the tail, evicting the head if the queue is now over capacity.
    /// Returns true when a record was evicted.
    pub fn enqueue(&self, record: RawRecord) -> bool {
        let mut guard = self.lock();
        guard.records.push_back(record);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        if guard.records.len() > self.max_len {
            // dropped here, outside any consumer's reach
            let evicted = guard.records.pop_front();
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "queue over capacity ({}), evicted {} byte record",
                self.max_len,
                evicted.map_or(0, |r| r.size())
            );
            return true;
        }
        false
    }

    /// Remove and return the head only if it fits in `capacity` bytes
    pub fn try_pop_front_if_fits(&self, capacity: usize) -> Option<RawRecord> {
        self.lock().try_pop_front_if_fits(capacity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Drop every pending record. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut guard = self.lock();
        let discarded = guard.records.len();
        guard.records.clear();
        discarded
    }

    pub fn stats(&self) -> QueueStats {
        let pending = self.len();
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            drained: self.counters.drained.load(Ordering::Relaxed),
            pending,
            max_len: self.max_len,
        }
    }
}

impl QueueGuard<'_> {
    /// Peek at the head and remove it only when it fits.
    ///
    /// The head is never removed and reinserted, so a concurrent producer can
    /// not observe or cause a reordering.
    pub fn try_pop_front_if_fits(&mut self, capacity: usize) -> Option<RawRecord> {
        let fits = self.records.front()?.size() <= capacity;
        if !fits {
            return None;
        }
        let record = self.records.pop_front();
        if record.is_some() {
            self.counters.drained.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Size of the record at the head, if any
    pub fn front_size(&self) -> Option<usize> {
        self.records.front().map(RawRecord::size)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
