//! Notification filter and record builder
//!
//! Runs synchronously on whichever thread the hook fires on. Every step is
//! bounded: resolve the key name, check the protected subtree, build one
//! fixed-size record and enqueue it. Nothing here ever fails the hook; drops
//! are counted and otherwise silent.

use crate::codec::{RawRecord, RegistrySetValueInfo, SET_VALUE_RECORD_SIZE};
use crate::filter::PathFilter;
use crate::hook::{
    HookStatus, KeyNameGuard, KeyNameResolver, NotificationSink, NotifyClass, PostOperation,
    SetValueInformation,
};
use crate::queue::EventQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// What happened to a single notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured,
    /// Captured, and the oldest pending record was evicted to make room
    CapturedWithEviction,
    IgnoredClass,
    FailedOperation,
    Unresolved,
    MissingPreInformation,
    OutsideProtectedRoot,
    AllocationFailed,
}

/// Counters over every notification seen since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverStats {
    pub captured: u64,
    pub ignored_class: u64,
    pub failed_operations: u64,
    pub unresolved: u64,
    pub filtered_out: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    ignored_class: AtomicU64,
    failed_operations: AtomicU64,
    unresolved: AtomicU64,
    filtered_out: AtomicU64,
    dropped: AtomicU64,
}

/// Observer registered with the notification hook
pub struct RegistryObserver {
    queue: Arc<EventQueue>,
    filter: RwLock<PathFilter>,
    resolver: Arc<dyn KeyNameResolver>,
    counters: Counters,
}

impl RegistryObserver {
    pub fn new(queue: Arc<EventQueue>, filter: PathFilter, resolver: Arc<dyn KeyNameResolver>) -> Self {
        Self {
            queue,
            filter: RwLock::new(filter),
            resolver,
            counters: Counters::default(),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn filter(&self) -> PathFilter {
        self.filter.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swap the protected-subtree filter, returning the previous one
    pub fn set_filter(&self, filter: PathFilter) -> PathFilter {
        let mut current = self.filter.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, filter)
    }

    pub fn stats(&self) -> ObserverStats {
        ObserverStats {
            captured: self.counters.captured.load(Ordering::Relaxed),
            ignored_class: self.counters.ignored_class.load(Ordering::Relaxed),
            failed_operations: self.counters.failed_operations.load(Ordering::Relaxed),
            unresolved: self.counters.unresolved.load(Ordering::Relaxed),
            filtered_out: self.counters.filtered_out.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Process one notification and report what became of it
    pub fn handle(&self, class: NotifyClass, operation: &PostOperation) -> CaptureOutcome {
        let outcome = self.capture(class, operation);
        let counter = match outcome {
            CaptureOutcome::Captured | CaptureOutcome::CapturedWithEviction => &self.counters.captured,
            CaptureOutcome::IgnoredClass => &self.counters.ignored_class,
            CaptureOutcome::FailedOperation => &self.counters.failed_operations,
            CaptureOutcome::Unresolved | CaptureOutcome::MissingPreInformation => &self.counters.unresolved,
            CaptureOutcome::OutsideProtectedRoot => &self.counters.filtered_out,
            CaptureOutcome::AllocationFailed => &self.counters.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    fn capture(&self, class: NotifyClass, operation: &PostOperation) -> CaptureOutcome {
        if class != NotifyClass::PostSetValueKey {
            return CaptureOutcome::IgnoredClass;
        }
        if !operation.succeeded() {
            return CaptureOutcome::FailedOperation;
        }

        // released when `key` goes out of scope, on every return below
        let Some(key) = KeyNameGuard::acquire(self.resolver.as_ref(), operation.object) else {
            return CaptureOutcome::Unresolved;
        };

        if !self.filter.read().unwrap_or_else(PoisonError::into_inner).matches(key.name()) {
            return CaptureOutcome::OutsideProtectedRoot;
        }

        let Some(info) = operation.pre_information.as_ref() else {
            log::debug!("post set-value on {} without pre-operation data", key.name());
            return CaptureOutcome::MissingPreInformation;
        };

        let Some(record) = build_record(key.name(), operation, info) else {
            log::debug!("dropping write to {}: record allocation failed", key.name());
            return CaptureOutcome::AllocationFailed;
        };

        if self.queue.enqueue(record) {
            CaptureOutcome::CapturedWithEviction
        } else {
            CaptureOutcome::Captured
        }
    }
}

impl NotificationSink for RegistryObserver {
    fn on_event(&self, class: NotifyClass, operation: &PostOperation) -> HookStatus {
        self.handle(class, operation);
        HookStatus::Success
    }
}

/// Serialize a registry set-value record for `key_name`.
/// Returns `None` when the record buffer cannot be allocated.
fn build_record(key_name: &str, operation: &PostOperation, info: &SetValueInformation) -> Option<RawRecord> {
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(SET_VALUE_RECORD_SIZE).ok()?;

    let mut item = RegistrySetValueInfo {
        process_id: operation.process_id,
        thread_id: operation.thread_id,
        data_type: info.data_type,
        ..Default::default()
    };
    item.key_name.copy_str_truncating(key_name);
    item.value_name.copy_str_truncating(&info.value_name);
    item.set_data(info.data_size, &info.data);
    item.encode_record(capture_timestamp(), &mut bytes);

    RawRecord::from_bytes(bytes).ok()
}

/// Wall-clock capture time in nanoseconds since the Unix epoch
pub fn capture_timestamp() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EventRecord, DATA_CAPACITY, KEY_NAME_CAPACITY};
    use crate::hook::{KeyObject, KeyTable};

    struct Fixture {
        keys: Arc<KeyTable>,
        observer: RegistryObserver,
    }

    fn fixture(max_len: usize) -> Fixture {
        let keys = Arc::new(KeyTable::new());
        let observer = RegistryObserver::new(
            Arc::new(EventQueue::new(max_len)),
            PathFilter::new(r"\REGISTRY\MACHINE", false),
            keys.clone(),
        );
        Fixture { keys, observer }
    }

    fn write_op(object: KeyObject, value: &str, data: &[u8]) -> PostOperation {
        PostOperation {
            status: 0,
            object,
            process_id: 1234,
            thread_id: 5678,
            pre_information: Some(SetValueInformation {
                value_name: value.to_string(),
                data_type: 4,
                data_size: data.len() as u32,
                data: data.to_vec(),
            }),
        }
    }

    fn decode_head(observer: &RegistryObserver) -> Box<RegistrySetValueInfo> {
        let raw = observer.queue().try_pop_front_if_fits(usize::MAX).unwrap();
        match raw.decode().unwrap() {
            EventRecord::RegistrySetValue { info, .. } => info,
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_write_under_protected_root_is_captured() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE\Contoso");
        let op = write_op(key, "Enabled", &1u32.to_le_bytes());

        assert_eq!(f.observer.on_event(NotifyClass::PostSetValueKey, &op), HookStatus::Success);
        assert_eq!(f.observer.queue().len(), 1);

        let info = decode_head(&f.observer);
        assert_eq!(info.process_id, 1234);
        assert_eq!(info.thread_id, 5678);
        assert_eq!(info.key_name.to_string_lossy(), r"\REGISTRY\MACHINE\SOFTWARE\Contoso");
        assert_eq!(info.value_name.to_string_lossy(), "Enabled");
        assert_eq!(info.data_type, 4);
        assert_eq!(info.captured_data(), &1u32.to_le_bytes());
        assert_eq!(f.keys.outstanding_names(), 0);
    }

    #[test]
    fn test_write_outside_root_is_dropped_and_name_released() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\USER\S-1-5-21\Software");
        let outcome = f.observer.handle(NotifyClass::PostSetValueKey, &write_op(key, "v", &[1]));

        assert_eq!(outcome, CaptureOutcome::OutsideProtectedRoot);
        assert!(f.observer.queue().is_empty());
        assert_eq!(f.keys.outstanding_names(), 0);
        assert_eq!(f.observer.stats().filtered_out, 1);
    }

    #[test]
    fn test_failed_operation_is_not_recorded() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE");
        let mut op = write_op(key, "v", &[1]);
        op.status = 0xC000_0022_u32 as i32;

        assert_eq!(f.observer.handle(NotifyClass::PostSetValueKey, &op), CaptureOutcome::FailedOperation);
        assert!(f.observer.queue().is_empty());
        assert_eq!(f.keys.outstanding_names(), 0);
    }

    #[test]
    fn test_other_classes_are_ignored() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE");
        let op = write_op(key, "v", &[1]);
        for class in [NotifyClass::PreSetValueKey, NotifyClass::PostDeleteValueKey, NotifyClass::Other(40)] {
            assert_eq!(f.observer.handle(class, &op), CaptureOutcome::IgnoredClass);
        }
        assert!(f.observer.queue().is_empty());
    }

    #[test]
    fn test_unresolved_key_is_skipped() {
        let f = fixture(16);
        let op = write_op(KeyObject(404), "v", &[1]);
        assert_eq!(f.observer.handle(NotifyClass::PostSetValueKey, &op), CaptureOutcome::Unresolved);
        assert!(f.observer.queue().is_empty());
    }

    #[test]
    fn test_missing_pre_information_releases_name() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE");
        let mut op = write_op(key, "v", &[1]);
        op.pre_information = None;
        assert_eq!(
            f.observer.handle(NotifyClass::PostSetValueKey, &op),
            CaptureOutcome::MissingPreInformation
        );
        assert_eq!(f.keys.outstanding_names(), 0);
    }

    #[test]
    fn test_large_value_truncated_but_declared_size_kept() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE");
        let blob = vec![0x5A; 4096];
        f.observer.handle(NotifyClass::PostSetValueKey, &write_op(key, "Blob", &blob));

        let info = decode_head(&f.observer);
        assert_eq!(info.captured_data().len(), DATA_CAPACITY);
        assert_eq!(info.data_size, 4096);
        assert!(info.is_truncated());
    }

    #[test]
    fn test_declared_size_larger_than_supplied_bytes() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE");
        let mut op = write_op(key, "Partial", &[1, 2, 3]);
        if let Some(info) = op.pre_information.as_mut() {
            info.data_size = 64;
        }
        f.observer.handle(NotifyClass::PostSetValueKey, &op);

        // Capture covers the declared size; unsupplied bytes read as zero
        let info = decode_head(&f.observer);
        assert_eq!(info.data_size, 64);
        assert_eq!(info.captured_data().len(), 64);
        assert_eq!(&info.captured_data()[..3], &[1u8, 2, 3]);
        assert!(info.captured_data()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_long_key_path_is_truncated() {
        let f = fixture(16);
        let path = format!(r"\REGISTRY\MACHINE\{}", "S".repeat(1000));
        let key = f.keys.open(&path);
        f.observer.handle(NotifyClass::PostSetValueKey, &write_op(key, "v", &[]));

        let info = decode_head(&f.observer);
        assert_eq!(info.key_name.len(), KEY_NAME_CAPACITY - 1);
        assert!(path.starts_with(&info.key_name.to_string_lossy()));
    }

    #[test]
    fn test_eviction_is_reported_in_outcome() {
        let f = fixture(1);
        let key = f.keys.open(r"\REGISTRY\MACHINE\SOFTWARE");
        assert_eq!(
            f.observer.handle(NotifyClass::PostSetValueKey, &write_op(key, "a", &[])),
            CaptureOutcome::Captured
        );
        assert_eq!(
            f.observer.handle(NotifyClass::PostSetValueKey, &write_op(key, "b", &[])),
            CaptureOutcome::CapturedWithEviction
        );
        assert_eq!(decode_head(&f.observer).value_name.to_string_lossy(), "b");
        assert_eq!(f.observer.stats().captured, 2);
    }

    #[test]
    fn test_filter_can_be_replaced_at_runtime() {
        let f = fixture(16);
        let key = f.keys.open(r"\REGISTRY\USER\S-1-5-18\Software");
        let op = write_op(key, "v", &[]);
        assert_eq!(f.observer.handle(NotifyClass::PostSetValueKey, &op), CaptureOutcome::OutsideProtectedRoot);

        let previous = f.observer.set_filter(PathFilter::new(r"\REGISTRY\USER", true));
        assert_eq!(previous.root(), r"\REGISTRY\MACHINE");
        assert_eq!(f.observer.handle(NotifyClass::PostSetValueKey, &op), CaptureOutcome::Captured);
    }

    #[test]
    fn test_capture_timestamp_is_recent() {
        let ts = capture_timestamp();
        // after 2020-01-01
        assert!(ts > 1_577_836_800_000_000_000);
    }
}
