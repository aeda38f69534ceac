//! Registry notification hook boundary
//!
//! The operating system's registry callback is an external collaborator. This
//! module describes what it hands to the observer and how the observer is
//! registered with it:
//! - `NotificationSink`: implemented by the observer, invoked per mutation
//! - `NotificationSource`: the facility a sink registers with once at startup
//! - `KeyNameResolver`: resolves a key object to its full path; every acquired
//!   name is released through `KeyNameGuard` on drop
//! - `LocalHook`: in-process source used by the daemon to deliver
//!   notifications received from a hook adapter

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Registry operation class reported by the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyClass {
    PreSetValueKey,
    PostSetValueKey,
    PreDeleteValueKey,
    PostDeleteValueKey,
    PreCreateKey,
    PostCreateKey,
    Other(u32),
}

/// Opaque handle to the key object being mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyObject(pub u64);

/// Arguments of the value write, captured before the operation ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetValueInformation {
    pub value_name: String,
    /// REG_xxx type tag
    pub data_type: u32,
    /// Declared size; may exceed `data.len()` when the caller only exposes a prefix
    pub data_size: u32,
    pub data: Vec<u8>,
}

/// Post-operation payload handed to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOperation {
    /// NT-style status of the mutation itself; negative means it failed
    pub status: i32,
    pub object: KeyObject,
    pub process_id: u32,
    pub thread_id: u32,
    pub pre_information: Option<SetValueInformation>,
}

impl PostOperation {
    pub fn succeeded(&self) -> bool {
        self.status >= 0
    }
}

/// What a sink reports back to the hook. Observers never fail the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Success,
}

pub trait NotificationSink: Send + Sync {
    fn on_event(&self, class: NotifyClass, operation: &PostOperation) -> HookStatus;
}

/// Registration handle returned by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(u64);

#[derive(Debug, Error)]
pub enum HookError {
    #[error("no sink registered under cookie {0}")]
    UnknownCookie(u64),
}

pub trait NotificationSource {
    fn register(&self, sink: Arc<dyn NotificationSink>) -> Result<Cookie, HookError>;
    fn unregister(&self, cookie: Cookie) -> Result<(), HookError>;
}

pub trait KeyNameResolver: Send + Sync {
    /// Look up the full path of `object`. A successful lookup must be paired
    /// with [`release`](Self::release).
    fn acquire(&self, object: KeyObject) -> Option<String>;
    fn release(&self, object: KeyObject);
}

/// Scoped key name: released when dropped, whichever path the caller takes
pub struct KeyNameGuard<'a> {
    resolver: &'a dyn KeyNameResolver,
    object: KeyObject,
    name: String,
}

impl<'a> KeyNameGuard<'a> {
    pub fn acquire(resolver: &'a dyn KeyNameResolver, object: KeyObject) -> Option<Self> {
        let name = resolver.acquire(object)?;
        Some(Self { resolver, object, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for KeyNameGuard<'_> {
    fn drop(&mut self) {
        self.resolver.release(self.object);
    }
}

#[derive(Debug)]
struct KeyEntry {
    path: String,
    name_refs: usize,
}

#[derive(Debug, Default)]
struct KeyTableInner {
    next_handle: u64,
    keys: HashMap<u64, KeyEntry>,
}

/// Handle table mapping open key objects to their full paths
#[derive(Debug, Default)]
pub struct KeyTable {
    inner: Mutex<KeyTableInner>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: &str) -> KeyObject {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.keys.insert(
            handle,
            KeyEntry {
                path: path.to_string(),
                name_refs: 0,
            },
        );
        KeyObject(handle)
    }

    pub fn close(&self, object: KeyObject) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = inner.keys.remove(&object.0) {
            if entry.name_refs != 0 {
                log::warn!(
                    "key {} closed with {} unreleased name references",
                    entry.path,
                    entry.name_refs
                );
            }
        }
    }

    /// Name references acquired but not yet released, across all open keys
    pub fn outstanding_names(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.keys.values().map(|entry| entry.name_refs).sum()
    }

    pub fn open_keys(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).keys.len()
    }
}

impl KeyNameResolver for KeyTable {
    fn acquire(&self, object: KeyObject) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.keys.get_mut(&object.0)?;
        entry.name_refs += 1;
        Some(entry.path.clone())
    }

    fn release(&self, object: KeyObject) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = inner.keys.get_mut(&object.0) {
            entry.name_refs = entry.name_refs.saturating_sub(1);
        }
    }
}

/// In-process notification source
pub struct LocalHook {
    sinks: RwLock<Vec<(Cookie, Arc<dyn NotificationSink>)>>,
    next_cookie: AtomicU64,
    keys: Arc<KeyTable>,
}

impl LocalHook {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            next_cookie: AtomicU64::new(1),
            keys: Arc::new(KeyTable::new()),
        }
    }

    /// Resolver for the key objects this hook hands out
    pub fn keys(&self) -> Arc<KeyTable> {
        Arc::clone(&self.keys)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Invoke every registered sink synchronously on the calling thread
    pub fn dispatch(&self, class: NotifyClass, operation: &PostOperation) -> HookStatus {
        let sinks: Vec<Arc<dyn NotificationSink>> = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in sinks {
            sink.on_event(class, operation);
        }
        HookStatus::Success
    }

    /// Open `key_path`, report a completed value write on it, then close it
    pub fn deliver_post_set_value(&self, key_path: &str, mut operation: PostOperation) -> HookStatus {
        operation.object = self.keys.open(key_path);
        let status = self.dispatch(NotifyClass::PostSetValueKey, &operation);
        self.keys.close(operation.object);
        status
    }
}

impl Default for LocalHook {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSource for LocalHook {
    fn register(&self, sink: Arc<dyn NotificationSink>) -> Result<Cookie, HookError> {
        let cookie = Cookie(self.next_cookie.fetch_add(1, Ordering::Relaxed));
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cookie, sink));
        Ok(cookie)
    }

    fn unregister(&self, cookie: Cookie) -> Result<(), HookError> {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        let before = sinks.len();
        sinks.retain(|(registered, _)| *registered != cookie);
        if sinks.len() == before {
            return Err(HookError::UnknownCookie(cookie.0));
        }
        Ok(())
    }
}
