use super::RemoteStore;
use crate::errors::{ArtifactError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// In-process versioned store.
///
/// Keeps every published version of every object, counts calls, and can be
/// told to fail or slow down fetches. Used by tests and benches, and handy as
/// a local stand-in when no object store is reachable.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    next_version: AtomicU64,
    head_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    failing_fetches: AtomicU32,
    fetch_delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish new content for `path`, returning its version token.
    pub fn put(&self, path: &str, bytes: Vec<u8>) -> String {
        let n = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
        let version = format!("v{n}");
        self.objects()
            .entry(path.to_string())
            .or_default()
            .push((version.clone(), bytes));
        version
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::Acquire)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::Acquire)
    }

    pub fn reset_counters(&self) {
        self.head_calls.store(0, Ordering::Release);
        self.fetch_calls.store(0, Ordering::Release);
    }

    /// Make the next `n` fetches fail with a transport error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::Release);
    }

    /// Delay every fetch, to widen race windows in concurrency tests.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self
            .fetch_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, Vec<(String, Vec<u8>)>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RemoteStore for MemoryStore {
    fn head(&self, path: &str) -> Result<String> {
        self.head_calls.fetch_add(1, Ordering::AcqRel);
        self.objects()
            .get(path)
            .and_then(|versions| versions.last())
            .map(|(version, _)| version.clone())
            .ok_or_else(|| ArtifactError::not_found(path, None))
    }

    fn fetch(&self, path: &str, version: Option<&str>) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::AcqRel);

        let delay = *self
            .fetch_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let injected_failure = self
            .failing_fetches
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(ArtifactError::transport(format!(
                "injected failure fetching {path}"
            )));
        }

        let objects = self.objects();
        let versions = objects
            .get(path)
            .ok_or_else(|| ArtifactError::not_found(path, version))?;

        let found = match version {
            Some(wanted) => versions.iter().find(|(v, _)| v == wanted),
            None => versions.last(),
        };

        found
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ArtifactError::not_found(path, version))
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.objects()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ArtifactError::not_found(path, None))
    }
}
