use crate::cache::{ArtifactCache, ArtifactRef, Materialized, check_deadline};
use crate::errors::Result;
use crate::loader::SymbolLoader;
use crate::store::RemoteStore;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

/// Identifies one loaded symbol within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    pub path: String,
    pub symbol: String,
}

impl SymbolKey {
    pub fn new(path: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            symbol: symbol.into(),
        }
    }
}

/// When a memoized symbol or synced artifact is checked against the store again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevalidationPolicy {
    /// Once anything has been loaded from an artifact, neither it nor any
    /// other symbol of that artifact is checked for freshness again.
    #[default]
    NoRevalidateAfterFirstLoad,
    /// Entries older than the interval are treated as misses.
    Every(Duration),
}

impl RevalidationPolicy {
    fn is_fresh(&self, since: Instant) -> bool {
        match self {
            Self::NoRevalidateAfterFirstLoad => true,
            Self::Every(interval) => since.elapsed() < *interval,
        }
    }
}

struct Stamped<T> {
    value: T,
    at: Instant,
}

/// One memo cell. Its mutex is held for the whole load, so concurrent misses
/// on the same key wait for the first loader instead of fetching again.
type Slot<T> = Arc<Mutex<Option<Stamped<T>>>>;

/// Process-wide, append-only table of symbols loaded from remote artifacts.
///
/// Construct one per process and hand it to consumers; it is `Sync` and meant
/// to be shared behind an `Arc`.
pub struct SymbolCache<S, L: SymbolLoader> {
    artifacts: ArtifactCache<S>,
    loader: L,
    policy: RevalidationPolicy,
    symbols: Mutex<HashMap<SymbolKey, Slot<Arc<L::Symbol>>>>,
    synced: Mutex<HashMap<ArtifactRef, Slot<PathBuf>>>,
}

impl<S: RemoteStore, L: SymbolLoader> SymbolCache<S, L> {
    pub fn new(artifacts: ArtifactCache<S>, loader: L) -> Self {
        Self {
            artifacts,
            loader,
            policy: RevalidationPolicy::default(),
            symbols: Mutex::new(HashMap::new()),
            synced: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_revalidation(mut self, policy: RevalidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn artifacts(&self) -> &ArtifactCache<S> {
        &self.artifacts
    }

    /// Number of symbols currently memoized. Keys with a load in flight are
    /// not counted.
    pub fn len(&self) -> usize {
        let slots: Vec<_> = lock(&self.symbols).values().cloned().collect();
        slots
            .iter()
            .filter(|slot| match slot.try_lock() {
                Ok(loaded) => loaded.is_some(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
                Err(TryLockError::WouldBlock) => false,
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The symbol `symbol` defined in `artifact`.
    ///
    /// Memoized under `(path, symbol)`: a hit returns immediately without
    /// asking the store anything. On a miss the artifact is synced (unless
    /// another symbol of it was already loaded in this process) and the
    /// symbol resolved from the local file.
    pub fn get(&self, artifact: &ArtifactRef, symbol: &str) -> Result<Arc<L::Symbol>> {
        self.get_until(artifact, symbol, None)
    }

    /// [`Self::get`] bounded by `timeout` for the sync and resolve steps.
    ///
    /// Time spent waiting on another caller's in-flight load of the same key
    /// is not bounded.
    pub fn get_within(
        &self,
        artifact: &ArtifactRef,
        symbol: &str,
        timeout: Duration,
    ) -> Result<Arc<L::Symbol>> {
        self.get_until(artifact, symbol, Some(Instant::now() + timeout))
    }

    /// Force a sync of `artifact` without resolving anything from it, for
    /// artifacts consumed by path (model weights and the like).
    pub fn prefetch(&self, artifact: &ArtifactRef) -> Result<PathBuf> {
        let slot = slot_for(&self.synced, artifact.clone());
        let mut synced = lock(&slot);

        let Materialized { local_path, .. } = self.artifacts.ensure_current(artifact)?;
        *synced = Some(Stamped {
            value: local_path.clone(),
            at: Instant::now(),
        });
        Ok(local_path)
    }

    fn get_until(
        &self,
        artifact: &ArtifactRef,
        symbol: &str,
        deadline: Option<Instant>,
    ) -> Result<Arc<L::Symbol>> {
        let key = SymbolKey::new(artifact.path(), symbol);
        let slot = slot_for(&self.symbols, key);
        let mut loaded = lock(&slot);

        if let Some(hit) = loaded.as_ref()
            && self.policy.is_fresh(hit.at)
        {
            return Ok(hit.value.clone());
        }

        let value = Arc::new(self.resolve_synced(artifact, symbol, deadline)?);

        tracing::debug!(artifact = %artifact, symbol, "Symbol loaded");

        *loaded = Some(Stamped {
            value: value.clone(),
            at: Instant::now(),
        });
        Ok(value)
    }

    /// Resolve `symbol` from the local copy of `artifact`, syncing it first
    /// unless a symbol was already resolved from it (within the revalidation
    /// policy).
    ///
    /// A copy only counts as synced once something resolved from it, so a
    /// failed resolve makes the next miss ask the store again.
    fn resolve_synced(
        &self,
        artifact: &ArtifactRef,
        symbol: &str,
        deadline: Option<Instant>,
    ) -> Result<L::Symbol> {
        let slot = slot_for(&self.synced, artifact.clone());
        let mut synced = lock(&slot);

        let reusable = synced
            .as_ref()
            .filter(|previous| self.policy.is_fresh(previous.at))
            .map(|previous| previous.value.clone());
        let just_synced = reusable.is_none();

        let local_path = match reusable {
            Some(path) => path,
            None => {
                self.artifacts
                    .ensure_current_until(artifact, deadline)?
                    .local_path
            }
        };

        check_deadline(deadline, artifact)?;
        match self.loader.resolve(&local_path, symbol) {
            Ok(value) => {
                if just_synced {
                    *synced = Some(Stamped {
                        value: local_path,
                        at: Instant::now(),
                    });
                }
                Ok(value)
            }
            Err(e) => {
                *synced = None;
                Err(e)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slot_for<K: Eq + Hash, T>(table: &Mutex<HashMap<K, Slot<T>>>, key: K) -> Slot<T> {
    lock(table).entry(key).or_default().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ArtifactError;
    use crate::loader::JsonSymbolLoader;
    use crate::local::LocalCacheDirectory;
    use crate::store::MemoryStore;
    use tempfile::{TempDir, tempdir};

    type TestCache = SymbolCache<Arc<MemoryStore>, JsonSymbolLoader>;

    fn setup() -> (TempDir, Arc<MemoryStore>, TestCache) {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let local = LocalCacheDirectory::open(dir.path()).unwrap();
        let cache = SymbolCache::new(ArtifactCache::new(store.clone(), local), JsonSymbolLoader);
        (dir, store, cache)
    }

    #[test]
    fn test_hit_returns_same_instance_without_store_calls() {
        let (_dir, store, cache) = setup();
        store.put("schemas/frame.json", br#"{"Imgdata": {"x": 1}}"#.to_vec());
        let artifact = ArtifactRef::latest("schemas/frame.json");

        let first = cache.get(&artifact, "Imgdata").unwrap();
        store.reset_counters();
        let second = cache.get(&artifact, "Imgdata").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.head_calls(), 0);
        assert_eq!(store.fetch_calls(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_load_is_not_memoized() {
        let (_dir, store, cache) = setup();
        let artifact = ArtifactRef::latest("schemas/frame.json");

        assert!(matches!(
            cache.get(&artifact, "Imgdata"),
            Err(ArtifactError::ArtifactNotFound { .. })
        ));
        assert!(cache.is_empty());

        store.put("schemas/frame.json", br#"{"Imgdata": 1}"#.to_vec());
        assert_eq!(*cache.get(&artifact, "Imgdata").unwrap(), 1);
    }

    #[test]
    fn test_resolution_error_propagates_unchanged() {
        let (_dir, store, cache) = setup();
        store.put("schemas/frame.json", br#"{"Imgdata": 1}"#.to_vec());

        let err = cache
            .get(&ArtifactRef::latest("schemas/frame.json"), "Missing")
            .unwrap_err();
        assert!(matches!(err, ArtifactError::SymbolResolution { .. }));
    }

    #[test]
    fn test_failed_resolve_resyncs_on_next_miss() {
        let (_dir, store, cache) = setup();
        let artifact = ArtifactRef::latest("config/thresholds.json");

        store.put("config/thresholds.json", br#"{"ball": 0.7}"#.to_vec());
        assert!(matches!(
            cache.get(&artifact, "player"),
            Err(ArtifactError::SymbolResolution { .. })
        ));

        store.put(
            "config/thresholds.json",
            br#"{"ball": 0.7, "player": 0.5}"#.to_vec(),
        );
        store.reset_counters();

        assert_eq!(*cache.get(&artifact, "player").unwrap(), 0.5);
        assert_eq!(store.head_calls(), 1);
        assert_eq!(store.fetch_calls(), 1);
    }

    #[test]
    fn test_second_symbol_reuses_synced_artifact() {
        let (_dir, store, cache) = setup();
        let artifact = ArtifactRef::latest("config/thresholds.json");
        store.put(
            "config/thresholds.json",
            br#"{"ball": 0.7, "player": 0.5}"#.to_vec(),
        );

        cache.get(&artifact, "ball").unwrap();
        store.reset_counters();
        assert_eq!(*cache.get(&artifact, "player").unwrap(), 0.5);

        assert_eq!(store.head_calls(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_periodic_revalidation_picks_up_new_versions() {
        let (_dir, store, cache) = setup();
        let cache = cache.with_revalidation(RevalidationPolicy::Every(Duration::ZERO));
        let artifact = ArtifactRef::latest("config/thresholds.json");

        store.put("config/thresholds.json", br#"{"ball": 0.7}"#.to_vec());
        assert_eq!(*cache.get(&artifact, "ball").unwrap(), 0.7);

        store.put("config/thresholds.json", br#"{"ball": 0.8}"#.to_vec());
        assert_eq!(*cache.get(&artifact, "ball").unwrap(), 0.8);
    }

    #[test]
    fn test_prefetch_always_syncs() {
        let (_dir, store, cache) = setup();
        store.put("models/detr.onnx", b"weights-1".to_vec());
        let artifact = ArtifactRef::latest("models/detr.onnx");

        let path = cache.prefetch(&artifact).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"weights-1");

        store.put("models/detr.onnx", b"weights-2".to_vec());
        let path = cache.prefetch(&artifact).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"weights-2");
        assert_eq!(store.head_calls(), 2);
    }
}
