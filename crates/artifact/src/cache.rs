use crate::errors::{ArtifactError, Result};
use crate::local::{CacheEntry, LocalCacheDirectory, VersionStamp};
use crate::store::RemoteStore;
use common::{RetryPolicy, retry_with_backoff};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Temp files younger than this may belong to a download still in flight.
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// Identifies a remote artifact, optionally at a fixed version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    path: String,
    pinned_version: Option<String>,
}

impl ArtifactRef {
    /// Whatever version the store currently reports.
    pub fn latest(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pinned_version: None,
        }
    }

    /// Exactly `version`, regardless of what is current.
    pub fn pinned(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pinned_version: Some(version.into()),
        }
    }

    /// `pinned` when a version is given, `latest` otherwise.
    pub fn new(path: impl Into<String>, pinned_version: Option<String>) -> Self {
        Self {
            path: path.into(),
            pinned_version,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pinned_version(&self) -> Option<&str> {
        self.pinned_version.as_deref()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pinned_version {
            Some(version) => write!(f, "{}@{}", self.path, version),
            None => write!(f, "{}@latest", self.path),
        }
    }
}

/// Outcome of [`ArtifactCache::ensure_current`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub local_path: PathBuf,
    pub version: String,
    /// False when the local copy was already current.
    pub fetched: bool,
}

/// Keeps local copies of remote artifacts current, fetching only when the
/// store reports a version the local stamp does not match.
pub struct ArtifactCache<S> {
    store: S,
    local: LocalCacheDirectory,
    retry: RetryPolicy,
}

impl<S: RemoteStore> ArtifactCache<S> {
    pub fn new(store: S, local: LocalCacheDirectory) -> Self {
        Self {
            store,
            local,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry transport failures with backoff. Not-found is never retried.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn local(&self) -> &LocalCacheDirectory {
        &self.local
    }

    /// Guarantee the local copy of `artifact` is current and return where it is.
    ///
    /// Unpinned: one `head` round-trip, then a fetch only if the local stamp
    /// differs or the local copy fails its consistency check. Pinned: no
    /// `head`, always fetch that exact version into the pinned area.
    pub fn ensure_current(&self, artifact: &ArtifactRef) -> Result<Materialized> {
        self.ensure_current_until(artifact, None)
    }

    /// [`Self::ensure_current`] bounded by `timeout`; running out of time is
    /// reported as a transport error.
    pub fn ensure_current_within(
        &self,
        artifact: &ArtifactRef,
        timeout: Duration,
    ) -> Result<Materialized> {
        self.ensure_current_until(artifact, Some(Instant::now() + timeout))
    }

    pub(crate) fn ensure_current_until(
        &self,
        artifact: &ArtifactRef,
        deadline: Option<Instant>,
    ) -> Result<Materialized> {
        let _span = tracing::debug_span!(
            "ensure_current",
            path = %artifact.path(),
            pinned = ?artifact.pinned_version()
        )
        .entered();

        let entry = self
            .local
            .entry(artifact.path(), artifact.pinned_version())?;

        let target_version = match artifact.pinned_version() {
            Some(version) => version.to_string(),
            None => {
                check_deadline(deadline, artifact)?;
                self.retry_op("head", artifact, deadline, || {
                    self.store.head(artifact.path())
                })?
            }
        };

        if artifact.pinned_version().is_none()
            && let Some(current) = self.current_copy(&entry, &target_version)?
        {
            tracing::debug!(version = %target_version, "Local copy is current");
            return Ok(current);
        }

        check_deadline(deadline, artifact)?;
        let bytes = self.retry_op("fetch", artifact, deadline, || {
            self.store.fetch(artifact.path(), Some(&target_version))
        })?;

        self.materialize(&entry, &target_version, &bytes)?;

        tracing::info!(
            path = %artifact.path(),
            version = %target_version,
            bytes = bytes.len(),
            "Artifact downloaded"
        );

        Ok(Materialized {
            local_path: entry.content,
            version: target_version,
            fetched: true,
        })
    }

    /// The local copy, if its stamp matches `target_version` and the content
    /// backs the stamp up.
    fn current_copy(&self, entry: &CacheEntry, target_version: &str) -> Result<Option<Materialized>> {
        let Some(stamp) = self.local.read_entry_stamp(entry)? else {
            return Ok(None);
        };
        if stamp.version != target_version {
            tracing::debug!(
                cached = %stamp.version,
                remote = %target_version,
                "Remote version changed"
            );
            return Ok(None);
        }

        match self.local.verify(entry, &stamp) {
            Ok(()) => Ok(Some(Materialized {
                local_path: entry.content.clone(),
                version: stamp.version,
                fetched: false,
            })),
            Err(e @ ArtifactError::CacheConsistency { .. }) => {
                tracing::warn!(error = %e, "Distrusting local stamp, fetching again");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Content first (temp + rename), stamp only once the content is in place.
    fn materialize(&self, entry: &CacheEntry, version: &str, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.local.remove_stale_temps(entry, STALE_TEMP_AGE) {
            tracing::warn!(error = %e, path = %entry.key, "Could not clean leftover downloads");
        }

        self.local.write_content(entry, bytes)?;

        let stamp = VersionStamp::new(version, bytes.len() as u64);
        self.local.verify(entry, &stamp)?;
        self.local.write_entry_stamp(entry, &stamp)
    }

    fn retry_op<T>(
        &self,
        operation: &str,
        artifact: &ArtifactRef,
        deadline: Option<Instant>,
        f: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        retry_with_backoff(
            f,
            &self.retry,
            deadline,
            &format!("{operation} {artifact}"),
            ArtifactError::is_retryable,
        )
    }
}

pub(crate) fn check_deadline(deadline: Option<Instant>, artifact: &ArtifactRef) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ArtifactError::transport(format!(
            "deadline exceeded while syncing {artifact}"
        ))),
        _ => Ok(()),
    }
}
