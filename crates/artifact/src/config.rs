use crate::cache::ArtifactCache;
use crate::errors::Result;
use crate::loader::SymbolLoader;
use crate::local::LocalCacheDirectory;
use crate::paths::DEFAULT_CACHE_DIR;
use crate::store::{RemoteStore, open_store};
use crate::symbols::{RevalidationPolicy, SymbolCache};
use common::{RetryPolicy, env_opt, env_or, env_parse};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_STORE_LOCATION: &str = "./tmp/store";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    /// `http(s)://` base URL or filesystem store root
    pub store_location: String,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    pub revalidation: RevalidationPolicy,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let cache_dir = PathBuf::from(env_or("ARTIFACT_CACHE_DIR", DEFAULT_CACHE_DIR));

        let store_location = env_or("ARTIFACT_STORE_URL", DEFAULT_STORE_LOCATION);

        let fetch_timeout = Duration::from_millis(env_parse("ARTIFACT_FETCH_TIMEOUT_MS", 30_000));

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("ARTIFACT_RETRY_ATTEMPTS", defaults.max_attempts).max(1),
            base_delay: Duration::from_millis(env_parse("ARTIFACT_RETRY_BASE_MS", 200)),
            max_delay: defaults.max_delay,
        };

        let revalidation = env_opt("ARTIFACT_REVALIDATE_SECS")
            .and_then(|secs| secs.parse().ok())
            .map(|secs| RevalidationPolicy::Every(Duration::from_secs(secs)))
            .unwrap_or_default();

        Self {
            cache_dir,
            store_location,
            fetch_timeout,
            retry,
            revalidation,
        }
    }

    pub fn open_store(&self) -> Result<Box<dyn RemoteStore>> {
        open_store(&self.store_location, self.fetch_timeout)
    }

    pub fn artifact_cache(&self) -> Result<ArtifactCache<Box<dyn RemoteStore>>> {
        let local = LocalCacheDirectory::open(&self.cache_dir)?;
        Ok(ArtifactCache::new(self.open_store()?, local).with_retry(self.retry.clone()))
    }
}

impl<L: SymbolLoader> SymbolCache<Box<dyn RemoteStore>, L> {
    /// Everything wired from configuration: store, local cache, retries and
    /// revalidation.
    pub fn from_config(config: &CacheConfig, loader: L) -> Result<Self> {
        Ok(SymbolCache::new(config.artifact_cache()?, loader).with_revalidation(config.revalidation))
    }
}
