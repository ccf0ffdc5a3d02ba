//! Versioned object store backends
//!
//! A store only has to answer two questions: "what is the current version of
//! this object" and "give me its bytes at a version". Everything about local
//! caching lives in [`crate::cache`].

use crate::errors::{ArtifactError, Result};
use std::sync::Arc;
use std::time::Duration;

pub mod fs;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;

pub use fs::FsVersionedStore;
#[cfg(feature = "http")]
pub use http::HttpStore;
pub use memory::MemoryStore;

pub trait RemoteStore: Send + Sync {
    /// Current version token of the object at `path`.
    ///
    /// Fails with `ArtifactNotFound` when the object does not exist.
    fn head(&self, path: &str) -> Result<String>;

    /// Object bytes at `version`, or at the current version when `None`.
    ///
    /// Fails with `ArtifactNotFound` for missing objects or versions and with
    /// `Transport` for anything else.
    fn fetch(&self, path: &str, version: Option<&str>) -> Result<Vec<u8>>;

    /// Remove the object at `path`.
    fn delete(&self, path: &str) -> Result<()> {
        Err(ArtifactError::transport(format!(
            "delete of {path} is not supported by this store"
        )))
    }
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn head(&self, path: &str) -> Result<String> {
        (**self).head(path)
    }

    fn fetch(&self, path: &str, version: Option<&str>) -> Result<Vec<u8>> {
        (**self).fetch(path, version)
    }

    fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path)
    }
}

impl<T: RemoteStore + ?Sized> RemoteStore for Box<T> {
    fn head(&self, path: &str) -> Result<String> {
        (**self).head(path)
    }

    fn fetch(&self, path: &str, version: Option<&str>) -> Result<Vec<u8>> {
        (**self).fetch(path, version)
    }

    fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path)
    }
}

/// Open a store from a location string.
///
/// `http://` and `https://` locations select the HTTP backend; anything else
/// is treated as the root directory of a versioned filesystem store.
pub fn open_store(location: &str, timeout: Duration) -> Result<Box<dyn RemoteStore>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        #[cfg(feature = "http")]
        {
            tracing::info!(url = %location, "Using HTTP artifact store");
            return Ok(Box::new(HttpStore::new(location, timeout)?));
        }
        #[cfg(not(feature = "http"))]
        {
            let _ = timeout;
            return Err(ArtifactError::transport(format!(
                "{location} needs the 'http' feature"
            )));
        }
    }

    tracing::info!(root = %location, "Using filesystem artifact store");
    Ok(Box::new(FsVersionedStore::open(location)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_store_delegates_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let version = store.put("schemas/frame.json", b"{}".to_vec());

        let shared: Arc<dyn RemoteStore> = store.clone();
        assert_eq!(shared.head("schemas/frame.json").unwrap(), version);
        assert_eq!(store.head_calls(), 1);
    }

    #[test]
    fn test_open_store_picks_filesystem_for_plain_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path().to_str().unwrap(), Duration::from_secs(1)).unwrap();

        assert!(matches!(
            store.head("missing.json"),
            Err(ArtifactError::ArtifactNotFound { .. })
        ));
    }
}
