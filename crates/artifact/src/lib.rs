//! Versioned remote-artifact cache and symbol loader
//!
//! Worker processes pull declarative artifacts (schemas, thresholds, model
//! weights) from a versioned object store, keep a stamped local copy, and
//! memoize the symbols they load out of them for the life of the process.

pub mod cache;
pub mod config;
pub mod errors;
pub mod loader;
pub mod local;
pub mod paths;
pub mod store;
pub mod symbols;

pub use cache::{ArtifactCache, ArtifactRef, Materialized};
pub use config::CacheConfig;
pub use errors::{ArtifactError, Result};
pub use loader::{JsonSymbolLoader, SymbolLoader, TypedSymbolLoader};
pub use local::{CacheEntry, LocalCacheDirectory, VersionStamp};
pub use store::{FsVersionedStore, MemoryStore, RemoteStore, open_store};
#[cfg(feature = "http")]
pub use store::HttpStore;
pub use symbols::{RevalidationPolicy, SymbolCache, SymbolKey};
