use super::RemoteStore;
use crate::errors::{ArtifactError, Result};
use crate::local::write_atomic;
use crate::paths::{key_to_relative, sanitize_version};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const HEAD_FILE: &str = "HEAD";
const VERSIONS_DIR: &str = "versions";

/// Versioned object store on a (possibly network-mounted) filesystem.
///
/// ```text
/// <root>/<key>/HEAD                 current version token
/// <root>/<key>/versions/<token>     content of each published version
/// ```
///
/// Tokens are zero-padded sequence numbers, so lexical order is publish order.
pub struct FsVersionedStore {
    root: PathBuf,
}

impl FsVersionedStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish new content for `path` and make it the current version.
    ///
    /// The content lands before HEAD moves, so readers never see a HEAD that
    /// points at a missing version.
    pub fn publish(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let object_dir = self.object_dir(path)?;
        let versions_dir = object_dir.join(VERSIONS_DIR);
        fs::create_dir_all(&versions_dir)?;

        let next = self.latest_sequence(&versions_dir)? + 1;
        let version = format!("{next:08}");

        write_atomic(&versions_dir.join(&version), bytes)?;
        write_atomic(&object_dir.join(HEAD_FILE), version.as_bytes())?;

        tracing::debug!(path, version = %version, bytes = bytes.len(), "Published artifact");
        Ok(version)
    }

    fn object_dir(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(key_to_relative(path)?))
    }

    fn latest_sequence(&self, versions_dir: &Path) -> Result<u64> {
        let mut latest = 0;
        for entry in fs::read_dir(versions_dir)? {
            let name = entry?.file_name();
            if let Some(n) = name.to_str().and_then(|s| s.parse::<u64>().ok()) {
                latest = latest.max(n);
            }
        }
        Ok(latest)
    }
}

/// Map filesystem errors onto the store taxonomy.
fn classify(err: io::Error, path: &str, version: Option<&str>) -> ArtifactError {
    match err.kind() {
        io::ErrorKind::NotFound => ArtifactError::not_found(path, version),
        _ => ArtifactError::transport(format!("{path}: {err}")),
    }
}

impl RemoteStore for FsVersionedStore {
    fn head(&self, path: &str) -> Result<String> {
        let head = self.object_dir(path)?.join(HEAD_FILE);
        let version = fs::read_to_string(head).map_err(|e| classify(e, path, None))?;
        let version = version.trim();
        if version.is_empty() {
            return Err(ArtifactError::transport(format!("{path}: empty HEAD")));
        }
        Ok(version.to_string())
    }

    fn fetch(&self, path: &str, version: Option<&str>) -> Result<Vec<u8>> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self.head(path)?,
        };

        // Tokens are plain file names; anything else cannot exist here.
        if sanitize_version(&version) != version {
            return Err(ArtifactError::not_found(path, Some(&version)));
        }

        let file = self.object_dir(path)?.join(VERSIONS_DIR).join(&version);
        fs::read(file).map_err(|e| classify(e, path, Some(&version)))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let object_dir = self.object_dir(path)?;
        if !object_dir.join(HEAD_FILE).exists() {
            return Err(ArtifactError::not_found(path, None));
        }
        fs::remove_dir_all(&object_dir).map_err(|e| classify(e, path, None))
    }
}
