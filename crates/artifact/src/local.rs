use crate::errors::{ArtifactError, Result};
use crate::paths::{self, PINNED_DIR, is_temp_for, key_to_relative, sanitize_version, stamp_path};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Version of an artifact as materialized on local disk.
///
/// Serialized as the version token on the first line, optionally followed by
/// `size=<bytes>` of the content it was written for. Stamps with only the
/// token line are accepted and simply skip the size check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStamp {
    pub version: String,
    pub size: Option<u64>,
}

impl VersionStamp {
    pub fn new(version: impl Into<String>, size: u64) -> Self {
        Self {
            version: version.into(),
            size: Some(size),
        }
    }

    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let version = lines.next()?.trim();
        if version.is_empty() {
            return None;
        }

        let size = lines
            .filter_map(|line| line.trim().strip_prefix("size="))
            .find_map(|n| n.parse().ok());

        Some(Self {
            version: version.to_string(),
            size,
        })
    }

    fn render(&self) -> String {
        match self.size {
            Some(size) => format!("{}\nsize={}\n", self.version, size),
            None => format!("{}\n", self.version),
        }
    }
}

/// Where one artifact (latest or a pinned version) lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub content: PathBuf,
    pub stamp: PathBuf,
}

/// Directory on durable storage holding downloaded artifacts and their stamps.
#[derive(Debug, Clone)]
pub struct LocalCacheDirectory {
    root: PathBuf,
}

impl LocalCacheDirectory {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the on-disk entry for `key`. Nothing is created until content
    /// is written.
    ///
    /// Pinned versions get their own area so they never disturb the content
    /// or stamp of the latest copy.
    pub fn entry(&self, key: &str, pinned_version: Option<&str>) -> Result<CacheEntry> {
        let relative = key_to_relative(key)?;
        let content = match pinned_version {
            Some(version) => self
                .root
                .join(PINNED_DIR)
                .join(sanitize_version(version))
                .join(relative),
            None => self.root.join(relative),
        };

        Ok(CacheEntry {
            key: key.to_string(),
            stamp: stamp_path(&content),
            content,
        })
    }

    /// Local file location of the latest copy of `key`, with its parent
    /// directories created.
    pub fn local_path(&self, key: &str) -> Result<PathBuf> {
        let content = self.entry(key, None)?.content;
        if let Some(parent) = content.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(content)
    }

    /// Version recorded for the latest copy of `key`, if it was ever downloaded.
    pub fn read_stamp(&self, key: &str) -> Result<Option<String>> {
        let entry = self.entry(key, None)?;
        Ok(self.read_entry_stamp(&entry)?.map(|s| s.version))
    }

    /// Record `version` for the latest copy of `key`, sized from what is on disk.
    pub fn write_stamp(&self, key: &str, version: &str) -> Result<()> {
        let entry = self.entry(key, None)?;
        let size = fs::metadata(&entry.content)?.len();
        self.write_entry_stamp(&entry, &VersionStamp::new(version, size))
    }

    pub fn read_entry_stamp(&self, entry: &CacheEntry) -> Result<Option<VersionStamp>> {
        match fs::read_to_string(&entry.stamp) {
            Ok(text) => {
                let stamp = VersionStamp::parse(&text);
                if stamp.is_none() {
                    tracing::warn!(path = %entry.key, "Ignoring unreadable version stamp");
                }
                Ok(stamp)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Must only be called once the content it describes is in place.
    pub fn write_entry_stamp(&self, entry: &CacheEntry, stamp: &VersionStamp) -> Result<()> {
        write_atomic(&entry.stamp, stamp.render().as_bytes())?;
        Ok(())
    }

    /// Replace the content of `entry` without ever exposing a partial file.
    pub fn write_content(&self, entry: &CacheEntry, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = entry.content.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&entry.content, bytes)?;
        Ok(())
    }

    /// Check that the content on disk is what `stamp` claims it is.
    pub fn verify(&self, entry: &CacheEntry, stamp: &VersionStamp) -> Result<()> {
        let inconsistent = |reason: String| ArtifactError::CacheConsistency {
            path: entry.key.clone(),
            reason,
        };

        let metadata = match fs::metadata(&entry.content) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(inconsistent(format!(
                    "stamp {} present but content is missing",
                    stamp.version
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(inconsistent("content path is not a regular file".to_string()));
        }

        if let Some(expected) = stamp.size
            && metadata.len() != expected
        {
            return Err(inconsistent(format!(
                "stamp {} expects {} bytes, found {}",
                stamp.version,
                expected,
                metadata.len()
            )));
        }

        Ok(())
    }

    /// Remove temp files left next to `entry` by downloads that never finished.
    ///
    /// Only files older than `older_than` are touched, so a download in
    /// flight in another process sharing this directory survives.
    pub fn remove_stale_temps(&self, entry: &CacheEntry, older_than: Duration) -> Result<usize> {
        let (Some(dir), Some(target)) = (
            entry.content.parent(),
            entry.content.file_name().and_then(|n| n.to_str()),
        ) else {
            return Ok(0);
        };

        let listing = match fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let stamp_target = format!("{target}{}", paths::STAMP_SUFFIX);
        let mut removed = 0;
        for dir_entry in listing {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_temp_for(name, target) && !is_temp_for(name, &stamp_target) {
                continue;
            }

            let age = dir_entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            match fs::remove_file(dir_entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            tracing::info!(path = %entry.key, removed, "Removed leftover partial downloads");
        }
        Ok(removed)
    }
}

/// Write `bytes` to a temp file next to `target`, flush it, then rename it
/// over `target`. Observers see either the old file or the new one.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = paths::temp_path(target);

    let written: io::Result<()> = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, target)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Some(parent) = target.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
