//! On-disk layout of the local artifact cache
//!
//! ```text
//! <root>/<key>                          latest content of an artifact
//! <root>/<key>.version                  its version stamp
//! <root>/.pinned/<version>/<key>        content materialized for a pinned version
//! <root>/.pinned/<version>/<key>.version
//! <dir>/.<file>.tmp-<pid>-<n>           in-flight download, renamed into place
//! ```
//!
//! Every process sharing a cache root derives the same paths from the same
//! remote key, so the mapping must stay deterministic.

use crate::errors::{ArtifactError, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default cache root, relative to the working directory
pub const DEFAULT_CACHE_DIR: &str = "./tmp/cache";

/// Suffix of the version stamp sidecar file
pub const STAMP_SUFFIX: &str = ".version";

/// Directory under the cache root holding pinned-version materializations
pub const PINNED_DIR: &str = ".pinned";

pub(crate) const TEMP_MARKER: &str = ".tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Map a remote key to a relative path under the cache root.
///
/// Leading slashes are stripped. Keys that would escape the root, collide
/// with stamp or temp files, or land in the pinned area are rejected.
pub fn key_to_relative(key: &str) -> Result<PathBuf> {
    let trimmed = key.trim_start_matches('/');
    let invalid = || ArtifactError::InvalidPath(key.to_string());

    if trimmed.is_empty() || trimmed.ends_with('/') || trimmed.ends_with(STAMP_SUFFIX) {
        return Err(invalid());
    }

    let mut relative = PathBuf::new();
    for (i, part) in trimmed.split('/').enumerate() {
        if part.is_empty() || part.contains(TEMP_MARKER) || (i == 0 && part == PINNED_DIR) {
            return Err(invalid());
        }
        match Path::new(part).components().next() {
            Some(Component::Normal(_)) => relative.push(part),
            _ => return Err(invalid()),
        }
    }
    Ok(relative)
}

/// Replace characters that are unsafe in a single path component.
pub fn sanitize_version(version: &str) -> String {
    let cleaned: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => format!("v{}", cleaned.replace('.', "_")),
        _ => cleaned,
    }
}

/// Sidecar path holding the version stamp for `content`.
pub fn stamp_path(content: &Path) -> PathBuf {
    let mut name = content.file_name().unwrap_or_default().to_os_string();
    name.push(STAMP_SUFFIX);
    content.with_file_name(name)
}

/// A fresh temp path in the same directory as `target`, so a rename onto
/// `target` stays on one filesystem.
pub(crate) fn temp_path(target: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = std::ffi::OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!("{}{}-{}", TEMP_MARKER, std::process::id(), n));
    target.with_file_name(name)
}

/// True when `file_name` is a temp file left over for `target_name`.
pub(crate) fn is_temp_for(file_name: &str, target_name: &str) -> bool {
    file_name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(target_name))
        .is_some_and(|rest| rest.starts_with(TEMP_MARKER))
}
