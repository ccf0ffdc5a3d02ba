use super::{DocumentStore, apply_fields};
use anyhow::Context;
use artifact::local::write_atomic;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Documents as JSON files: `<root>/<collection>/<key>.json`.
///
/// Writes go through a temp file and rename. Upserts are serialized within
/// the process; concurrent writers in other processes are last-write-wins.
pub struct FileDocumentStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDocumentStore {
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create document store at {}", root.display()))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, collection: &str, key: &str) -> anyhow::Result<PathBuf> {
        for part in [collection, key] {
            if !is_plain_name(part) {
                anyhow::bail!("Invalid document path component: {part:?}");
            }
        }
        Ok(self.root.join(collection).join(format!("{key}.json")))
    }

    fn read(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => anyhow::bail!("{} does not hold a JSON object", path.display()),
            Err(e) => Err(e).with_context(|| format!("Failed to parse {}", path.display())),
        }
    }
}

fn is_plain_name(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\'])
        && !part.starts_with('.')
}

impl DocumentStore for FileDocumentStore {
    fn upsert(&self, collection: &str, key: &str, fields: &Map<String, Value>) -> anyhow::Result<()> {
        let path = self.document_path(collection, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut document = Self::read(&path)?.unwrap_or_default();
        apply_fields(&mut document, fields);

        let bytes = serde_json::to_vec_pretty(&Value::Object(document))?;
        write_atomic(&path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!(collection, key, "Document upserted");
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.document_path(collection, key)?;
        Ok(Self::read(&path)?.map(Value::Object))
    }
}
