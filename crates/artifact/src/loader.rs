//! Resolving named symbols out of synced artifact files
//!
//! Artifacts are declarative documents, never code: a JSON artifact is an
//! object whose top-level keys are the symbols it defines.

use crate::errors::{ArtifactError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

pub trait SymbolLoader: Send + Sync {
    type Symbol: Send + Sync + 'static;

    /// Load the artifact at `local_path` and look up `symbol` in it.
    ///
    /// Unparsable content and missing symbols are both `SymbolResolution`
    /// errors; they describe the content, not the transport.
    fn resolve(&self, local_path: &Path, symbol: &str) -> Result<Self::Symbol>;
}

/// Resolves symbols as raw JSON values.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSymbolLoader;

impl JsonSymbolLoader {
    fn load_document(&self, local_path: &Path, symbol: &str) -> Result<serde_json::Map<String, Value>> {
        let display = local_path.display().to_string();

        let is_json = local_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return Err(ArtifactError::symbol(
                &display,
                symbol,
                "unsupported artifact format (expected .json)",
            ));
        }

        let text = fs::read_to_string(local_path)
            .map_err(|e| ArtifactError::symbol(&display, symbol, format!("unreadable: {e}")))?;

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ArtifactError::symbol(
                &display,
                symbol,
                "artifact root is not an object",
            )),
            Err(e) => Err(ArtifactError::symbol(
                &display,
                symbol,
                format!("invalid JSON: {e}"),
            )),
        }
    }
}

impl SymbolLoader for JsonSymbolLoader {
    type Symbol = Value;

    fn resolve(&self, local_path: &Path, symbol: &str) -> Result<Value> {
        let mut document = self.load_document(local_path, symbol)?;

        document.remove(symbol).ok_or_else(|| {
            let mut defined: Vec<_> = document.keys().map(String::as_str).collect();
            defined.sort_unstable();
            ArtifactError::symbol(
                &local_path.display().to_string(),
                symbol,
                format!("not defined (available: {})", defined.join(", ")),
            )
        })
    }
}

/// Resolves a JSON symbol and deserializes it into `T`.
pub struct TypedSymbolLoader<T> {
    json: JsonSymbolLoader,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSymbolLoader<T> {
    pub fn new() -> Self {
        Self {
            json: JsonSymbolLoader,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSymbolLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SymbolLoader for TypedSymbolLoader<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Symbol = T;

    fn resolve(&self, local_path: &Path, symbol: &str) -> Result<T> {
        let value = self.json.resolve(local_path, symbol)?;
        serde_json::from_value(value).map_err(|e| {
            ArtifactError::symbol(
                &local_path.display().to_string(),
                symbol,
                format!("does not match {}: {e}", std::any::type_name::<T>()),
            )
        })
    }
}
