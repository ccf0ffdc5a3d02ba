use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact not found: {path}{}", version_suffix(.version))]
    ArtifactNotFound {
        path: String,
        version: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to resolve symbol '{symbol}' from {path}: {reason}")]
    SymbolResolution {
        path: String,
        symbol: String,
        reason: String,
    },

    #[error("Cache inconsistent for {path}: {reason}")]
    CacheConsistency { path: String, reason: String },

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArtifactError {
    pub fn not_found(path: &str, version: Option<&str>) -> Self {
        Self::ArtifactNotFound {
            path: path.to_string(),
            version: version.map(str::to_string),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn symbol(path: &str, symbol: &str, reason: impl Into<String>) -> Self {
        Self::SymbolResolution {
            path: path.to_string(),
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    /// Only transport faults are transient; absence and bad content are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

fn version_suffix(version: &Option<String>) -> String {
    match version {
        Some(v) => format!(" (version {v})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;
