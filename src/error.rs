//! Typed failure taxonomy for cache and retrieval operations.
//!
//! Structural errors propagate as typed variants so callers can distinguish
//! "rebuild needed" ([`CacheError::CacheCorrupted`]) from "nothing to show"
//! ([`CacheError::IndexNotFound`]). Per-file errors during batch operations
//! (discovery, indexing) never surface here; they are logged and skipped at
//! the call site.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the cache lifecycle and retrieval engine.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No cache exists for the resolved branch. Fatal for the query;
    /// recoverable by running an index step.
    #[error("no cache index found for branch '{branch}'")]
    IndexNotFound { branch: String },

    /// A persisted cache or metadata file failed to parse. Treated as
    /// "must rebuild", never as an empty cache.
    #[error("cache file {} for branch '{branch}' is corrupted: {reason}", path.display())]
    CacheCorrupted {
        branch: String,
        path: PathBuf,
        reason: String,
    },

    /// The external embedding engine failed. Fatal per call; embeddings are
    /// deterministic, so retrying at this layer would not change the outcome.
    #[error("embedding engine failure: {0}")]
    EmbeddingEngineFailure(String),

    /// Git porcelain was needed but unavailable. Branch-scoped behavior
    /// degrades to a no-op rather than surfacing this in most paths.
    #[error("git unavailable: {0}")]
    GitUnavailable(String),

    /// The optional external knowledge source failed. Retrieval logs this
    /// and degrades to local-only results.
    #[error("external knowledge source failure: {0}")]
    ExternalSourceFailure(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupted(
        branch: &str,
        path: impl Into<PathBuf>,
        reason: impl ToString,
    ) -> Self {
        Self::CacheCorrupted {
            branch: branch.to_string(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
