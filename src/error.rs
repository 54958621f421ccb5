//! Error taxonomy for the retrieval engine.
//!
//! Query-parameter problems surface as [`EngineError::Validation`]; transient
//! embedding-backend failures as [`EngineError::Encoding`] (retryable);
//! a backend that cannot be constructed at all as
//! [`EngineError::ModelUnavailable`]. Zero search results are never an error.

use thiserror::Error;

/// All failure modes surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad query parameters: malformed date range, non-positive `top_k`,
    /// unknown retrieval mode.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Transient embedding backend failure. Callers may retry, typically
    /// with a smaller batch.
    #[error("embedding backend error: {0}")]
    Encoding(String),

    /// The embedding model cannot be loaded or reached at all. Fatal to an
    /// index build; hybrid retrieval degrades to lexical-only instead.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// No READY index snapshot exists yet. The caller should trigger a build.
    #[error("no index snapshot is ready")]
    IndexUnavailable,

    /// The corpus could not be indexed. A prior snapshot, if any, remains
    /// usable.
    #[error("index build failed: {0}")]
    BuildFailure(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Encoding(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
