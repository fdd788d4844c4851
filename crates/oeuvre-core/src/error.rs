//! Error taxonomy shared by every oeuvre component.
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | [`Error::NotReady`] | The vector store has no loaded index |
//! | [`Error::Validation`] | Count, checksum, dimension or model identity checks fail |
//! | [`Error::EmbeddingBackend`] | A backend cannot be initialized or fails to encode |
//! | [`Error::MergeDimensionMismatch`] | Shards with different dimensions are merged |
//! | [`Error::MalformedQuery`] | A search request is unusable (empty query, `k == 0`) |

use thiserror::Error;

use crate::models::SourceType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("vector store not ready: {0}")]
    NotReady(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("cannot merge {shard} shard: expected dimension {expected}, found {found}")]
    MergeDimensionMismatch {
        shard: SourceType,
        expected: usize,
        found: usize,
    },

    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors the search boundary reports as "service unavailable".
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
