//! Filtered k-nearest-neighbor search over a [`CombinedIndex`].
//!
//! Filters are applied as a pre-filter: positions whose chunk does not
//! match are skipped before distances are ranked. The index is exact and
//! brute force, so pre-filtering never loses recall and every returned
//! hit satisfies the filter.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::merge::CombinedIndex;
use crate::models::{Chunk, ChunkMetadata, SourceType};

/// Optional metadata restrictions for a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub source: Option<SourceType>,
    /// Case-insensitive category match (full Unicode lowercasing).
    #[serde(default)]
    pub category: Option<String>,
}

impl SearchFilter {
    pub fn source(source: SourceType) -> Self {
        Self {
            source: Some(source),
            category: None,
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            source: None,
            category: Some(category.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.category.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(source) = self.source {
            if chunk.source() != Some(source) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if chunk.metadata.category.to_lowercase() != category.trim().to_lowercase() {
                return false;
            }
        }
        true
    }
}

/// One ranked result, shaped for the search boundary API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_text: String,
    pub title: Option<String>,
    pub metadata: ChunkMetadata,
    /// Squared L2 distance; lower is more similar.
    pub distance: f32,
    /// Position of the chunk in the combined index.
    pub position: usize,
}

/// Rank the chunks of `combined` against an already-embedded query.
///
/// # Errors
///
/// [`Error::Validation`] if the query dimension differs from the index
/// dimension.
pub fn search_index(
    combined: &CombinedIndex,
    query: &[f32],
    k: usize,
    filter: Option<&SearchFilter>,
) -> Result<Vec<SearchResult>> {
    if query.len() != combined.dims() {
        return Err(Error::Validation(format!(
            "query embedding has dimension {}, index was built with {}",
            query.len(),
            combined.dims()
        )));
    }

    let filter = filter.filter(|f| !f.is_empty());
    let documents = combined.documents();
    let neighbors = match filter {
        Some(f) => combined
            .index()
            .search_filtered(query, k, |p| documents.get(p).map(|c| f.matches(c)).unwrap_or(false))?,
        None => combined.index().search(query, k)?,
    };

    Ok(neighbors
        .into_iter()
        .filter_map(|n| {
            documents.get(n.position).map(|chunk| SearchResult {
                chunk_text: chunk.text.clone(),
                title: chunk.title.clone(),
                metadata: chunk.metadata.clone(),
                distance: n.distance,
                position: n.position,
            })
        })
        .collect())
}
