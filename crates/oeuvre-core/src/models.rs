//! Core data models.
//!
//! A [`RawDocument`] arrives from the scraping side, is scored and cut
//! into [`Chunk`]s, and never outlives ingestion. Chunks are what gets
//! embedded, persisted in index sidecars, and returned by search.
//!
//! The serialized form of a chunk is exactly one entry of the
//! `documents` array in an index sidecar:
//!
//! ```json
//! {
//!   "text": "...",
//!   "metadata": {
//!     "source": "book",
//!     "category": "essay",
//!     "date": "1994",
//!     "url": null,
//!     "quality_score": 0.82,
//!     "chunk_index": 3,
//!     "chunk_id": "5f1c..."
//!   },
//!   "title": "Collected Essays"
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The kind of content a document was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Book,
    News,
    Forum,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Book, SourceType::News, SourceType::Forum];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Book => "book",
            SourceType::News => "news",
            SourceType::Forum => "forum",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "book" | "books" => Ok(SourceType::Book),
            "news" => Ok(SourceType::News),
            "forum" | "forums" => Ok(SourceType::Forum),
            other => Err(Error::Validation(format!("unknown source type '{}'", other))),
        }
    }
}

/// One scraped artifact: a book file, a news page, or a forum thread page.
///
/// This is the boundary record produced by external scrapers and
/// extractors. Only `text`, `source_type` and `filename` are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub source_type: SourceType,
    pub filename: String,
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Free-form tag such as a forum sub-category or news section.
    #[serde(default)]
    pub category: Option<String>,
}

impl RawDocument {
    pub fn new(source_type: SourceType, filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_type,
            filename: filename.into(),
            text: text.into(),
            author: None,
            date: None,
            url: None,
            title: None,
            category: None,
        }
    }

    /// Category used for chunk metadata: the explicit one, else the source name.
    pub fn effective_category(&self) -> String {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.source_type.as_str().to_string())
    }

    /// Title used for chunks: the explicit one, else the filename stem.
    pub fn effective_title(&self) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                return title.to_string();
            }
        }
        let name = self.filename.rsplit(['/', '\\']).next().unwrap_or(&self.filename);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name.to_string(),
        }
    }
}

/// Per-chunk metadata carried through indexing and returned by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating source. Absent only in legacy sidecars; the merger tags it.
    #[serde(default)]
    pub source: Option<SourceType>,
    pub category: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub quality_score: f32,
    pub chunk_index: usize,
    pub chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Structural heading the chunk was cut from, for long-form sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub title: Option<String>,
}

impl Chunk {
    pub fn id(&self) -> &str {
        &self.metadata.chunk_id
    }

    pub fn source(&self) -> Option<SourceType> {
        self.metadata.source
    }
}
