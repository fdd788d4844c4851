//! Multi-source index merge.
//!
//! Concatenates per-source [`IndexShard`]s into one [`CombinedIndex`],
//! tagging every chunk with its originating source and recomputing the
//! aggregate metadata. Everything here is in-memory; atomic persistence
//! and backups live in the `oeuvre` app crate.
//!
//! # Algorithm
//!
//! 1. Reject an empty shard list.
//! 2. Validate every shard against the first: same dimension
//!    ([`Error::MergeDimensionMismatch`]) and same embedding model
//!    ([`Error::Validation`]).
//! 3. Concatenate vectors and chunk lists in shard order, tagging
//!    untagged chunks with the shard's source.
//! 4. Reject duplicate chunk ids within a source.
//! 5. Recompute `total_documents`, `sources`, `source_counts` and the
//!    timestamps.
//!
//! Validation happens before any concatenation, so a failed merge
//! leaves nothing half-built.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::{FlatIndex, IndexShard};
use crate::models::{Chunk, SourceType};

/// Key used in `source_counts` for chunks that carry no source tag.
pub const UNTAGGED_SOURCE: &str = "untagged";

/// Index-level metadata stored in the combined sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub total_documents: usize,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub created_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub sources: Vec<SourceType>,
    pub source_counts: BTreeMap<String, usize>,
}

/// The merged, multi-source index served at query time.
///
/// Invariant: `index.len() == documents.len() == metadata.total_documents
/// == sum(metadata.source_counts)`.
#[derive(Debug, Clone)]
pub struct CombinedIndex {
    metadata: IndexMetadata,
    index: FlatIndex,
    documents: Vec<Chunk>,
}

impl CombinedIndex {
    /// Assemble a combined index from persisted parts, checking every
    /// invariant.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the vector count, document count,
    /// recorded totals or dimension disagree.
    pub fn from_parts(metadata: IndexMetadata, index: FlatIndex, documents: Vec<Chunk>) -> Result<Self> {
        let combined = Self {
            metadata,
            index,
            documents,
        };
        combined.validate()?;
        Ok(combined)
    }

    pub fn validate(&self) -> Result<()> {
        let vectors = self.index.len();
        let documents = self.documents.len();
        if vectors != documents {
            return Err(Error::Validation(format!(
                "index has {} vectors but {} documents",
                vectors, documents
            )));
        }
        if self.metadata.total_documents != documents {
            return Err(Error::Validation(format!(
                "metadata records {} documents, found {}",
                self.metadata.total_documents, documents
            )));
        }
        let counted: usize = self.metadata.source_counts.values().sum();
        if counted != documents {
            return Err(Error::Validation(format!(
                "source counts sum to {}, expected {}",
                counted, documents
            )));
        }
        if self.index.dims() != self.metadata.embedding_dim {
            return Err(Error::Validation(format!(
                "metadata records dimension {}, vectors have {}",
                self.metadata.embedding_dim,
                self.index.dims()
            )));
        }
        Ok(())
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn documents(&self) -> &[Chunk] {
        &self.documents
    }

    pub fn document(&self, position: usize) -> Option<&Chunk> {
        self.documents.get(position)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn embedding_model(&self) -> &str {
        &self.metadata.embedding_model
    }

    /// Append one shard after the existing documents.
    ///
    /// # Errors
    ///
    /// - [`Error::MergeDimensionMismatch`] if the shard's dimension
    ///   differs from the recorded one.
    /// - [`Error::Validation`] on model mismatch or if any of the
    ///   shard's chunk ids already exist for that source.
    pub fn append_shard(&self, shard: IndexShard) -> Result<CombinedIndex> {
        check_compatible(
            self.metadata.embedding_dim,
            &self.metadata.embedding_model,
            &shard,
        )?;
        let mut index = self.index.clone();
        let mut documents = self.documents.clone();
        push_shard(&mut index, &mut documents, shard)?;
        check_unique_ids(&documents)?;
        Ok(self.rebuilt(index, documents))
    }

    /// Replace every document of the shard's source with the shard.
    ///
    /// Re-running an incremental addition for the same source is
    /// idempotent: the old chunks are dropped before the new ones are
    /// appended.
    pub fn replace_source(&self, shard: IndexShard) -> Result<CombinedIndex> {
        check_compatible(
            self.metadata.embedding_dim,
            &self.metadata.embedding_model,
            &shard,
        )?;
        let source = shard.source;
        let mut kept = Vec::with_capacity(self.index.as_slice().len());
        let mut documents = Vec::with_capacity(self.documents.len() + shard.len());
        for (position, chunk) in self.documents.iter().enumerate() {
            if chunk.source() == Some(source) {
                continue;
            }
            if let Some(v) = self.index.vector(position) {
                kept.extend_from_slice(v);
            }
            documents.push(chunk.clone());
        }
        let mut index = FlatIndex::from_raw(self.metadata.embedding_dim, kept)?;
        push_shard(&mut index, &mut documents, shard)?;
        check_unique_ids(&documents)?;
        Ok(self.rebuilt(index, documents))
    }

    fn rebuilt(&self, index: FlatIndex, documents: Vec<Chunk>) -> CombinedIndex {
        let (sources, source_counts) = summarize(&documents);
        CombinedIndex {
            metadata: IndexMetadata {
                total_documents: documents.len(),
                embedding_model: self.metadata.embedding_model.clone(),
                embedding_dim: self.metadata.embedding_dim,
                created_date: self.metadata.created_date,
                last_updated: Utc::now(),
                sources,
                source_counts,
            },
            index,
            documents,
        }
    }
}

/// Merge shards, in order, into a fresh combined index.
///
/// # Errors
///
/// - [`Error::Validation`] for an empty list, mismatched embedding
///   models, or duplicate chunk ids within a source.
/// - [`Error::MergeDimensionMismatch`] when any shard's dimension
///   differs from the first shard's.
pub fn merge_shards(shards: Vec<IndexShard>) -> Result<CombinedIndex> {
    let first = shards
        .first()
        .ok_or_else(|| Error::Validation("no shards to merge".into()))?;
    let dims = first.dims();
    let model = first.embedding_model.clone();

    for shard in &shards {
        check_compatible(dims, &model, shard)?;
    }

    let mut index = FlatIndex::new(dims);
    let mut documents = Vec::with_capacity(shards.iter().map(IndexShard::len).sum());
    for shard in shards {
        push_shard(&mut index, &mut documents, shard)?;
    }
    check_unique_ids(&documents)?;

    let now = Utc::now();
    let (sources, source_counts) = summarize(&documents);
    Ok(CombinedIndex {
        metadata: IndexMetadata {
            total_documents: documents.len(),
            embedding_model: model,
            embedding_dim: dims,
            created_date: now,
            last_updated: now,
            sources,
            source_counts,
        },
        index,
        documents,
    })
}

fn check_compatible(dims: usize, model: &str, shard: &IndexShard) -> Result<()> {
    if shard.dims() != dims {
        return Err(Error::MergeDimensionMismatch {
            shard: shard.source,
            expected: dims,
            found: shard.dims(),
        });
    }
    if shard.embedding_model != model {
        return Err(Error::Validation(format!(
            "{} shard was embedded with '{}', index uses '{}'",
            shard.source, shard.embedding_model, model
        )));
    }
    Ok(())
}

fn push_shard(index: &mut FlatIndex, documents: &mut Vec<Chunk>, shard: IndexShard) -> Result<()> {
    let source = shard.source;
    let (shard_index, chunks) = shard.into_parts();
    index.extend_from(&shard_index)?;
    documents.extend(chunks.into_iter().map(|mut chunk| {
        if chunk.metadata.source.is_none() {
            chunk.metadata.source = Some(source);
        }
        chunk
    }));
    Ok(())
}

fn check_unique_ids(documents: &[Chunk]) -> Result<()> {
    let mut seen: HashSet<(Option<SourceType>, &str)> = HashSet::with_capacity(documents.len());
    for chunk in documents {
        if !seen.insert((chunk.source(), chunk.id())) {
            return Err(Error::Validation(format!(
                "duplicate chunk id {} in {} documents",
                chunk.id(),
                source_key(chunk.source())
            )));
        }
    }
    Ok(())
}

fn source_key(source: Option<SourceType>) -> String {
    source
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| UNTAGGED_SOURCE.to_string())
}

/// Sources in order of first appearance, and per-source counts.
fn summarize(documents: &[Chunk]) -> (Vec<SourceType>, BTreeMap<String, usize>) {
    let mut sources = Vec::new();
    let mut counts = BTreeMap::new();
    for chunk in documents {
        if let Some(source) = chunk.source() {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        *counts.entry(source_key(chunk.source())).or_insert(0) += 1;
    }
    (sources, counts)
}
