//! Exact flat L2 vector index and per-source shards.
//!
//! [`FlatIndex`] stores vectors row-major in one contiguous buffer and
//! answers k-nearest-neighbor queries by brute force. Position `i` in
//! the index is the `i`-th vector added; shards and combined indices
//! rely on that to line vectors up with their chunk metadata.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::embedding::l2_distance_squared;
use crate::error::{Error, Result};
use crate::models::{Chunk, SourceType};

/// A search hit: index position plus squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

impl Neighbor {
    /// Ascending distance, then ascending position.
    fn rank(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.position.cmp(&other.position))
    }
}

/// Heap entry ordered so the worst candidate sits on top.
struct Candidate(Neighbor);

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank(&other.0)
    }
}

/// Brute-force exact index over squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    /// Rebuild an index from a row-major buffer.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when `dims` is zero or the buffer length is
    /// not a multiple of `dims`.
    pub fn from_raw(dims: usize, data: Vec<f32>) -> Result<Self> {
        if dims == 0 {
            return Err(Error::Validation("index dimension must be > 0".into()));
        }
        if data.len() % dims != 0 {
            return Err(Error::Validation(format!(
                "vector buffer of {} floats is not a multiple of dimension {}",
                data.len(),
                dims
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major vector data, `len() * dims()` floats.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Append vectors in order.
    ///
    /// Nothing is added unless every vector has the index dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(Error::Validation(format!(
                "cannot add {}-dimensional vector to {}-dimensional index",
                bad.len(),
                self.dims
            )));
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Append every vector of `other`, preserving order.
    pub fn extend_from(&mut self, other: &FlatIndex) -> Result<()> {
        if other.dims != self.dims {
            return Err(Error::Validation(format!(
                "cannot append {}-dimensional index to {}-dimensional index",
                other.dims, self.dims
            )));
        }
        self.data.extend_from_slice(&other.data);
        Ok(())
    }

    /// The `k` nearest vectors to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_filtered(query, k, |_| true)
    }

    /// The `k` nearest vectors among positions accepted by `keep`.
    ///
    /// Results are sorted by ascending distance; equal distances keep
    /// ascending position order.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, keep: F) -> Result<Vec<Neighbor>>
    where
        F: Fn(usize) -> bool,
    {
        if query.len() != self.dims {
            return Err(Error::Validation(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.dims
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for position in 0..self.len() {
            if !keep(position) {
                continue;
            }
            let start = position * self.dims;
            let distance = l2_distance_squared(query, &self.data[start..start + self.dims]);
            let candidate = Candidate(Neighbor { position, distance });
            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate < *worst {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        let mut hits: Vec<Neighbor> = heap.into_iter().map(|c| c.0).collect();
        hits.sort_by(|a, b| a.rank(b));
        Ok(hits)
    }
}

/// One source's vectors plus the chunk list they were built from.
///
/// Invariant: `index.len() == chunks.len()`, position for position.
#[derive(Debug, Clone)]
pub struct IndexShard {
    pub source: SourceType,
    pub embedding_model: String,
    pub created_date: DateTime<Utc>,
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

impl IndexShard {
    /// Pair an index with its chunk list.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the vector count and chunk count differ.
    pub fn new(
        source: SourceType,
        embedding_model: impl Into<String>,
        created_date: DateTime<Utc>,
        index: FlatIndex,
        chunks: Vec<Chunk>,
    ) -> Result<Self> {
        if index.len() != chunks.len() {
            return Err(Error::Validation(format!(
                "{} shard has {} vectors but {} documents",
                source,
                index.len(),
                chunks.len()
            )));
        }
        Ok(Self {
            source,
            embedding_model: embedding_model.into(),
            created_date,
            index,
            chunks,
        })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn into_parts(self) -> (FlatIndex, Vec<Chunk>) {
        (self.index, self.chunks)
    }
}
