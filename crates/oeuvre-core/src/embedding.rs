//! Embedding trait and vector utilities.
//!
//! [`Embedder`] is the capability every backend implements: turn a
//! batch of texts into fixed-dimension vectors. The statistical backend
//! lives in [`crate::tfidf`]; the neural backend lives in the `oeuvre`
//! app crate behind a cargo feature.
//!
//! Vectors are compared with squared Euclidean distance, the metric of
//! an exact flat L2 index.

use crate::error::{Error, Result};

/// A text-to-vector backend.
///
/// Implementations must be deterministic for a fixed model: the same
/// text always maps to the same vector. The model name and dimension
/// are recorded in index metadata and checked at merge and query time.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in index metadata.
    fn model_name(&self) -> &str;

    /// Output dimensionality.
    fn dims(&self) -> usize;

    /// Encode a batch of texts, one vector per input, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single query text.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query.to_string()])?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingBackend("backend returned no vector".into()))?;
        check_dims(self.dims(), &vector)?;
        Ok(vector)
    }
}

/// Verify that a backend returned one vector of the right size per input.
pub fn validate_batch(embedder: &dyn Embedder, inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != inputs {
        return Err(Error::EmbeddingBackend(format!(
            "{} returned {} vectors for {} inputs",
            embedder.model_name(),
            vectors.len(),
            inputs
        )));
    }
    for vector in vectors {
        check_dims(embedder.dims(), vector)?;
    }
    Ok(())
}

fn check_dims(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::EmbeddingBackend(format!(
            "expected {}-dimensional vector, got {}",
            expected,
            vector.len()
        )));
    }
    Ok(())
}

/// Squared Euclidean distance. Callers guarantee equal lengths.
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode floats as little-endian bytes, 4 per value.
///
/// ```rust
/// use oeuvre_core::embedding::{f32s_to_bytes, bytes_to_f32s};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let bytes = f32s_to_bytes(&v);
/// assert_eq!(bytes.len(), 12);
/// assert_eq!(bytes_to_f32s(&bytes), v);
/// ```
pub fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`f32s_to_bytes`]. Trailing bytes that do not form a
/// whole value are ignored.
pub fn bytes_to_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
