//! Per-source index building.
//!
//! Embeds one source's chunks in batches and packs the vectors into a
//! [`FlatIndex`] whose position *i* is chunk *i*. Batching only bounds
//! peak memory; the result does not depend on the batch size.

use chrono::Utc;

use oeuvre_core::embedding::{validate_batch, Embedder};
use oeuvre_core::index::{FlatIndex, IndexShard};
use oeuvre_core::models::{Chunk, SourceType};
use oeuvre_core::Result;

use crate::progress::{BuildProgressEvent, BuildProgressReporter};

/// Embed `chunks` and build the shard for `source`.
///
/// # Errors
///
/// [`oeuvre_core::Error::EmbeddingBackend`] if the backend fails or a
/// batch comes back with the wrong count or dimension. No partial shard
/// is returned.
pub fn build_shard(
    source: SourceType,
    chunks: Vec<Chunk>,
    embedder: &dyn Embedder,
    batch_size: usize,
    progress: &dyn BuildProgressReporter,
) -> Result<IndexShard> {
    let batch_size = batch_size.max(1);
    let total = chunks.len() as u64;
    let mut index = FlatIndex::new(embedder.dims());

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts)?;
        validate_batch(embedder, texts.len(), &vectors)?;
        index.add(&vectors)?;

        tracing::debug!(source = %source, batch = batch_no, size = batch.len(), "embedded batch");
        progress.report(BuildProgressEvent::Embedding {
            source,
            n: index.len() as u64,
            total,
        });
    }

    let shard = IndexShard::new(source, embedder.model_name(), Utc::now(), index, chunks)?;
    tracing::info!(
        source = %source,
        vectors = shard.len(),
        dims = shard.dims(),
        model = %shard.embedding_model,
        "built shard"
    );
    Ok(shard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oeuvre_core::models::ChunkMetadata;
    use oeuvre_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingEmbedder {
        calls: AtomicUsize,
        drop_one: bool,
    }

    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out: Vec<Vec<f32>> = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if self.drop_one {
                out.pop();
            }
            Ok(out)
        }
    }

    struct Recorder(Mutex<Vec<BuildProgressEvent>>);

    impl BuildProgressReporter for Recorder {
        fn report(&self, event: BuildProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                text: "x".repeat(i + 1),
                title: None,
                metadata: ChunkMetadata {
                    source: Some(SourceType::Forum),
                    category: "forum".into(),
                    date: None,
                    url: None,
                    quality_score: 0.5,
                    chunk_index: i,
                    chunk_id: format!("id-{}", i),
                    author: None,
                    section: None,
                },
            })
            .collect()
    }

    #[test]
    fn test_embeds_in_batches_preserving_order() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            drop_one: false,
        };
        let recorder = Recorder(Mutex::new(Vec::new()));
        let shard = build_shard(SourceType::Forum, chunks(5), &embedder, 2, &recorder).unwrap();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(shard.len(), 5);
        assert_eq!(shard.embedding_model, "counting");
        for (i, chunk) in shard.chunks().iter().enumerate() {
            assert_eq!(shard.index().vector(i).unwrap()[0], chunk.text.len() as f32);
        }

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            BuildProgressEvent::Embedding {
                source: SourceType::Forum,
                n: 5,
                total: 5
            }
        );
    }

    #[test]
    fn test_short_batch_is_rejected() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            drop_one: true,
        };
        let err = build_shard(
            SourceType::Forum,
            chunks(3),
            &embedder,
            10,
            &crate::progress::NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmbeddingBackend(_)));
    }

    #[test]
    fn test_empty_source_builds_empty_shard() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            drop_one: false,
        };
        let shard = build_shard(
            SourceType::Book,
            Vec::new(),
            &embedder,
            100,
            &crate::progress::NoProgress,
        )
        .unwrap();
        assert!(shard.is_empty());
        assert_eq!(shard.dims(), 2);
    }
}
