//! Scoring and chunking a batch of raw documents.
//!
//! Each document goes through the quality scorer, is dropped when it
//! falls under its source's cutoff, and is otherwise chunked with that
//! source's profile. Problems with one document never stop the batch:
//! the document is skipped, logged, and recorded in the [`IngestReport`].

use std::collections::{BTreeMap, HashSet};

use oeuvre_core::chunk::chunk_document;
use oeuvre_core::models::{Chunk, RawDocument, SourceType};
use oeuvre_core::quality::score_text;

use crate::config::Config;

/// A document that could not be ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestError {
    pub filename: String,
    pub source: SourceType,
    pub message: String,
}

/// Counters for one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Documents examined.
    pub processed: usize,
    /// Documents that passed the quality cutoff and produced chunks.
    pub retained: usize,
    pub skipped_low_quality: usize,
    /// Chunks produced across all retained documents.
    pub chunks: usize,
    pub errors: Vec<IngestError>,
}

#[derive(Debug, Default)]
pub struct IngestOutput {
    /// Chunks per source, in document order.
    pub chunks_by_source: BTreeMap<SourceType, Vec<Chunk>>,
    pub report: IngestReport,
}

impl IngestOutput {
    /// Every chunk text, in source then document order.
    pub fn texts(&self) -> Vec<String> {
        self.chunks_by_source
            .values()
            .flatten()
            .map(|c| c.text.clone())
            .collect()
    }
}

/// Score, filter and chunk `documents`.
pub fn ingest_documents(documents: &[RawDocument], config: &Config) -> IngestOutput {
    let mut output = IngestOutput::default();
    let mut seen: HashSet<(SourceType, String)> = HashSet::new();

    for doc in documents {
        output.report.processed += 1;

        if doc.filename.trim().is_empty() {
            reject(&mut output.report, doc, "document has no filename");
            continue;
        }

        let title = doc.title.as_deref();
        let quality = score_text(&doc.text, title, config.quality.min_words);
        let cutoff = config.quality.min_score_for(doc.source_type);
        if quality.score < cutoff {
            tracing::debug!(
                filename = %doc.filename,
                source = %doc.source_type,
                score = quality.score,
                cutoff,
                "skipping low-quality document"
            );
            output.report.skipped_low_quality += 1;
            continue;
        }

        let params = config.chunking.params_for(doc.source_type);
        let chunks = chunk_document(doc, quality.score, &params);
        if chunks.is_empty() {
            reject(&mut output.report, doc, "document produced no chunks");
            continue;
        }
        if let Some(dup) = chunks
            .iter()
            .find(|c| seen.contains(&(doc.source_type, c.id().to_string())))
        {
            let message = format!("duplicate chunk id {}", dup.id());
            reject(&mut output.report, doc, &message);
            continue;
        }

        for chunk in &chunks {
            seen.insert((doc.source_type, chunk.id().to_string()));
        }
        output.report.retained += 1;
        output.report.chunks += chunks.len();
        output
            .chunks_by_source
            .entry(doc.source_type)
            .or_default()
            .extend(chunks);
    }

    tracing::info!(
        processed = output.report.processed,
        retained = output.report.retained,
        skipped_low_quality = output.report.skipped_low_quality,
        chunks = output.report.chunks,
        errors = output.report.errors.len(),
        "ingested documents"
    );
    output
}

fn reject(report: &mut IngestReport, doc: &RawDocument, message: &str) {
    tracing::warn!(filename = %doc.filename, source = %doc.source_type, "{}", message);
    report.errors.push(IngestError {
        filename: doc.filename.clone(),
        source: doc.source_type,
        message: message.to_string(),
    });
}
