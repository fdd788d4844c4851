//! Corpus build orchestration.
//!
//! Coordinates the full flow: ingest (score, filter, chunk) → embedder
//! selection → per-source shards → merge → persisted combined index.
//! Every run, successful or not, is appended to the run log.
//!
//! [`build_corpus`] replaces the combined index with one built from the
//! given documents. [`add_source`] replaces only the sources present in
//! the given documents, reusing the backend the existing index was
//! built with so old and new vectors stay comparable.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use oeuvre_core::embedding::Embedder;
use oeuvre_core::index::IndexShard;
use oeuvre_core::models::{Chunk, RawDocument, SourceType};

use crate::builder::build_shard;
use crate::config::Config;
use crate::embedding::{self, Backend};
use crate::ingest::{ingest_documents, IngestOutput, IngestReport};
use crate::merge::{add_shards_incremental, rebuild_combined};
use crate::persist::{self, IndexLayout};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};
use crate::run_log::{RunKind, RunLog, RunLogEntry, RunStatus};

/// Outcome of a build or incremental addition.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub kind: RunKind,
    pub ingest: IngestReport,
    pub embedding_model: String,
    pub embedding_dim: usize,
    /// Chunks indexed per source in this run.
    pub shards: Vec<(SourceType, usize)>,
    /// Documents in the combined index after the run.
    pub total_documents: usize,
    pub index_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    pub fn chunks_indexed(&self) -> usize {
        self.shards.iter().map(|(_, n)| n).sum()
    }

    pub fn status(&self) -> RunStatus {
        if self.ingest.errors.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Partial
        }
    }
}

/// Rebuild the combined index from `documents`.
pub fn build_corpus(
    config: &Config,
    documents: &[RawDocument],
    progress: &dyn BuildProgressReporter,
) -> Result<BuildReport> {
    run_logged(config, RunKind::FullRebuild, documents, |layout, started| {
        let output = ingest(config, documents, progress)?;
        let backend = embedding::create_embedder(&config.embedding, &output.texts())
            .context("Failed to initialize embedding backend")?;
        if let Some(model) = backend.as_tfidf() {
            persist::save_tfidf(layout, model)?;
        }

        let IngestOutput {
            chunks_by_source,
            report: ingest_report,
        } = output;
        let shards = build_shards(config, layout, chunks_by_source, &backend, progress)?;
        let counts = shard_counts(&shards);
        progress.report(BuildProgressEvent::Merging {
            shards: shards.len(),
        });
        let combined = rebuild_combined(layout, shards, config.index.keep_backups)
            .context("Failed to merge shards")?;
        prune_models(layout);

        Ok(BuildReport {
            kind: RunKind::FullRebuild,
            ingest: ingest_report,
            embedding_model: backend.model_name().to_string(),
            embedding_dim: backend.dims(),
            shards: counts,
            total_documents: combined.len(),
            index_dir: layout.root().to_path_buf(),
            started_at: started,
            finished_at: Utc::now(),
        })
    })
}

/// Replace the sources present in `documents` within the existing
/// combined index, or build it if none exists yet.
pub fn add_source(
    config: &Config,
    documents: &[RawDocument],
    progress: &dyn BuildProgressReporter,
) -> Result<BuildReport> {
    run_logged(config, RunKind::Incremental, documents, |layout, started| {
        let output = ingest(config, documents, progress)?;
        let backend = if layout.has_combined() {
            let metadata = persist::read_combined_metadata(layout)?;
            embedding::open_embedder(&config.embedding, layout, &metadata)
                .context("Failed to reopen the backend the index was built with")?
        } else {
            let backend = embedding::create_embedder(&config.embedding, &output.texts())
                .context("Failed to initialize embedding backend")?;
            if let Some(model) = backend.as_tfidf() {
                persist::save_tfidf(layout, model)?;
            }
            backend
        };

        let IngestOutput {
            chunks_by_source,
            report: ingest_report,
        } = output;
        let shards = build_shards(config, layout, chunks_by_source, &backend, progress)?;
        let counts = shard_counts(&shards);
        progress.report(BuildProgressEvent::Merging {
            shards: shards.len(),
        });
        let combined = add_shards_incremental(layout, shards, config.index.keep_backups)
            .context("Failed to merge shards into combined index")?;
        let total_documents = combined.len();
        prune_models(layout);

        Ok(BuildReport {
            kind: RunKind::Incremental,
            ingest: ingest_report,
            embedding_model: backend.model_name().to_string(),
            embedding_dim: backend.dims(),
            shards: counts,
            total_documents,
            index_dir: layout.root().to_path_buf(),
            started_at: started,
            finished_at: Utc::now(),
        })
    })
}

fn ingest(
    config: &Config,
    documents: &[RawDocument],
    progress: &dyn BuildProgressReporter,
) -> Result<IngestOutput> {
    let totals: Vec<(SourceType, u64)> = SourceType::ALL
        .into_iter()
        .map(|s| (s, documents.iter().filter(|d| d.source_type == s).count() as u64))
        .filter(|(_, total)| *total > 0)
        .collect();
    for &(source, total) in &totals {
        progress.report(BuildProgressEvent::Ingesting { source, n: 0, total });
    }
    let output = ingest_documents(documents, config);
    for &(source, total) in &totals {
        progress.report(BuildProgressEvent::Ingesting {
            source,
            n: total,
            total,
        });
    }
    if output.report.chunks == 0 {
        bail!(
            "No chunks to index: {} documents processed, {} below quality cutoff, {} rejected",
            output.report.processed,
            output.report.skipped_low_quality,
            output.report.errors.len()
        );
    }
    Ok(output)
}

fn build_shards(
    config: &Config,
    layout: &IndexLayout,
    chunks_by_source: BTreeMap<SourceType, Vec<Chunk>>,
    backend: &Backend,
    progress: &dyn BuildProgressReporter,
) -> Result<Vec<IndexShard>> {
    let mut shards = Vec::with_capacity(chunks_by_source.len());
    for (source, chunks) in chunks_by_source {
        let shard = build_shard(source, chunks, backend, config.embedding.batch_size, progress)
            .with_context(|| format!("Failed to build {} shard", source))?;
        persist::write_shard(layout, &shard)
            .with_context(|| format!("Failed to write {} shard", source))?;
        shards.push(shard);
    }
    Ok(shards)
}

/// Drop TF-IDF models no index or backup refers to anymore.
fn prune_models(layout: &IndexLayout) {
    if let Err(err) = persist::prune_tfidf_models(layout) {
        tracing::warn!(error = %err, "failed to prune stored TF-IDF models");
    }
}

fn shard_counts(shards: &[IndexShard]) -> Vec<(SourceType, usize)> {
    shards.iter().map(|s| (s.source, s.len())).collect()
}

/// Run `body` and append its outcome to the run log.
fn run_logged<F>(
    config: &Config,
    kind: RunKind,
    documents: &[RawDocument],
    body: F,
) -> Result<BuildReport>
where
    F: FnOnce(&IndexLayout, DateTime<Utc>) -> Result<BuildReport>,
{
    let layout = IndexLayout::new(&config.index.dir);
    let log = RunLog::open(layout.run_log())?;
    let started = Utc::now();
    tracing::info!(kind = ?kind, documents = documents.len(), index = %layout.root().display(), "build started");

    match body(&layout, started) {
        Ok(report) => {
            log.append(&RunLogEntry {
                kind,
                started_at: report.started_at,
                finished_at: report.finished_at,
                sources: report.shards.iter().map(|(s, _)| *s).collect(),
                documents_processed: report.ingest.processed,
                chunks_indexed: report.chunks_indexed(),
                error_count: report.ingest.errors.len(),
                status: report.status(),
                message: None,
            })?;
            tracing::info!(
                kind = ?kind,
                chunks = report.chunks_indexed(),
                total = report.total_documents,
                model = %report.embedding_model,
                "build finished"
            );
            Ok(report)
        }
        Err(err) => {
            let mut sources: Vec<SourceType> = documents.iter().map(|d| d.source_type).collect();
            sources.sort();
            sources.dedup();
            let entry = RunLogEntry {
                kind,
                started_at: started,
                finished_at: Utc::now(),
                sources,
                documents_processed: documents.len(),
                chunks_indexed: 0,
                error_count: 1,
                status: RunStatus::Failed,
                message: Some(format!("{:#}", err)),
            };
            if let Err(log_err) = log.append(&entry) {
                tracing::warn!(error = %log_err, "failed to record failed run");
            }
            tracing::error!(kind = ?kind, error = %format!("{:#}", err), "build failed");
            Err(err)
        }
    }
}
