//! Index statistics and health overview.
//!
//! A quick summary of what is indexed: document counts per source, the
//! embedding model, artifact sizes, backups and the most recent run.
//! Only the sidecar and file sizes are read; vectors are never decoded.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::persist::{self, IndexLayout};
use crate::run_log::{RunLog, RunLogEntry};

/// Per-source breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStats {
    pub source: String,
    pub documents: usize,
    /// Whether a per-source shard is persisted alongside the combined index.
    pub has_shard: bool,
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub index_dir: PathBuf,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub total_documents: usize,
    pub created_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub vectors_bytes: u64,
    pub metadata_bytes: u64,
    pub sources: Vec<SourceStats>,
    pub backups: usize,
    pub last_run: Option<RunLogEntry>,
}

/// Gather statistics for the combined index under `layout`.
pub fn index_stats(layout: &IndexLayout) -> Result<IndexStats> {
    let metadata = persist::read_combined_metadata(layout)
        .with_context(|| format!("No readable index under {}", layout.root().display()))?;

    let file_size = |path: PathBuf| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let sources = metadata
        .source_counts
        .iter()
        .map(|(source, documents)| SourceStats {
            source: source.clone(),
            documents: *documents,
            has_shard: source
                .parse()
                .map(|s| layout.has_shard(s))
                .unwrap_or(false),
        })
        .collect();

    Ok(IndexStats {
        index_dir: layout.root().to_path_buf(),
        embedding_model: metadata.embedding_model,
        embedding_dim: metadata.embedding_dim,
        total_documents: metadata.total_documents,
        created_date: metadata.created_date,
        last_updated: metadata.last_updated,
        vectors_bytes: file_size(layout.combined_vectors()),
        metadata_bytes: file_size(layout.combined_metadata()),
        sources,
        backups: persist::list_backups(layout)?.len(),
        last_run: RunLog::open(layout.run_log())?.last()?,
    })
}

impl IndexStats {
    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "oeuvre index stats");
        let _ = writeln!(out, "==================");
        let _ = writeln!(out);
        let _ = writeln!(out, "  Index:       {}", self.index_dir.display());
        let _ = writeln!(
            out,
            "  Size:        {} vectors, {} metadata",
            format_bytes(self.vectors_bytes),
            format_bytes(self.metadata_bytes)
        );
        let _ = writeln!(out, "  Model:       {} ({} dims)", self.embedding_model, self.embedding_dim);
        let _ = writeln!(out, "  Documents:   {}", self.total_documents);
        let _ = writeln!(out, "  Created:     {}", self.created_date.format("%Y-%m-%d %H:%M"));
        let _ = writeln!(out, "  Updated:     {}", format_relative(self.last_updated));
        let _ = writeln!(out, "  Backups:     {}", self.backups);

        if !self.sources.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "  By source:");
            let _ = writeln!(out, "  {:<12} {:>10}   {}", "SOURCE", "CHUNKS", "SHARD");
            let _ = writeln!(out, "  {}", "-".repeat(32));
            for s in &self.sources {
                let _ = writeln!(
                    out,
                    "  {:<12} {:>10}   {}",
                    s.source,
                    s.documents,
                    if s.has_shard { "yes" } else { "no" }
                );
            }
        }

        if let Some(run) = &self.last_run {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "  Last run:    {:?} {:?}, {} chunks, {} errors, {}",
                run.kind,
                run.status,
                run.chunks_indexed,
                run.error_count,
                format_relative(run.finished_at)
            );
        }
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();
    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
