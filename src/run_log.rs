//! Append-only history of index builds.
//!
//! Every full rebuild and incremental addition appends one JSON line to
//! `runs.jsonl` in the index directory. Existing lines are never
//! rewritten; a line that fails to parse is skipped when reading.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use oeuvre_core::models::SourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    FullRebuild,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// Completed, but some documents were skipped with errors.
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceType>,
    pub documents_processed: usize,
    pub chunks_indexed: usize,
    pub error_count: usize,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Open (creating the parent directory if needed) the log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &RunLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open run log {}", self.path.display()))?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    /// All readable entries, oldest first.
    pub fn entries(&self) -> Result<Vec<RunLogEntry>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read run log {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(line = i + 1, error = %e, "skipping unreadable run log line"),
            }
        }
        Ok(entries)
    }

    pub fn last(&self) -> Result<Option<RunLogEntry>> {
        Ok(self.entries()?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(kind: RunKind, chunks: usize) -> RunLogEntry {
        let now = Utc::now();
        RunLogEntry {
            kind,
            started_at: now,
            finished_at: now,
            sources: vec![SourceType::News],
            documents_processed: 3,
            chunks_indexed: chunks,
            error_count: 0,
            status: RunStatus::Succeeded,
            message: None,
        }
    }

    #[test]
    fn test_appends_and_reads_back_in_order() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("index").join("runs.jsonl")).unwrap();
        assert!(log.entries().unwrap().is_empty());
        assert!(log.last().unwrap().is_none());

        log.append(&entry(RunKind::FullRebuild, 10)).unwrap();
        log.append(&entry(RunKind::Incremental, 4)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, RunKind::FullRebuild);
        assert_eq!(log.last().unwrap().unwrap().chunks_indexed, 4);

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(raw.contains("\"kind\":\"full_rebuild\""));
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("runs.jsonl")).unwrap();
        log.append(&entry(RunKind::FullRebuild, 1)).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{truncated").unwrap();
        log.append(&entry(RunKind::Incremental, 2)).unwrap();

        assert_eq!(log.entries().unwrap().len(), 2);
    }
}
