//! Loading scraped documents from disk.
//!
//! Scrapers and extractors deliver [`RawDocument`] records as JSON. A
//! source directory is walked recursively and every `.json` file (one
//! record or an array of records) and `.jsonl` file (one record per
//! line) is read. Files are visited in path order so repeated loads of
//! the same tree yield the same document order.
//!
//! A file or line that fails to parse is recorded in
//! [`SourceBatch::errors`] and skipped; the rest of the tree still loads.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use walkdir::WalkDir;

use oeuvre_core::models::RawDocument;

/// A file (or line of a file) that could not be turned into documents.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceError {
    pub path: PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path.display(), line, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct SourceBatch {
    pub documents: Vec<RawDocument>,
    pub errors: Vec<SourceError>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<RawDocument>),
    One(Box<RawDocument>),
}

/// Load every document under `dir`.
///
/// Fails only when `dir` itself cannot be walked; per-file problems end
/// up in the returned batch.
pub fn load_documents(dir: &Path) -> Result<SourceBatch> {
    if !dir.is_dir() {
        anyhow::bail!("Source directory does not exist: {}", dir.display());
    }

    let mut batch = SourceBatch::default();
    let walker = WalkDir::new(dir).sort_by_file_name();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => load_json(path, &mut batch),
            Some("jsonl") => load_jsonl(path, &mut batch),
            _ => continue,
        }
    }

    tracing::info!(
        dir = %dir.display(),
        documents = batch.documents.len(),
        errors = batch.errors.len(),
        "loaded source documents"
    );
    Ok(batch)
}

fn load_json(path: &Path, batch: &mut SourceBatch) {
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<OneOrMany>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(OneOrMany::Many(docs)) => batch.documents.extend(docs),
        Ok(OneOrMany::One(doc)) => batch.documents.push(*doc),
        Err(message) => record(batch, path, None, message),
    }
}

fn load_jsonl(path: &Path, batch: &mut SourceBatch) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return record(batch, path, None, e.to_string()),
    };
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawDocument>(line) {
            Ok(doc) => batch.documents.push(doc),
            Err(e) => record(batch, path, Some(i + 1), e.to_string()),
        }
    }
}

fn record(batch: &mut SourceBatch, path: &Path, line: Option<usize>, message: String) {
    let error = SourceError {
        path: path.to_path_buf(),
        line,
        message,
    };
    tracing::warn!(error = %error, "skipping unreadable source record");
    batch.errors.push(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use oeuvre_core::models::SourceType;
    use tempfile::TempDir;

    #[test]
    fn test_loads_json_and_jsonl_in_path_order() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("news")).unwrap();
        fs::write(
            dir.path().join("a_books.json"),
            r#"[{"source_type":"book","filename":"b1.txt","text":"one"},
                {"source_type":"book","filename":"b2.txt","text":"two","title":"Second"}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("news").join("page.json"),
            r#"{"source_type":"news","filename":"n1.html","text":"three","date":"2019-04-01"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("b_forum.jsonl"),
            "{\"source_type\":\"forum\",\"filename\":\"t1\",\"text\":\"four\"}\n\n\
             {\"source_type\":\"forum\",\"filename\":\"t2\",\"text\":\"five\",\"category\":\"politics\"}\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let batch = load_documents(dir.path()).unwrap();
        assert!(batch.errors.is_empty());
        let names: Vec<&str> = batch.documents.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, vec!["b1.txt", "b2.txt", "t1", "t2", "n1.html"]);
        assert_eq!(batch.documents[4].source_type, SourceType::News);
        assert_eq!(batch.documents[3].category.as_deref(), Some("politics"));
    }

    #[test]
    fn test_bad_records_are_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        fs::write(
            dir.path().join("mixed.jsonl"),
            "{\"source_type\":\"news\",\"filename\":\"ok\",\"text\":\"fine\"}\n\
             {\"source_type\":\"magazine\",\"filename\":\"bad\",\"text\":\"x\"}\n",
        )
        .unwrap();

        let batch = load_documents(dir.path()).unwrap();
        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.errors.len(), 2);
        assert_eq!(batch.errors[1].line, Some(2));
        assert!(batch.errors[1].to_string().contains("mixed.jsonl:2"));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(load_documents(&dir.path().join("absent")).is_err());
    }
}
