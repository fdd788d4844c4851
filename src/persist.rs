//! On-disk index artifacts.
//!
//! Every index (a per-source shard or the combined index) is stored as
//! two paired files:
//!
//! | File | Contents |
//! |------|----------|
//! | `*.vectors` | 20-byte header then `count × dim` little-endian `f32` |
//! | `*.json` | Sidecar: documents, counts, model, dimension, timestamps |
//!
//! The vector header is the magic `OEVF`, a `u32` format version, a
//! `u32` dimension and a `u64` vector count, all little-endian. The
//! sidecar records the SHA-256 of the vector file, so a vectors file
//! paired with the wrong sidecar is rejected at load.
//!
//! Pairs are written atomically: both files go to temporary files in
//! the target directory, are flushed to disk, and only then renamed
//! over the previous pair.
//!
//! # Directory layout
//!
//! ```text
//! <index dir>/
//! ├── combined.vectors
//! ├── combined.json
//! ├── shards/{book,news,forum}.{vectors,json}
//! ├── backups/<timestamp>/combined.{vectors,json}
//! ├── models/<model id>.json
//! └── runs.jsonl
//! ```
//!
//! Fitted TF-IDF models are keyed by their model id, which the combined
//! sidecar records. A backup therefore stays searchable after a refit:
//! its model file is kept for as long as the live index or any backup
//! refers to it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use oeuvre_core::embedding::{bytes_to_f32s, f32s_to_bytes, Embedder};
use oeuvre_core::index::{FlatIndex, IndexShard};
use oeuvre_core::merge::{CombinedIndex, IndexMetadata};
use oeuvre_core::models::{Chunk, SourceType};
use oeuvre_core::tfidf::TfIdfEmbedder;
use oeuvre_core::{Error, Result};

const MAGIC: &[u8; 4] = b"OEVF";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

const COMBINED_STEM: &str = "combined";

/// Paths of every artifact under one index directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn combined_vectors(&self) -> PathBuf {
        self.root.join(format!("{}.vectors", COMBINED_STEM))
    }

    pub fn combined_metadata(&self) -> PathBuf {
        self.root.join(format!("{}.json", COMBINED_STEM))
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.root.join("shards")
    }

    pub fn shard_vectors(&self, source: SourceType) -> PathBuf {
        self.shards_dir().join(format!("{}.vectors", source))
    }

    pub fn shard_metadata(&self, source: SourceType) -> PathBuf {
        self.shards_dir().join(format!("{}.json", source))
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Path of the TF-IDF model with the given id.
    pub fn tfidf_model(&self, model_id: &str) -> PathBuf {
        self.models_dir().join(format!("{}.json", model_id))
    }

    pub fn run_log(&self) -> PathBuf {
        self.root.join("runs.jsonl")
    }

    pub fn has_combined(&self) -> bool {
        self.combined_vectors().is_file() && self.combined_metadata().is_file()
    }

    pub fn has_shard(&self, source: SourceType) -> bool {
        self.shard_vectors(source).is_file() && self.shard_metadata(source).is_file()
    }
}

/// Sidecar of the combined index.
#[derive(Debug, Serialize, Deserialize)]
struct CombinedSidecar {
    documents: Vec<Chunk>,
    #[serde(flatten)]
    metadata: IndexMetadata,
    vectors_sha256: String,
}

#[derive(Serialize)]
struct CombinedSidecarRef<'a> {
    documents: &'a [Chunk],
    #[serde(flatten)]
    metadata: &'a IndexMetadata,
    vectors_sha256: &'a str,
}

/// Sidecar of a per-source shard.
#[derive(Debug, Serialize, Deserialize)]
struct ShardSidecar {
    source: SourceType,
    documents: Vec<Chunk>,
    total_documents: usize,
    embedding_model: String,
    embedding_dim: usize,
    created_date: DateTime<Utc>,
    vectors_sha256: String,
}

#[derive(Serialize)]
struct ShardSidecarRef<'a> {
    source: SourceType,
    documents: &'a [Chunk],
    total_documents: usize,
    embedding_model: &'a str,
    embedding_dim: usize,
    created_date: DateTime<Utc>,
    vectors_sha256: &'a str,
}

/// Serialize a flat index into the vector file format.
pub fn encode_vectors(index: &FlatIndex) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + index.as_slice().len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(index.dims() as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&f32s_to_bytes(index.as_slice()));
    bytes
}

/// Parse the vector file format.
///
/// # Errors
///
/// [`Error::Validation`] on a bad magic, unknown version, or a body whose
/// length disagrees with the header.
pub fn decode_vectors(bytes: &[u8]) -> Result<FlatIndex> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
        return Err(Error::Validation("not an oeuvre vector file".into()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(Error::Validation(format!(
            "unsupported vector file version {}",
            version
        )));
    }
    let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::Validation("vector file header overflows".into()))?;
    if body.len() != expected {
        return Err(Error::Validation(format!(
            "vector file holds {} bytes, header promises {} vectors of dimension {}",
            body.len(),
            count,
            dims
        )));
    }
    FlatIndex::from_raw(dims, bytes_to_f32s(body))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Replace two files, staging both payloads before either rename.
///
/// Each payload is written to a temporary file in the destination
/// directory and synced; the renames happen only after both writes
/// succeeded.
fn write_pair_atomic(
    first_path: &Path,
    first: &[u8],
    second_path: &Path,
    second: &[u8],
) -> Result<()> {
    let first_tmp = stage(first_path, first)?;
    let second_tmp = stage(second_path, second)?;
    first_tmp.persist(first_path).map_err(|e| e.error)?;
    second_tmp.persist(second_path).map_err(|e| e.error)?;
    Ok(())
}

/// Write a single file atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    stage(path, bytes)?.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Persist a per-source shard.
pub fn write_shard(layout: &IndexLayout, shard: &IndexShard) -> Result<()> {
    let vectors = encode_vectors(shard.index());
    let checksum = sha256_hex(&vectors);
    let sidecar = ShardSidecarRef {
        source: shard.source,
        documents: shard.chunks(),
        total_documents: shard.len(),
        embedding_model: &shard.embedding_model,
        embedding_dim: shard.dims(),
        created_date: shard.created_date,
        vectors_sha256: &checksum,
    };
    let json = serde_json::to_vec(&sidecar)?;
    write_pair_atomic(
        &layout.shard_vectors(shard.source),
        &vectors,
        &layout.shard_metadata(shard.source),
        &json,
    )?;
    tracing::debug!(
        source = %shard.source,
        vectors = shard.len(),
        dims = shard.dims(),
        "wrote shard"
    );
    Ok(())
}

/// Load a per-source shard, checking the vector/document alignment.
pub fn read_shard(layout: &IndexLayout, source: SourceType) -> Result<IndexShard> {
    let vectors = fs::read(layout.shard_vectors(source))?;
    let sidecar: ShardSidecar = serde_json::from_slice(&fs::read(layout.shard_metadata(source))?)?;

    if sidecar.vectors_sha256 != sha256_hex(&vectors) {
        return Err(Error::Validation(format!(
            "{} shard vectors do not match their sidecar",
            source
        )));
    }
    if sidecar.source != source {
        return Err(Error::Validation(format!(
            "shard file for {} contains {} documents",
            source, sidecar.source
        )));
    }
    let index = decode_vectors(&vectors)?;
    if index.dims() != sidecar.embedding_dim {
        return Err(Error::Validation(format!(
            "{} shard records dimension {}, vectors have {}",
            source,
            sidecar.embedding_dim,
            index.dims()
        )));
    }
    if sidecar.total_documents != sidecar.documents.len() {
        return Err(Error::Validation(format!(
            "{} shard records {} documents, found {}",
            source,
            sidecar.total_documents,
            sidecar.documents.len()
        )));
    }
    IndexShard::new(
        source,
        sidecar.embedding_model,
        sidecar.created_date,
        index,
        sidecar.documents,
    )
}

/// Every source with a persisted shard, in canonical order.
pub fn list_shards(layout: &IndexLayout) -> Vec<SourceType> {
    SourceType::ALL
        .into_iter()
        .filter(|s| layout.has_shard(*s))
        .collect()
}

fn encode_combined(combined: &CombinedIndex) -> Result<(Vec<u8>, Vec<u8>)> {
    let vectors = encode_vectors(combined.index());
    let checksum = sha256_hex(&vectors);
    let sidecar = CombinedSidecarRef {
        documents: combined.documents(),
        metadata: combined.metadata(),
        vectors_sha256: &checksum,
    };
    Ok((vectors, serde_json::to_vec(&sidecar)?))
}

/// Atomically replace the combined index pair.
///
/// The index is validated first; an inconsistent index is never written.
pub fn write_combined(layout: &IndexLayout, combined: &CombinedIndex) -> Result<()> {
    combined.validate()?;
    let (vectors, json) = encode_combined(combined)?;
    write_pair_atomic(
        &layout.combined_vectors(),
        &vectors,
        &layout.combined_metadata(),
        &json,
    )?;
    tracing::info!(
        documents = combined.len(),
        dims = combined.dims(),
        model = combined.embedding_model(),
        path = %layout.root().display(),
        "wrote combined index"
    );
    Ok(())
}

/// Load and validate the combined index.
///
/// # Errors
///
/// - [`Error::NotReady`] when either artifact is missing.
/// - [`Error::Validation`] when the pair is inconsistent.
pub fn read_combined(layout: &IndexLayout) -> Result<CombinedIndex> {
    if !layout.has_combined() {
        return Err(Error::NotReady(format!(
            "no combined index under {}",
            layout.root().display()
        )));
    }
    read_combined_pair(&layout.combined_vectors(), &layout.combined_metadata())
}

fn read_combined_pair(vectors_path: &Path, metadata_path: &Path) -> Result<CombinedIndex> {
    let vectors = fs::read(vectors_path)?;
    let sidecar = read_combined_sidecar(metadata_path)?;
    if sidecar.vectors_sha256 != sha256_hex(&vectors) {
        return Err(Error::Validation(format!(
            "{} does not match {}",
            vectors_path.display(),
            metadata_path.display()
        )));
    }
    let index = decode_vectors(&vectors)?;
    CombinedIndex::from_parts(sidecar.metadata, index, sidecar.documents)
}

fn read_combined_sidecar(path: &Path) -> Result<CombinedSidecar> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

/// Metadata of the combined index without decoding any vectors.
pub fn read_combined_metadata(layout: &IndexLayout) -> Result<IndexMetadata> {
    if !layout.has_combined() {
        return Err(Error::NotReady(format!(
            "no combined index under {}",
            layout.root().display()
        )));
    }
    Ok(read_combined_sidecar(&layout.combined_metadata())?.metadata)
}

/// Copy the current combined pair into a fresh timestamped backup
/// directory, then prune old backups beyond `keep`.
///
/// Returns `None` when there is nothing to back up.
pub fn backup_combined(layout: &IndexLayout, keep: usize) -> Result<Option<PathBuf>> {
    if !layout.has_combined() {
        return Ok(None);
    }
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let mut dir = layout.backups_dir().join(&stamp);
    let mut attempt = 1;
    while dir.exists() {
        dir = layout.backups_dir().join(format!("{}-{}", stamp, attempt));
        attempt += 1;
    }
    fs::create_dir_all(&dir)?;
    fs::copy(layout.combined_vectors(), dir.join("combined.vectors"))?;
    fs::copy(layout.combined_metadata(), dir.join("combined.json"))?;
    tracing::info!(backup = %dir.display(), "backed up combined index");
    prune_backups(layout, keep)?;
    Ok(Some(dir))
}

/// Backup directories, oldest first.
pub fn list_backups(layout: &IndexLayout) -> Result<Vec<PathBuf>> {
    let dir = layout.backups_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut backups: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    backups.sort();
    Ok(backups)
}

/// Delete the oldest backups so at most `keep` remain (at least one is kept).
pub fn prune_backups(layout: &IndexLayout, keep: usize) -> Result<usize> {
    let backups = list_backups(layout)?;
    let keep = keep.max(1);
    let excess = backups.len().saturating_sub(keep);
    for old in &backups[..excess] {
        fs::remove_dir_all(old)?;
        tracing::debug!(backup = %old.display(), "pruned backup");
    }
    Ok(excess)
}

/// Roll the combined index back to a backup.
///
/// The backup is fully validated before it replaces the live pair.
pub fn restore_backup(layout: &IndexLayout, backup_dir: &Path) -> Result<()> {
    let vectors_path = backup_dir.join("combined.vectors");
    let metadata_path = backup_dir.join("combined.json");
    read_combined_pair(&vectors_path, &metadata_path)?;
    let vectors = fs::read(&vectors_path)?;
    let json = fs::read(&metadata_path)?;
    write_pair_atomic(
        &layout.combined_vectors(),
        &vectors,
        &layout.combined_metadata(),
        &json,
    )?;
    tracing::info!(backup = %backup_dir.display(), "restored combined index");
    Ok(())
}

fn check_model_id(model_id: &str) -> Result<()> {
    let valid = !model_id.is_empty()
        && model_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !model_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid model id '{}'", model_id)))
    }
}

/// Persist a fitted TF-IDF model under its model id.
///
/// Saving never touches the model of the live index, so a build that
/// fails after this point leaves the live index searchable.
pub fn save_tfidf(layout: &IndexLayout, model: &TfIdfEmbedder) -> Result<()> {
    check_model_id(model.model_name())?;
    write_atomic(
        &layout.tfidf_model(model.model_name()),
        &serde_json::to_vec(model)?,
    )
}

/// Load the TF-IDF model with the given id, if it is stored.
pub fn load_tfidf(layout: &IndexLayout, model_id: &str) -> Result<Option<TfIdfEmbedder>> {
    check_model_id(model_id)?;
    let path = layout.tfidf_model(model_id);
    if !path.is_file() {
        return Ok(None);
    }
    let model: TfIdfEmbedder = serde_json::from_slice(&fs::read(&path)?)?;
    if model.model_name() != model_id {
        return Err(Error::Validation(format!(
            "{} holds model '{}'",
            path.display(),
            model.model_name()
        )));
    }
    Ok(Some(model))
}

#[derive(Deserialize)]
struct ModelRef {
    embedding_model: String,
}

/// Delete stored TF-IDF models that neither the live combined index nor
/// any backup was built with. Returns how many were removed.
pub fn prune_tfidf_models(layout: &IndexLayout) -> Result<usize> {
    let dir = layout.models_dir();
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut sidecars = vec![layout.combined_metadata()];
    sidecars.extend(
        list_backups(layout)?
            .into_iter()
            .map(|b| b.join("combined.json")),
    );
    let mut referenced = Vec::new();
    for sidecar in sidecars.iter().filter(|p| p.is_file()) {
        let model: ModelRef = serde_json::from_slice(&fs::read(sidecar)?)?;
        referenced.push(format!("{}.json", model.embedding_model));
    }

    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_file() && name.ends_with(".json") && !referenced.contains(&name) {
            fs::remove_file(&path)?;
            tracing::debug!(model = %path.display(), "pruned unreferenced TF-IDF model");
            removed += 1;
        }
    }
    Ok(removed)
}
