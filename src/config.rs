//! Configuration parsing and validation.
//!
//! oeuvre is configured by a TOML file. Every section and field is
//! optional; omitted values fall back to the defaults below, which are
//! the single place the per-source quality cutoffs and chunk sizes are
//! defined.
//!
//! # Example
//!
//! ```toml
//! [index]
//! dir = "./data/index"
//! keep_backups = 5
//!
//! [quality]
//! min_words = 50
//!
//! [quality.min_score]
//! book = 0.4
//! news = 0.4
//! forum = 0.25
//!
//! [chunking.book]
//! chunk_size = 1500
//! overlap = 300
//! structural = true
//!
//! [chunking.news]
//! chunk_size = 1000
//! overlap = 200
//!
//! [chunking.forum]
//! chunk_size = 800
//! overlap = 150
//!
//! [embedding]
//! backend = "local"                                 # "local" or "tfidf"
//! model = "paraphrase-multilingual-minilm-l12-v2"
//! batch_size = 100
//! fallback = "tfidf"                                # or "none" to fail hard
//!
//! [embedding.tfidf]
//! max_features = 4096
//! sample_size = 2000
//!
//! [retrieval]
//! default_k = 5
//! max_k = 50
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use oeuvre_core::chunk::ChunkParams;
use oeuvre_core::models::SourceType;
use oeuvre_core::quality::DEFAULT_MIN_WORDS;
use oeuvre_core::tfidf::DEFAULT_MAX_FEATURES;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Timestamped backups retained before older ones are pruned.
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            keep_backups: default_keep_backups(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("data/index")
}
fn default_keep_backups() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default)]
    pub min_score: MinScores,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            min_score: MinScores::default(),
        }
    }
}

impl QualityConfig {
    /// Minimum quality score a document of `source` needs to be retained.
    pub fn min_score_for(&self, source: SourceType) -> f32 {
        match source {
            SourceType::Book => self.min_score.book,
            SourceType::News => self.min_score.news,
            SourceType::Forum => self.min_score.forum,
        }
    }
}

fn default_min_words() -> usize {
    DEFAULT_MIN_WORDS
}

/// Per-source retention cutoffs. Forum posts are short by nature and
/// get a looser cutoff.
#[derive(Debug, Deserialize, Clone)]
pub struct MinScores {
    #[serde(default = "default_book_min_score")]
    pub book: f32,
    #[serde(default = "default_news_min_score")]
    pub news: f32,
    #[serde(default = "default_forum_min_score")]
    pub forum: f32,
}

impl Default for MinScores {
    fn default() -> Self {
        Self {
            book: default_book_min_score(),
            news: default_news_min_score(),
            forum: default_forum_min_score(),
        }
    }
}

fn default_book_min_score() -> f32 {
    0.4
}
fn default_news_min_score() -> f32 {
    0.4
}
fn default_forum_min_score() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProfile {
    pub chunk_size: usize,
    /// Characters carried into the next chunk; at most `chunk_size / 2`.
    pub overlap: usize,
    #[serde(default)]
    pub structural: bool,
}

impl ChunkProfile {
    pub fn params(&self) -> ChunkParams {
        ChunkParams::new(self.chunk_size, self.overlap).with_structural(self.structural)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_book_profile")]
    pub book: ChunkProfile,
    #[serde(default = "default_news_profile")]
    pub news: ChunkProfile,
    #[serde(default = "default_forum_profile")]
    pub forum: ChunkProfile,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            book: default_book_profile(),
            news: default_news_profile(),
            forum: default_forum_profile(),
        }
    }
}

impl ChunkingConfig {
    pub fn profile_for(&self, source: SourceType) -> &ChunkProfile {
        match source {
            SourceType::Book => &self.book,
            SourceType::News => &self.news,
            SourceType::Forum => &self.forum,
        }
    }

    pub fn params_for(&self, source: SourceType) -> ChunkParams {
        self.profile_for(source).params()
    }
}

fn default_book_profile() -> ChunkProfile {
    ChunkProfile {
        chunk_size: 1500,
        overlap: 300,
        structural: true,
    }
}
fn default_news_profile() -> ChunkProfile {
    ChunkProfile {
        chunk_size: 1000,
        overlap: 200,
        structural: false,
    }
}
fn default_forum_profile() -> ChunkProfile {
    ChunkProfile {
        chunk_size: 800,
        overlap: 150,
        structural: false,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"` (neural, fastembed) or `"tfidf"` (statistical).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Backend to degrade to when `backend` fails to initialize, or `"none"`.
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default)]
    pub show_download_progress: bool,
    #[serde(default)]
    pub tfidf: TfIdfConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            fallback: default_fallback(),
            show_download_progress: false,
            tfidf: TfIdfConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// A statistical-only configuration, handy for tests and small corpora.
    pub fn tfidf() -> Self {
        Self {
            backend: "tfidf".to_string(),
            fallback: "none".to_string(),
            ..Self::default()
        }
    }

    /// The configured fallback backend, `None` when degradation is disabled.
    pub fn fallback_backend(&self) -> Option<&str> {
        match self.fallback.as_str() {
            "" | "none" => None,
            other => Some(other),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_fallback() -> String {
    "tfidf".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TfIdfConfig {
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    /// Chunks sampled (evenly across the corpus) to fit the vocabulary.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

impl Default for TfIdfConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
            sample_size: default_sample_size(),
        }
    }
}

fn default_max_features() -> usize {
    DEFAULT_MAX_FEATURES
}
fn default_sample_size() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_k() -> usize {
    50
}

const KNOWN_BACKENDS: &[&str] = &["local", "tfidf"];
const KNOWN_FALLBACKS: &[&str] = &["tfidf"];

impl Config {
    /// Defaults with the index rooted at `dir`.
    pub fn with_index_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                dir: dir.into(),
                ..IndexConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for source in SourceType::ALL {
            let profile = self.chunking.profile_for(source);
            if profile.chunk_size == 0 {
                bail!("chunking.{}.chunk_size must be > 0", source);
            }
            if profile.overlap > profile.chunk_size / 2 {
                bail!(
                    "chunking.{}.overlap ({}) must be at most half of chunk_size ({})",
                    source,
                    profile.overlap,
                    profile.chunk_size
                );
            }
            let min_score = self.quality.min_score_for(source);
            if !(0.0..=1.0).contains(&min_score) {
                bail!("quality.min_score.{} must be in [0.0, 1.0]", source);
            }
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if !KNOWN_BACKENDS.contains(&self.embedding.backend.as_str()) {
            bail!(
                "Unknown embedding backend: '{}'. Must be local or tfidf.",
                self.embedding.backend
            );
        }
        if let Some(fallback) = self.embedding.fallback_backend() {
            if !KNOWN_FALLBACKS.contains(&fallback) {
                bail!(
                    "Unknown embedding fallback: '{}'. Must be tfidf or none.",
                    fallback
                );
            }
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }
        if self.embedding.tfidf.max_features == 0 {
            bail!("embedding.tfidf.max_features must be > 0");
        }

        if self.retrieval.default_k == 0 {
            bail!("retrieval.default_k must be >= 1");
        }
        if self.retrieval.default_k > self.retrieval.max_k {
            bail!(
                "retrieval.default_k ({}) must not exceed retrieval.max_k ({})",
                self.retrieval.default_k,
                self.retrieval.max_k
            );
        }
        Ok(())
    }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.index.dir, PathBuf::from("data/index"));
        assert_eq!(config.chunking.book.chunk_size, 1500);
        assert_eq!(config.chunking.book.overlap, 300);
        assert!(config.chunking.book.structural);
        assert_eq!(config.chunking.forum.chunk_size, 800);
        assert_eq!(config.embedding.backend, "local");
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.embedding.fallback_backend(), Some("tfidf"));
        assert_eq!(config.retrieval.default_k, 5);
    }

    #[test]
    fn test_forum_cutoff_is_looser() {
        let config = Config::default();
        assert!(
            config.quality.min_score_for(SourceType::Forum)
                < config.quality.min_score_for(SourceType::Book)
        );
        assert_eq!(
            config.quality.min_score_for(SourceType::News),
            config.quality.min_score_for(SourceType::Book)
        );
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
            [chunking.news]
            chunk_size = 900
            overlap = 100

            [quality.min_score]
            forum = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.news.chunk_size, 900);
        assert!(!config.chunking.news.structural);
        assert_eq!(config.chunking.book.chunk_size, 1500);
        assert_eq!(config.quality.min_score.forum, 0.1);
        assert_eq!(config.quality.min_score.book, 0.4);
    }

    #[test]
    fn test_overlap_must_be_at_most_half_the_chunk() {
        let err = parse_config(
            r#"
            [chunking.forum]
            chunk_size = 100
            overlap = 100
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap"));

        let err = parse_config("[chunking.book]\nchunk_size = 1000\noverlap = 600\n").unwrap_err();
        assert!(err.to_string().contains("at most half"));
        let config = parse_config("[chunking.book]\nchunk_size = 1000\noverlap = 500\n").unwrap();
        assert_eq!(config.chunking.book.overlap, 500);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(parse_config("[embedding]\nbackend = \"openai\"\n").is_err());
        assert!(parse_config("[embedding]\nfallback = \"bogus\"\n").is_err());
        let err = parse_config("[embedding]\nfallback = \"local\"\n").unwrap_err();
        assert!(err.to_string().contains("Must be tfidf or none"));
        let config = parse_config("[embedding]\nfallback = \"none\"\n").unwrap();
        assert_eq!(config.embedding.fallback_backend(), None);
    }

    #[test]
    fn test_default_k_bounded_by_max_k() {
        assert!(parse_config("[retrieval]\ndefault_k = 10\nmax_k = 5\n").is_err());
        assert!(parse_config("[retrieval]\ndefault_k = 0\n").is_err());
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oeuvre.toml");
        std::fs::write(&path, "[index]\ndir = \"/tmp/idx\"\n[embedding]\nbackend = \"tfidf\"\n")
            .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.index.dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.embedding.backend, "tfidf");
    }
}
