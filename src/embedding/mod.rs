//! Embedding backend selection.
//!
//! Two backends implement [`Embedder`]:
//! - **Neural** ([`LocalEmbedder`]) — multilingual sentence embeddings
//!   run locally through fastembed. Requires the
//!   `local-embeddings-fastembed` feature (on by default); models are
//!   downloaded on first use.
//! - **Statistical** ([`TfIdfEmbedder`]) — TF-IDF fitted on a sample of
//!   the corpus being indexed.
//!
//! # Selection
//!
//! At build time [`create_embedder`] picks the backend named by
//! `embedding.backend`. If the neural backend cannot be initialized and
//! `embedding.fallback = "tfidf"`, it logs a warning and fits the
//! statistical backend instead; the resulting index records a `tfidf-*`
//! model id.
//!
//! At query time [`open_embedder`] reconstructs the backend that built
//! the persisted index, from the model id recorded in its metadata.
//!
//! | `embedding.model` | Dimensions |
//! |-------------------|-----------:|
//! | `paraphrase-multilingual-minilm-l12-v2` (default) | 384 |
//! | `multilingual-e5-small` | 384 |
//! | `all-minilm-l6-v2` | 384 |
//! | `bge-small-en-v1.5` | 384 |

use oeuvre_core::embedding::Embedder;
use oeuvre_core::merge::IndexMetadata;
use oeuvre_core::tfidf::TfIdfEmbedder;
use oeuvre_core::{Error, Result};

use crate::config::{EmbeddingConfig, TfIdfConfig};
use crate::persist::{self, IndexLayout};

pub const DEFAULT_LOCAL_MODEL: &str = "paraphrase-multilingual-minilm-l12-v2";

/// Output dimension of every supported local model.
pub const LOCAL_MODEL_DIMS: usize = 384;

const TFIDF_PREFIX: &str = "tfidf-";

/// The backend chosen for a build or a search session.
pub enum Backend {
    #[cfg(feature = "local-embeddings-fastembed")]
    Neural(LocalEmbedder),
    Statistical(TfIdfEmbedder),
}

impl Backend {
    /// The fitted TF-IDF model, when this is the statistical backend.
    pub fn as_tfidf(&self) -> Option<&TfIdfEmbedder> {
        match self {
            Backend::Statistical(model) => Some(model),
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Neural(_) => None,
        }
    }

    pub fn is_statistical(&self) -> bool {
        self.as_tfidf().is_some()
    }

    fn inner(&self) -> &dyn Embedder {
        match self {
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Neural(model) => model,
            Backend::Statistical(model) => model,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_statistical() { "Statistical" } else { "Neural" };
        f.debug_struct("Backend")
            .field("kind", &kind)
            .field("model", &self.model_name())
            .field("dims", &self.dims())
            .finish()
    }
}

impl Embedder for Backend {
    fn model_name(&self) -> &str {
        self.inner().model_name()
    }

    fn dims(&self) -> usize {
        self.inner().dims()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner().embed(texts)
    }
}

/// Select and initialize the build-time backend.
///
/// `corpus` is the chunk text about to be indexed; the statistical
/// backend is fitted on an even sample of it.
///
/// # Errors
///
/// [`Error::EmbeddingBackend`] when the configured backend cannot be
/// initialized and no fallback is configured, or when the fallback
/// cannot be fitted either.
pub fn create_embedder(config: &EmbeddingConfig, corpus: &[String]) -> Result<Backend> {
    match config.backend.as_str() {
        "tfidf" => Ok(Backend::Statistical(fit_tfidf(&config.tfidf, corpus)?)),
        "local" => match init_local(config, config.model.as_deref()) {
            Ok(backend) => Ok(backend),
            Err(err) => match config.fallback_backend() {
                Some("tfidf") => {
                    tracing::warn!(
                        error = %err,
                        "neural embedding backend unavailable; degrading to TF-IDF"
                    );
                    Ok(Backend::Statistical(fit_tfidf(&config.tfidf, corpus)?))
                }
                _ => Err(err),
            },
        },
        other => Err(Error::EmbeddingBackend(format!(
            "unknown embedding backend '{}'",
            other
        ))),
    }
}

/// Reconstruct the backend that built the index described by `metadata`.
///
/// TF-IDF models are loaded from the index directory by model id; neural models are
/// re-initialized by name.
///
/// # Errors
///
/// [`Error::EmbeddingBackend`] if the backend cannot be recreated, and
/// [`Error::Validation`] if the recreated backend's identity or
/// dimension differs from the recorded one.
pub fn open_embedder(
    config: &EmbeddingConfig,
    layout: &IndexLayout,
    metadata: &IndexMetadata,
) -> Result<Backend> {
    let backend = if metadata.embedding_model.starts_with(TFIDF_PREFIX) {
        let model = persist::load_tfidf(layout, &metadata.embedding_model)?.ok_or_else(|| {
            Error::EmbeddingBackend(format!(
                "index was built with {} but no TF-IDF model is stored at {}",
                metadata.embedding_model,
                layout.tfidf_model(&metadata.embedding_model).display()
            ))
        })?;
        Backend::Statistical(model)
    } else {
        init_local(config, Some(metadata.embedding_model.as_str()))?
    };

    if backend.model_name() != metadata.embedding_model {
        return Err(Error::Validation(format!(
            "index was built with '{}', backend is '{}'",
            metadata.embedding_model,
            backend.model_name()
        )));
    }
    if backend.dims() != metadata.embedding_dim {
        return Err(Error::Validation(format!(
            "index has dimension {}, backend produces {}",
            metadata.embedding_dim,
            backend.dims()
        )));
    }
    Ok(backend)
}

/// Fit TF-IDF on an evenly spaced sample of `corpus`.
pub fn fit_tfidf(config: &TfIdfConfig, corpus: &[String]) -> Result<TfIdfEmbedder> {
    let sample = sample_evenly(corpus, config.sample_size);
    let model = TfIdfEmbedder::fitted(&sample, config.max_features)?;
    tracing::info!(
        sample = sample.len(),
        features = model.dims(),
        model = model.model_name(),
        "fitted TF-IDF model"
    );
    Ok(model)
}

fn sample_evenly(corpus: &[String], max: usize) -> Vec<&str> {
    if max == 0 || corpus.len() <= max {
        return corpus.iter().map(String::as_str).collect();
    }
    let step = corpus.len() as f64 / max as f64;
    (0..max)
        .map(|i| corpus[((i as f64 * step) as usize).min(corpus.len() - 1)].as_str())
        .collect()
}

/// Model name and dimension for a local model, defaulting both.
pub fn resolve_local_model(model: Option<&str>, dims: Option<usize>) -> (String, usize) {
    let name = model.unwrap_or(DEFAULT_LOCAL_MODEL).to_string();
    (name, dims.unwrap_or(LOCAL_MODEL_DIMS))
}

#[cfg(feature = "local-embeddings-fastembed")]
fn init_local(config: &EmbeddingConfig, model: Option<&str>) -> Result<Backend> {
    Ok(Backend::Neural(LocalEmbedder::new(config, model)?))
}

#[cfg(not(feature = "local-embeddings-fastembed"))]
fn init_local(_config: &EmbeddingConfig, _model: Option<&str>) -> Result<Backend> {
    Err(Error::EmbeddingBackend(
        "local embeddings require --features local-embeddings-fastembed".into(),
    ))
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::Mutex;

    use oeuvre_core::embedding::{validate_batch, Embedder};
    use oeuvre_core::{Error, Result};

    use super::resolve_local_model;
    use crate::config::EmbeddingConfig;

    /// fastembed-backed sentence embeddings.
    ///
    /// The ONNX session needs `&mut` access, so it sits behind a mutex;
    /// concurrent callers embed one batch at a time.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Mutex<fastembed::TextEmbedding>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig, model: Option<&str>) -> Result<Self> {
            let (model_name, dims) =
                resolve_local_model(model.or(config.model.as_deref()), config.dims);
            let fastembed_model = to_fastembed_model(&model_name)?;
            let session = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model)
                    .with_show_download_progress(config.show_download_progress),
            )
            .map_err(|e| {
                Error::EmbeddingBackend(format!("failed to initialize {}: {}", model_name, e))
            })?;
            tracing::info!(model = %model_name, dims, "initialized local embedding model");
            Ok(Self {
                model_name,
                dims,
                batch_size: config.batch_size,
                model: Mutex::new(session),
            })
        }
    }

    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut session = self
                .model
                .lock()
                .map_err(|_| Error::EmbeddingBackend("embedding session lock poisoned".into()))?;
            let vectors = session
                .embed(texts.to_vec(), Some(self.batch_size))
                .map_err(|e| Error::EmbeddingBackend(format!("local embedding failed: {}", e)))?;
            validate_batch(self, texts.len(), &vectors)?;
            Ok(vectors)
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "paraphrase-multilingual-minilm-l12-v2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
            }
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            other => Err(Error::EmbeddingBackend(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 paraphrase-multilingual-minilm-l12-v2, multilingual-e5-small, \
                 all-minilm-l6-v2, bge-small-en-v1.5",
                other
            ))),
        }
    }
}
