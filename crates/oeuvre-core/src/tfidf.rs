//! TF-IDF statistical embedding backend.
//!
//! A lightweight fallback for when the neural backend is unavailable.
//! The model must be fitted on a representative corpus sample before
//! use; its dimension is the size of the fitted vocabulary.
//!
//! # Algorithm
//!
//! - Tokens are lowercase alphanumeric runs of at least two characters,
//!   minus a short stopword list.
//! - Fitting keeps the `max_features` terms with the highest document
//!   frequency (ties broken alphabetically) and orders them
//!   alphabetically to assign columns.
//! - IDF is smoothed: `ln((1 + n) / (1 + df)) + 1`.
//! - A text's vector is sublinear TF (`1 + ln tf`) times IDF,
//!   L2-normalized. Texts with no known terms map to the zero vector.
//!
//! The model name embeds a fingerprint of the vocabulary, so two
//! differently-fitted models never share an identifier even when their
//! dimensions agree.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{l2_normalize, Embedder};
use crate::error::{Error, Result};

pub const DEFAULT_MAX_FEATURES: usize = 4096;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "is", "it", "its", "of", "on", "or", "she", "that", "the", "their",
    "there", "they", "this", "to", "was", "were", "which", "with", "will", "would", "you",
];

/// Fitted (or not yet fitted) TF-IDF model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfIdfEmbedder {
    max_features: usize,
    model_name: String,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f32>,
    documents_seen: usize,
}

impl TfIdfEmbedder {
    /// An unfitted model. [`Embedder::embed`] fails until [`fit`](Self::fit) succeeds.
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features: max_features.max(1),
            model_name: "tfidf-unfitted".to_string(),
            vocabulary: BTreeMap::new(),
            idf: Vec::new(),
            documents_seen: 0,
        }
    }

    /// Convenience: construct and fit in one step.
    pub fn fitted<S: AsRef<str>>(corpus: &[S], max_features: usize) -> Result<Self> {
        let mut model = Self::new(max_features);
        model.fit(corpus)?;
        Ok(model)
    }

    pub fn is_fitted(&self) -> bool {
        !self.vocabulary.is_empty()
    }

    pub fn documents_seen(&self) -> usize {
        self.documents_seen
    }

    /// Fit the vocabulary and IDF weights on a corpus sample.
    ///
    /// Refitting replaces the previous vocabulary entirely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmbeddingBackend`] when the sample contains no
    /// usable terms.
    pub fn fit<S: AsRef<str>>(&mut self, corpus: &[S]) -> Result<()> {
        let mut df: HashMap<String, usize> = HashMap::new();
        for text in corpus {
            let terms: HashSet<String> = tokenize(text.as_ref()).collect();
            for term in terms {
                *df.entry(term).or_insert(0) += 1;
            }
        }
        if df.is_empty() {
            return Err(Error::EmbeddingBackend(
                "cannot fit TF-IDF model: sample has no usable terms".into(),
            ));
        }

        let mut ranked: Vec<(String, usize)> = df.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_features);
        ranked.sort_by(|a, b| a.0.cmp(&b.0));

        let n = corpus.len() as f32;
        self.vocabulary = ranked
            .iter()
            .enumerate()
            .map(|(i, (term, _))| (term.clone(), i))
            .collect();
        self.idf = ranked
            .iter()
            .map(|(_, df)| ((1.0 + n) / (1.0 + *df as f32)).ln() + 1.0)
            .collect();
        self.documents_seen = corpus.len();
        self.model_name = format!("tfidf-{}-{}", self.idf.len(), self.fingerprint());
        Ok(())
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for term in self.vocabulary.keys() {
            hasher.update(term.as_bytes());
            hasher.update(b"\n");
        }
        let mut hex = format!("{:x}", hasher.finalize());
        hex.truncate(12);
        hex
    }

    fn transform(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for term in tokenize(text) {
            if let Some(&col) = self.vocabulary.get(&term) {
                *counts.entry(col).or_insert(0) += 1;
            }
        }
        let mut v = vec![0.0f32; self.idf.len()];
        for (col, tf) in counts {
            v[col] = (1.0 + (tf as f32).ln()) * self.idf[col];
        }
        l2_normalize(&mut v);
        v
    }
}

impl Embedder for TfIdfEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.idf.len()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.is_fitted() {
            return Err(Error::EmbeddingBackend(
                "TF-IDF model used before fit".into(),
            ));
        }
        Ok(texts.iter().map(|t| self.transform(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}
