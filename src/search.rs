//! Query-time retrieval.
//!
//! [`SearchEngine`] ties a [`VectorStore`] to the embedding backend that
//! built its index. A search:
//!
//! 1. rejects an empty query or `k == 0` ([`Error::MalformedQuery`]);
//! 2. clamps `k` to `retrieval.max_k` (and defaults it to `default_k`);
//! 3. obtains the combined index from the store ([`Error::NotReady`]);
//! 4. checks that the backend's model id and dimension match the index
//!    metadata ([`Error::Validation`]);
//! 5. embeds the query and runs exact k-NN, applying any filter before
//!    ranking.
//!
//! Results are ascending by squared L2 distance, ties broken by index
//! position.

use std::sync::Arc;

use oeuvre_core::embedding::Embedder;
use oeuvre_core::search::{search_index, SearchFilter, SearchResult};
use oeuvre_core::{Error, Result};

use crate::config::{Config, RetrievalConfig};
use crate::embedding;
use crate::persist::{self, IndexLayout};
use crate::store::VectorStore;

pub struct SearchEngine {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
}

impl SearchEngine {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            retrieval,
        }
    }

    /// Open the persisted index under `config.index.dir` together with
    /// the backend recorded in its metadata.
    ///
    /// Only the sidecar is read here; vectors load on the first search.
    pub fn open(config: &Config) -> Result<Self> {
        let layout = IndexLayout::new(&config.index.dir);
        let metadata = persist::read_combined_metadata(&layout)?;
        let backend = embedding::open_embedder(&config.embedding, &layout, &metadata)?;
        Ok(Self::new(
            VectorStore::open(layout),
            Arc::new(backend),
            config.retrieval.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Nearest chunks to `query`, at most `k` (default `retrieval.default_k`).
    pub fn search(
        &self,
        query: &str,
        k: Option<usize>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::MalformedQuery("query must not be empty".into()));
        }
        let k = k.unwrap_or(self.retrieval.default_k);
        if k == 0 {
            return Err(Error::MalformedQuery("k must be at least 1".into()));
        }
        let k = k.min(self.retrieval.max_k);

        let index = self.store.get()?;
        let metadata = index.metadata();
        if self.embedder.model_name() != metadata.embedding_model {
            return Err(Error::Validation(format!(
                "query backend '{}' does not match index model '{}'",
                self.embedder.model_name(),
                metadata.embedding_model
            )));
        }
        if self.embedder.dims() != metadata.embedding_dim {
            return Err(Error::Validation(format!(
                "query backend produces dimension {}, index has {}",
                self.embedder.dims(),
                metadata.embedding_dim
            )));
        }

        let vector = self.embedder.embed_query(query)?;
        let results = search_index(&index, &vector, k, filter)?;
        tracing::debug!(k, hits = results.len(), filtered = filter.is_some(), "search");
        Ok(results)
    }
}
