//! # oeuvre
//!
//! Quality-scored ingestion and semantic retrieval over one author's
//! body of work: books, news articles and forum posts.
//!
//! Scraped documents are scored for quality, low-value text is dropped,
//! the rest is chunked per source, embedded, and stored in per-source
//! flat L2 indexes that are merged into one combined index. A shared
//! [`store::VectorStore`] loads that index once and serves concurrent
//! [`search::SearchEngine`] queries with optional source and category
//! filters.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐   ┌────────────┐
//! │  Sources  │──▶│ Score+Chunk  │──▶│  Embed    │──▶│  Shards    │
//! │ JSON/JSONL│   │   (ingest)   │   │ NN/TF-IDF │   │ per source │
//! └───────────┘   └──────────────┘   └───────────┘   └─────┬──────┘
//!                                                          │ merge
//!                                                          ▼
//!                 ┌──────────────┐   ┌───────────┐   ┌────────────┐
//!                 │ SearchEngine │◀──│VectorStore│◀──│  Combined  │
//!                 │  k-NN+filter │   │ lazy load │   │   index    │
//!                 └──────────────┘   └───────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and centralized defaults |
//! | [`sources`] | Loading raw documents from JSON/JSONL |
//! | [`ingest`] | Quality filtering and chunking of a batch |
//! | [`embedding`] | Backend selection (fastembed or TF-IDF) |
//! | [`builder`] | Per-source shard building |
//! | [`merge`] | Persisted merging with backups |
//! | [`persist`] | On-disk index format and atomic writes |
//! | [`store`] | Lazily loaded, shared combined index |
//! | [`search`] | Query-time retrieval |
//! | [`pipeline`] | Full and incremental builds |
//! | [`run_log`] | Append-only build history |
//! | [`progress`] | Build progress on stderr |
//! | [`stats`] | Index statistics |
//!
//! Pure logic (models, scoring, chunking, the flat index, merging and
//! filtered ranking) lives in the `oeuvre-core` crate.

pub mod builder;
pub mod config;
pub mod embedding;
pub mod ingest;
pub mod merge;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod run_log;
pub mod search;
pub mod sources;
pub mod stats;
pub mod store;
