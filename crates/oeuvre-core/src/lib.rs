//! # oeuvre core
//!
//! Pure logic for the oeuvre ingestion and retrieval engine: data
//! models, quality scoring, chunking, the embedding trait and its
//! TF-IDF backend, the flat L2 index, shard merging, filtered search,
//! and the shared error taxonomy.
//!
//! This crate performs no filesystem or network I/O. Persistence,
//! the neural embedding backend, the vector-store service and the
//! corpus pipeline live in the `oeuvre` crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod merge;
pub mod models;
pub mod quality;
pub mod search;
pub mod tfidf;

pub use error::{Error, Result};
