//! Persisted merging of shards into the combined index.
//!
//! The pure merge lives in [`oeuvre_core::merge`]; this module adds the
//! disk side: every merge is fully validated in memory before anything
//! is written, the previous combined pair is backed up, and the new pair
//! replaces it atomically.

use oeuvre_core::index::IndexShard;
use oeuvre_core::merge::{merge_shards, CombinedIndex};
use oeuvre_core::Result;

use crate::persist::{self, IndexLayout};

/// Replace the combined index with a merge of `shards`.
///
/// The previous pair (if any) is copied to `backups/` first and old
/// backups are pruned to `keep_backups`.
pub fn rebuild_combined(
    layout: &IndexLayout,
    shards: Vec<IndexShard>,
    keep_backups: usize,
) -> Result<CombinedIndex> {
    let combined = merge_shards(shards)?;
    persist::backup_combined(layout, keep_backups)?;
    persist::write_combined(layout, &combined)?;
    tracing::info!(
        documents = combined.len(),
        sources = ?combined.metadata().sources,
        "rebuilt combined index"
    );
    Ok(combined)
}

/// Merge shards into the existing combined index in one step.
///
/// Each shard's source is replaced wholesale, so re-running the same
/// addition is idempotent. All shards are folded in memory first; the
/// previous pair is backed up once and replaced once, so a failure on
/// any shard leaves the combined index untouched. With no combined
/// index on disk the shards become the whole index.
pub fn add_shards_incremental(
    layout: &IndexLayout,
    shards: Vec<IndexShard>,
    keep_backups: usize,
) -> Result<CombinedIndex> {
    let sources: Vec<_> = shards.iter().map(|s| s.source).collect();
    let added: usize = shards.iter().map(IndexShard::len).sum();
    let combined = if layout.has_combined() {
        let mut updated = persist::read_combined(layout)?;
        for shard in shards {
            updated = updated.replace_source(shard)?;
        }
        persist::backup_combined(layout, keep_backups)?;
        updated
    } else {
        merge_shards(shards)?
    };
    persist::write_combined(layout, &combined)?;
    tracing::info!(
        sources = ?sources,
        added,
        documents = combined.len(),
        "merged shards into combined index"
    );
    Ok(combined)
}
