//! Shared, lazily loaded handle to the combined index.
//!
//! A [`VectorStore`] starts unloaded. The first [`VectorStore::get`]
//! loads the combined index through its [`IndexLoader`]; every caller
//! after that receives a clone of the same `Arc<CombinedIndex>`.
//!
//! # Locking
//!
//! The load uses double-checked locking:
//!
//! 1. the `ready` flag is read without taking any lock;
//! 2. if unloaded, the load mutex is taken and the flag is checked again;
//! 3. only the thread that still sees "unloaded" runs the loader.
//!
//! Searches hold their own `Arc`, so [`VectorStore::reload`] can build
//! a replacement index and swap it in while they run. The old index is
//! served until the swap and dropped when its last reader finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use oeuvre_core::merge::CombinedIndex;
use oeuvre_core::Result;

use crate::persist::{self, IndexLayout};

/// Produces a combined index for the store.
pub trait IndexLoader: Send + Sync {
    fn load(&self) -> Result<CombinedIndex>;
}

/// Loads the persisted combined index from an index directory.
pub struct DiskLoader {
    layout: IndexLayout,
}

impl DiskLoader {
    pub fn new(layout: IndexLayout) -> Self {
        Self { layout }
    }
}

impl IndexLoader for DiskLoader {
    fn load(&self) -> Result<CombinedIndex> {
        persist::read_combined(&self.layout)
    }
}

pub struct VectorStore {
    loader: Box<dyn IndexLoader>,
    ready: AtomicBool,
    current: RwLock<Option<Arc<CombinedIndex>>>,
    load_lock: Mutex<()>,
}

impl VectorStore {
    pub fn new(loader: impl IndexLoader + 'static) -> Arc<Self> {
        Arc::new(Self {
            loader: Box::new(loader),
            ready: AtomicBool::new(false),
            current: RwLock::new(None),
            load_lock: Mutex::new(()),
        })
    }

    /// A store over the combined index persisted under `layout`.
    pub fn open(layout: IndexLayout) -> Arc<Self> {
        Self::new(DiskLoader::new(layout))
    }

    /// Whether an index is loaded. Never triggers a load.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The loaded index, loading it on first access.
    ///
    /// # Errors
    ///
    /// [`oeuvre_core::Error::NotReady`] when nothing is persisted yet, or
    /// the loader's error (typically a validation failure) when the
    /// persisted index is inconsistent. The store stays unloaded and the
    /// next call retries.
    pub fn get(&self) -> Result<Arc<CombinedIndex>> {
        if self.is_ready() {
            if let Some(index) = self.snapshot() {
                return Ok(index);
            }
        }

        let _guard = self.load_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_ready() {
            if let Some(index) = self.snapshot() {
                return Ok(index);
            }
        }

        let index = Arc::new(self.loader.load().map_err(|err| {
            tracing::warn!(error = %err, "vector store load failed");
            err
        })?);
        self.install(Arc::clone(&index));
        tracing::info!(
            documents = index.len(),
            dims = index.dims(),
            model = index.embedding_model(),
            "vector store loaded"
        );
        Ok(index)
    }

    /// Build a fresh index through the loader and swap it in.
    ///
    /// On failure the previously loaded index (if any) keeps serving.
    pub fn reload(&self) -> Result<Arc<CombinedIndex>> {
        let _guard = self.load_lock.lock().unwrap_or_else(|e| e.into_inner());
        let index = Arc::new(self.loader.load()?);
        self.install(Arc::clone(&index));
        tracing::info!(documents = index.len(), "vector store reloaded");
        Ok(index)
    }

    /// Drop the loaded index; the next `get` loads again.
    pub fn unload(&self) {
        let _guard = self.load_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ready.store(false, Ordering::Release);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn snapshot(&self) -> Option<Arc<CombinedIndex>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }

    fn install(&self, index: Arc<CombinedIndex>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(index);
        self.ready.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oeuvre_core::index::{FlatIndex, IndexShard};
    use oeuvre_core::merge::merge_shards;
    use oeuvre_core::models::{Chunk, ChunkMetadata, SourceType};
    use oeuvre_core::Error;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn combined(n: usize) -> CombinedIndex {
        let mut index = FlatIndex::new(2);
        index
            .add(&(0..n).map(|i| vec![i as f32, 0.0]).collect::<Vec<_>>())
            .unwrap();
        let chunks = (0..n)
            .map(|i| Chunk {
                text: format!("chunk {}", i),
                title: None,
                metadata: ChunkMetadata {
                    source: Some(SourceType::News),
                    category: "news".into(),
                    date: None,
                    url: None,
                    quality_score: 0.5,
                    chunk_index: i,
                    chunk_id: format!("c{}", i),
                    author: None,
                    section: None,
                },
            })
            .collect();
        let shard = IndexShard::new(SourceType::News, "m", Utc::now(), index, chunks).unwrap();
        merge_shards(vec![shard]).unwrap()
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl IndexLoader for CountingLoader {
        fn load(&self) -> Result<CombinedIndex> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            if n < self.fail_first {
                return Err(Error::NotReady("nothing persisted".into()));
            }
            Ok(combined(n + 1))
        }
    }

    fn counting(fail_first: usize) -> (Arc<VectorStore>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let store = VectorStore::new(CountingLoader {
            loads: Arc::clone(&loads),
            fail_first,
        });
        (store, loads)
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let (store, loads) = counting(0);
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.get().unwrap()
                })
            })
            .collect();
        let indexes: Vec<Arc<CombinedIndex>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for index in &indexes[1..] {
            assert!(Arc::ptr_eq(&indexes[0], index));
        }
    }

    #[test]
    fn test_is_ready_never_loads() {
        let (store, loads) = counting(0);
        assert!(!store.is_ready());
        assert!(!store.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        store.get().unwrap();
        assert!(store.is_ready());
    }

    #[test]
    fn test_failed_load_is_retried() {
        let (store, loads) = counting(1);
        let err = store.get().unwrap_err();
        assert!(err.is_not_ready());
        assert!(!store.is_ready());

        let index = store.get().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reload_swaps_without_dropping_readiness() {
        let (store, _) = counting(0);
        let before = store.get().unwrap();
        assert_eq!(before.len(), 1);

        let after = store.reload().unwrap();
        assert!(store.is_ready());
        assert_eq!(after.len(), 2);
        assert!(Arc::ptr_eq(&after, &store.get().unwrap()));
        // Readers holding the old handle are unaffected.
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_serving_old_index() {
        struct FlakyLoader(AtomicUsize);
        impl IndexLoader for FlakyLoader {
            fn load(&self) -> Result<CombinedIndex> {
                match self.0.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(combined(3)),
                    _ => Err(Error::Validation("torn pair".into())),
                }
            }
        }
        let store = VectorStore::new(FlakyLoader(AtomicUsize::new(0)));
        let first = store.get().unwrap();
        assert!(store.reload().is_err());
        assert!(store.is_ready());
        assert!(Arc::ptr_eq(&first, &store.get().unwrap()));
    }

    #[test]
    fn test_unload_resets_state() {
        let (store, loads) = counting(0);
        store.get().unwrap();
        store.unload();
        assert!(!store.is_ready());
        store.get().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disk_store_without_index_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(IndexLayout::new(dir.path()));
        assert!(store.get().unwrap_err().is_not_ready());
        assert!(!store.is_ready());
    }
}
