//! Chunk memoization shared by all threads using one tokenizer.

use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::{Arc, RwLock};

use rustc_hash::{FxBuildHasher, FxHashMap};

use super::vocab::TokenId;

/// Default number of independently locked shards.
pub const DEFAULT_CACHE_SHARDS: usize = 16;

type Shard = RwLock<FxHashMap<Vec<u8>, Arc<[TokenId]>>>;

/// Sharded chunk -> token IDs map with insert-if-absent semantics.
///
/// Entries are never evicted or replaced. The merge result of a chunk depends
/// only on the vocabulary, which cannot change for the owning tokenizer.
/// A poisoned shard degrades to computing without caching.
pub struct ChunkCache {
    shards: Box<[Shard]>,
    hasher: FxBuildHasher,
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SHARDS)
    }
}

impl ChunkCache {
    /// Create an empty cache; `shards` is clamped to at least 1.
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect();
        Self {
            shards,
            hasher: FxBuildHasher,
        }
    }

    fn shard(&self, chunk: &[u8]) -> &Shard {
        let mut h = self.hasher.build_hasher();
        chunk.hash(&mut h);
        let idx = (h.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn get(&self, chunk: &[u8]) -> Option<Arc<[TokenId]>> {
        let shard = self.shard(chunk).read().ok()?;
        shard.get(chunk).cloned()
    }

    /// Return the cached tokens for `chunk`, computing and storing them on a miss.
    ///
    /// `compute` runs outside any lock. If two threads race on the same chunk,
    /// the first insert wins and both callers get equal values. Errors are
    /// returned as-is and nothing is stored.
    pub fn get_or_compute<F, E>(&self, chunk: &[u8], compute: F) -> Result<Arc<[TokenId]>, E>
    where
        F: FnOnce() -> Result<Vec<TokenId>, E>,
    {
        if let Some(hit) = self.get(chunk) {
            return Ok(hit);
        }

        log::trace!("chunk cache miss ({} bytes)", chunk.len());
        let computed: Arc<[TokenId]> = compute()?.into();

        if let Ok(mut shard) = self.shard(chunk).write() {
            let entry = shard
                .entry(chunk.to_vec())
                .or_insert_with(|| computed.clone());
            return Ok(entry.clone());
        }
        Ok(computed)
    }

    /// Number of cached chunks.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.read().ok())
            .map(|s| s.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_or_compute_memoizes() {
        let cache = ChunkCache::new(4);
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(vec![1, 2, 3])
        };

        let a = cache.get_or_compute(b"abc", compute).unwrap();
        let b = cache.get_or_compute(b"abc", compute).unwrap();
        assert_eq!(&*a, &[1, 2, 3]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ChunkCache::default();
        let err: Result<_, &str> = cache.get_or_compute(b"x", || Err("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        assert!(cache.is_empty());
        assert!(cache.get(b"x").is_none());
    }

    #[test]
    fn test_zero_shards_clamped() {
        let cache = ChunkCache::new(0);
        assert_eq!(cache.shard_count(), 1);
        cache
            .get_or_compute(b"a", || Ok::<_, Infallible>(vec![7]))
            .unwrap();
        assert_eq!(cache.get(b"a").as_deref(), Some([7].as_slice()));
    }

    #[test]
    fn test_concurrent_insert_if_absent() {
        let cache = Arc::new(ChunkCache::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        let key = format!("chunk-{}", (i + t) % 50);
                        let value = cache
                            .get_or_compute(key.as_bytes(), || {
                                Ok::<_, Infallible>(vec![(i + t) % 50])
                            })
                            .unwrap();
                        assert_eq!(&*value, &[(i + t) % 50]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 50);
    }
}
