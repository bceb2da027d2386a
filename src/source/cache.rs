//! In-memory store for templates and filled documents

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// A cached PDF and the label used to name documents derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPdf {
    pub data: Vec<u8>,
    pub label: String,
}

struct CacheInner {
    lru: LruCache<String, CachedPdf>,
    total_bytes: usize,
}

/// LRU document cache bounded by entry count and total bytes.
///
/// Every filled output lands here so its key can be passed to later calls.
pub struct DocumentCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl DocumentCache {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Store a document under a fresh key and return the key.
    ///
    /// Returns `None` when the document alone exceeds the byte budget.
    pub fn insert(&self, label: impl Into<String>, data: Vec<u8>) -> Option<String> {
        if data.len() > self.max_bytes {
            tracing::debug!(size = data.len(), max = self.max_bytes, "document too large to cache");
            return None;
        }

        let mut inner = self.inner.lock();
        let key = loop {
            let key = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&key) {
                break key;
            }
        };

        let entry = CachedPdf {
            data,
            label: label.into(),
        };
        Self::store(&mut inner, self.max_bytes, key.clone(), entry);
        Some(key)
    }

    fn store(inner: &mut CacheInner, max_bytes: usize, key: String, entry: CachedPdf) {
        let size = entry.data.len();

        while inner.total_bytes + size > max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.data.len());
                }
                None => break,
            }
        }

        // Count-based eviction by the LRU itself
        if let Some((_, evicted)) = inner.lru.push(key, entry) {
            inner.total_bytes = inner.total_bytes.saturating_sub(evicted.data.len());
        }
        inner.total_bytes += size;
    }

    pub fn get(&self, key: &str) -> Option<CachedPdf> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<CachedPdf> {
        let mut inner = self.inner.lock();
        let entry = inner.lru.pop(key)?;
        inner.total_bytes = inner.total_bytes.saturating_sub(entry.data.len());
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.inner.lock().lru.cap().get()
    }
}
