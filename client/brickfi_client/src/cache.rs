//! Shared response cache for contract reads.
//!
//! Keyed by read-query identity (target + calldata). A confirmed write marks
//! every entry stale instead of locking anything; stale entries are refetched
//! on the next read. Invalidation is idempotent.
//!
//! A fetch that started before an invalidation is stored stale, so a reply
//! computed against pre-transaction state is never served as fresh.
//!
//! Processes that never submit writes (the gateway) bound freshness with a
//! max age instead. The entry count is capped in every mode: stale and
//! expired entries go first, then the oldest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::rpc::CallRequest;

/// Entry cap of [`ReadCache::new`].
pub const DEFAULT_MAX_ENTRIES: usize = 4_096;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    stale: bool,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, max_age: Option<Duration>) -> bool {
        !self.stale && max_age.map_or(true, |age| self.fetched_at.elapsed() < age)
    }
}

/// Cheap to clone; clones share storage.
#[derive(Debug, Clone)]
pub struct ReadCache {
    entries: Arc<RwLock<HashMap<CallRequest, CacheEntry>>>,
    generation: Arc<AtomicU64>,
    /// `None`: fresh until invalidated.
    max_age: Option<Duration>,
    max_entries: usize,
}

impl Default for ReadCache {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            generation: Arc::default(),
            max_age: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl ReadCache {
    /// Entries stay fresh until [`ReadCache::invalidate_all`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries also expire `max_age` after they were fetched. At most
    /// `max_entries` are kept.
    pub fn with_limits(max_age: Duration, max_entries: usize) -> Self {
        Self {
            max_age: Some(max_age),
            max_entries: max_entries.max(1),
            ..Self::default()
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Current invalidation generation. Capture before fetching and pass to
    /// [`ReadCache::insert`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cached value, unless missing, stale or older than the max age.
    pub async fn get_fresh(&self, key: &CallRequest) -> Option<Bytes> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.is_fresh(self.max_age))
            .map(|e| e.value.clone())
    }

    /// Store a fetched value. If an invalidation happened since
    /// `fetched_at_generation` the entry is kept stale.
    pub async fn insert(&self, key: CallRequest, value: Bytes, fetched_at_generation: u64) {
        let stale = self.generation() != fetched_at_generation;
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            self.evict(&mut entries);
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                stale,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Make room for one entry.
    fn evict(&self, entries: &mut HashMap<CallRequest, CacheEntry>) {
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(self.max_age));
        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        debug!("Read cache evicted {} entries", before - entries.len());
    }

    /// Mark every entry stale.
    pub async fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut() {
            entry.stale = true;
        }
        debug!("Read cache invalidated ({} entries)", entries.len());
    }

    /// `None` when the key was never cached.
    pub async fn is_stale(&self, key: &CallRequest) -> Option<bool> {
        self.entries.read().await.get(key).map(|e| e.stale)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
