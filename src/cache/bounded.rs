//! Memory-bounded, count-bounded LRU cache with an optional disk tier.
//!
//! # Eviction
//!
//! After every insert the least-recently-used entries are evicted until both
//! the item ceiling and the byte ceiling hold, or the cache is empty. Eviction
//! looks at recency only. A single entry larger than the byte budget therefore
//! evicts every other entry and then itself; this is accepted behavior.
//!
//! # Disk Tier
//!
//! With a [`DiskShadow`] attached, every `put` schedules a background write
//! (encode, write, prune) on the blocking pool and returns without waiting.
//! A memory miss consults the disk; a disk hit is re-inserted into memory.
//! Disk failures are logged and otherwise ignored.
//!
//! Background writes are not ordered against each other. Two `put`s of the
//! same key may land on disk in either order, so the disk copy can be the
//! older value; memory always holds the latest.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::config::CacheSettings;
use crate::decode::DecodedImage;

use super::disk::DiskShadow;
use super::value::CacheValue;

// =============================================================================
// Defaults
// =============================================================================

/// Default thumbnail/full-image cache entry ceiling.
pub const DEFAULT_THUMB_MAX_ITEMS: usize = 512;

/// Default thumbnail/full-image cache byte ceiling: 512MB.
pub const DEFAULT_THUMB_MAX_BYTES: usize = 512 * 1024 * 1024;

/// Default number of persisted thumbnails.
pub const DEFAULT_THUMB_DISK_ENTRIES: usize = 5000;

/// Default tile cache entry ceiling.
pub const DEFAULT_TILE_MAX_ITEMS: usize = 256;

/// Default tile cache byte ceiling: 256MB.
pub const DEFAULT_TILE_MAX_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// LRU Index
// =============================================================================

/// Recency-ordered entries plus the running byte total.
///
/// `current_bytes` always equals the sum of `size_bytes` over `entries`.
struct LruIndex<V> {
    entries: LruCache<String, V>,
    current_bytes: usize,
}

impl<V: CacheValue> LruIndex<V> {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            current_bytes: 0,
        }
    }

    /// Insert or replace `key` as most recently used, then evict until both
    /// ceilings hold. Returns the number of entries evicted.
    fn insert(&mut self, key: String, value: V, max_items: usize, max_bytes: usize) -> usize {
        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes());
        }
        self.current_bytes += value.size_bytes();
        self.entries.push(key, value);

        let mut evicted = 0;
        while self.entries.len() > max_items || self.current_bytes > max_bytes {
            match self.entries.pop_lru() {
                Some((key, value)) => {
                    trace!(key = %key, bytes = value.size_bytes(), "evicted");
                    self.current_bytes = self.current_bytes.saturating_sub(value.size_bytes());
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    fn remove(&mut self, key: &str) -> Option<V> {
        let value = self.entries.pop(key)?;
        self.current_bytes = self.current_bytes.saturating_sub(value.size_bytes());
        Some(value)
    }
}

// =============================================================================
// Pending Disk Writes
// =============================================================================

/// Counts fire-and-forget disk writes so they can be awaited on shutdown.
#[derive(Default)]
struct PendingWrites {
    count: AtomicUsize,
    idle: Notify,
}

/// Marks one write finished when dropped, even if the write panicked.
struct WriteGuard(Arc<PendingWrites>);

impl WriteGuard {
    fn begin(pending: &Arc<PendingWrites>) -> Self {
        pending.count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(pending))
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// =============================================================================
// Bounded Cache
// =============================================================================

/// Two-tier LRU cache bounded by entry count and total bytes.
///
/// All index mutations, including the promotion on a hit, happen under one
/// lock per instance. Disk I/O never holds that lock.
///
/// # Example
///
/// ```
/// use photocache::cache::BoundedCache;
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache: BoundedCache<Bytes> = BoundedCache::new(2, 1024);
///
///     cache.put("a", Bytes::from_static(b"alpha")).await;
///     cache.put("b", Bytes::from_static(b"beta")).await;
///     cache.put("c", Bytes::from_static(b"gamma")).await;
///
///     // "a" was least recently used
///     assert!(cache.get("a").await.is_none());
///     assert_eq!(cache.len().await, 2);
/// }
/// ```
pub struct BoundedCache<V: CacheValue> {
    name: String,
    index: Mutex<LruIndex<V>>,
    max_items: usize,
    max_bytes: usize,
    disk: Option<Arc<DiskShadow>>,
    pending_writes: Arc<PendingWrites>,
}

impl<V: CacheValue> BoundedCache<V> {
    /// Create a memory-only cache.
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            name: "cache".to_string(),
            index: Mutex::new(LruIndex::new()),
            max_items,
            max_bytes,
            disk: None,
            pending_writes: Arc::new(PendingWrites::default()),
        }
    }

    /// Build a cache from settings; attaches a disk tier when a directory is
    /// configured and the entry cap is non-zero.
    pub fn from_settings(name: impl Into<String>, settings: &CacheSettings) -> Self {
        let cache = Self::new(settings.max_items, settings.max_bytes).with_name(name);
        match (&settings.disk_dir, settings.max_disk_entries) {
            (Some(dir), entries) if entries > 0 => {
                cache.with_disk(DiskShadow::new(dir.clone(), entries))
            }
            _ => cache,
        }
    }

    /// Label used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a disk tier.
    pub fn with_disk(mut self, disk: DiskShadow) -> Self {
        self.disk = Some(Arc::new(disk));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn disk(&self) -> Option<&DiskShadow> {
        self.disk.as_deref()
    }

    /// Look up `key`, promoting it to most recently used.
    ///
    /// On a memory miss the disk tier is consulted; a disk hit is inserted
    /// back into memory (possibly evicting other entries) and returned.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let mut index = self.index.lock().await;
            if let Some(value) = index.entries.get(key) {
                return Some(value.clone());
            }
        }

        let value = self.load_from_disk(key).await?;
        let evicted = {
            let mut index = self.index.lock().await;
            // A put that landed during the disk load is newer than the disk copy
            if let Some(current) = index.entries.get(key) {
                return Some(current.clone());
            }
            index.insert(key.to_string(), value.clone(), self.max_items, self.max_bytes)
        };
        debug!(cache = %self.name, key = %key, evicted, "disk hit");
        Some(value)
    }

    /// Look up `key` in memory without touching recency or the disk tier.
    pub async fn peek(&self, key: &str) -> Option<V> {
        let index = self.index.lock().await;
        index.entries.peek(key).cloned()
    }

    /// Whether `key` is held in memory. Does not touch recency.
    pub async fn contains(&self, key: &str) -> bool {
        let index = self.index.lock().await;
        index.entries.contains(key)
    }

    /// Insert or replace `key`, evict to satisfy both ceilings, and schedule a
    /// background write to the disk tier.
    ///
    /// Empty values are ignored.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        if value.is_empty() {
            trace!(cache = %self.name, key = %key, "ignoring empty value");
            return;
        }

        let evicted = {
            let mut index = self.index.lock().await;
            index.insert(key.clone(), value.clone(), self.max_items, self.max_bytes)
        };
        if evicted > 0 {
            trace!(cache = %self.name, evicted, "evicted after insert");
        }

        if let Some(disk) = &self.disk {
            self.persist(Arc::clone(disk), key, value);
        }
    }

    /// Remove `key` from memory. The disk tier is left alone.
    pub async fn remove(&self, key: &str) -> Option<V> {
        let mut index = self.index.lock().await;
        index.remove(key)
    }

    /// Drop every in-memory entry. The disk tier is left alone.
    pub async fn clear(&self) {
        let mut index = self.index.lock().await;
        index.entries.clear();
        index.current_bytes = 0;
    }

    /// Number of in-memory entries.
    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.entries.is_empty()
    }

    /// Total bytes of in-memory entries.
    pub async fn size(&self) -> usize {
        self.index.lock().await.current_bytes
    }

    /// In-memory keys, most recently used first.
    pub async fn keys(&self) -> Vec<String> {
        let index = self.index.lock().await;
        index.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Wait until every disk write scheduled so far has finished.
    pub async fn flush_disk(&self) {
        loop {
            let idle = self.pending_writes.idle.notified();
            if self.pending_writes.count.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    async fn load_from_disk(&self, key: &str) -> Option<V> {
        let disk = Arc::clone(self.disk.as_ref()?);
        let owned = key.to_string();

        let loaded = tokio::task::spawn_blocking(move || -> Result<Option<V>, crate::error::CacheError> {
            match disk.load(&owned)? {
                Some(data) => V::from_disk(&data).map(Some),
                None => Ok(None),
            }
        })
        .await;

        match loaded {
            Ok(Ok(Some(value))) if !value.is_empty() => Some(value),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(cache = %self.name, key = %key, error = %e, "failed to load cache entry from disk");
                None
            }
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "disk load task failed");
                None
            }
        }
    }

    fn persist(&self, disk: Arc<DiskShadow>, key: String, value: V) {
        let guard = WriteGuard::begin(&self.pending_writes);
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let result = value
                .to_disk()
                .and_then(|data| disk.store(&key, &data))
                .and_then(|()| disk.prune());
            match result {
                Ok(0) => {}
                Ok(removed) => debug!(cache = %name, removed, "pruned disk cache"),
                Err(e) => warn!(cache = %name, key = %key, error = %e, "failed to persist cache entry"),
            }
        });
    }
}

impl<V: CacheValue> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("name", &self.name)
            .field("max_items", &self.max_items)
            .field("max_bytes", &self.max_bytes)
            .field("disk", &self.disk.as_ref().map(|d| d.root().to_path_buf()))
            .finish()
    }
}

// =============================================================================
// Image Caches
// =============================================================================

/// Cache of decoded images; used for both thumbnails and tiles.
pub type ImageCache = BoundedCache<DecodedImage>;

impl BoundedCache<DecodedImage> {
    /// Thumbnail/full-image cache with default ceilings and a disk tier at `disk_dir`.
    pub fn thumbnails(disk_dir: Option<PathBuf>) -> Self {
        Self::from_settings(
            "thumbs",
            &CacheSettings {
                max_items: DEFAULT_THUMB_MAX_ITEMS,
                max_bytes: DEFAULT_THUMB_MAX_BYTES,
                disk_dir,
                max_disk_entries: DEFAULT_THUMB_DISK_ENTRIES,
            },
        )
    }

    /// Memory-only tile cache with default ceilings.
    pub fn tiles() -> Self {
        Self::new(DEFAULT_TILE_MAX_ITEMS, DEFAULT_TILE_MAX_BYTES).with_name("tiles")
    }
}

// =============================================================================
// Tests
// =============================================================================
