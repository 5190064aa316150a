//! Two-tier cache integration tests.
//!
//! Tests verify:
//! - Evicted entries come back from the disk tier
//! - Persisted entries survive the cache instance that wrote them
//! - The disk tier stays within its entry cap
//! - Concurrent writers keep the memory ceilings and byte accounting intact

use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use photocache::cache::{thumb_key, tile_key, BoundedCache, DiskShadow, ImageCache};
use photocache::decode::DecodedImage;

use super::test_utils::gradient;

fn image(width: u32, height: u32) -> DecodedImage {
    DecodedImage::new(gradient(width, height))
}

// =============================================================================
// Disk Tier
// =============================================================================

#[tokio::test]
async fn test_tile_cache_of_two_restores_evicted_tile_from_disk() {
    let dir = TempDir::new().unwrap();
    let cache = ImageCache::new(2, 64 * 1024 * 1024).with_disk(DiskShadow::new(dir.path(), 100));

    let path = std::path::Path::new("/photos/big.jpg");
    let t0 = tile_key(path, 0, 0, 0);
    let t1 = tile_key(path, 0, 1, 0);
    let t2 = tile_key(path, 0, 2, 0);

    let first = image(64, 48);
    cache.put(t0.clone(), first.clone()).await;
    cache.put(t1.clone(), image(64, 48)).await;
    cache.put(t2.clone(), image(32, 48)).await;
    cache.flush_disk().await;

    assert!(!cache.contains(&t0).await);
    assert_eq!(cache.len().await, 2);

    // Lossless round trip through the PNG disk tier
    let restored = cache.get(&t0).await.unwrap();
    assert_eq!(restored, first);

    // Re-inserted as most recent; t1 was the coldest
    assert_eq!(cache.keys().await, vec![t0, t2]);
    assert!(!cache.contains(&t1).await);
}

#[tokio::test]
async fn test_disk_entries_survive_cache_instance() {
    let dir = TempDir::new().unwrap();
    let key = thumb_key(std::path::Path::new("/photos/a.jpg"), 256);
    let thumb = image(256, 171);

    {
        let writer = ImageCache::new(10, 1 << 26).with_disk(DiskShadow::new(dir.path(), 10));
        writer.put(key.clone(), thumb.clone()).await;
        writer.flush_disk().await;
    }

    let reader = ImageCache::new(10, 1 << 26).with_disk(DiskShadow::new(dir.path(), 10));
    assert!(!reader.contains(&key).await);
    assert_eq!(reader.get(&key).await, Some(thumb));
    assert!(reader.contains(&key).await);
}

#[tokio::test]
async fn test_disk_tier_capped_independently_of_memory() {
    let dir = TempDir::new().unwrap();
    let cache = ImageCache::new(100, 1 << 26).with_disk(DiskShadow::new(dir.path(), 3));

    for i in 0..10 {
        cache.put(format!("key-{}", i), image(8, 8)).await;
        cache.flush_disk().await;
    }

    assert_eq!(cache.len().await, 10);
    assert_eq!(cache.disk().unwrap().entry_count().unwrap(), 3);
}

#[tokio::test]
async fn test_thumbnail_defaults() {
    let dir = TempDir::new().unwrap();
    let thumbs = ImageCache::thumbnails(Some(dir.path().to_path_buf()));
    assert_eq!(thumbs.max_items(), 512);
    assert_eq!(thumbs.max_bytes(), 512 * 1024 * 1024);
    assert_eq!(thumbs.disk().unwrap().max_entries(), 5000);

    let tiles = ImageCache::tiles();
    assert_eq!(tiles.max_items(), 256);
    assert!(tiles.disk().is_none());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_keep_ceilings() {
    let cache: Arc<BoundedCache<Bytes>> = Arc::new(BoundedCache::new(20, 10_000));

    let mut handles = Vec::new();
    for writer in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let key = format!("w{}-{}", writer, i % 30);
                cache.put(key.clone(), Bytes::from(vec![1u8; 100 + i * 13])).await;
                cache.get(&format!("w{}-{}", (writer + 1) % 8, i % 30)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(cache.len().await <= 20);
    assert!(cache.size().await <= 10_000);

    let mut sum = 0;
    for key in cache.keys().await {
        sum += cache.peek(&key).await.unwrap().len();
    }
    assert_eq!(sum, cache.size().await);
}
