//! Tile loader and tiled view integration tests.
//!
//! Tests verify:
//! - Tiles are served in ascending priority order
//! - Cancelled work is never emitted, even when it finishes
//! - Pending requests are deduplicated within a generation
//! - A two-entry tile cache serves an evicted tile from its disk tier
//! - A batch cancelled while it waits on the disk tier emits nothing
//! - The tiled view schedules, accepts and resets correctly on real images

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use photocache::cache::{DiskShadow, ImageCache};
use photocache::config::StorageClass;
use photocache::decode::{Decode, DecodedImage, ImageDecoder};
use photocache::error::DecodeError;
use photocache::tile::{TileLoader, TileReady, TileRequest, TiledView, Viewport};

use super::test_utils::{gradient, wait_until, write_png, CountingDecoder};

const WAIT: Duration = Duration::from_secs(5);

fn tile_cache() -> Arc<ImageCache> {
    Arc::new(ImageCache::new(64, 64 * 1024 * 1024))
}

async fn recv(events: &mut mpsc::UnboundedReceiver<TileReady>) -> TileReady {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for tile")
        .expect("loader closed")
}

// =============================================================================
// Gated Decoder
// =============================================================================

/// Blocks every decode until the test releases it.
struct GateDecoder {
    entered: Mutex<std_mpsc::Sender<PathBuf>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

struct Gate {
    entered: std_mpsc::Receiver<PathBuf>,
    release: std_mpsc::Sender<()>,
}

impl Gate {
    /// Wait until a decode has started; returns its path.
    async fn entered(&self) -> PathBuf {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(path) = self.entered.try_recv() {
                    return path;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("decode never started")
    }

    fn release(&self) {
        self.release.send(()).unwrap();
    }
}

fn gated() -> (GateDecoder, Gate) {
    let (entered_tx, entered_rx) = std_mpsc::channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    (
        GateDecoder {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        },
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

impl Decode for GateDecoder {
    fn decode(&self, path: &Path, max_edge: u32) -> Result<DecodedImage, DecodeError> {
        self.entered.lock().unwrap().send(path.to_path_buf()).unwrap();
        self.release
            .lock()
            .unwrap()
            .recv_timeout(WAIT)
            .map_err(|e| DecodeError::Aborted {
                message: e.to_string(),
            })?;
        let edge = if max_edge == 0 { 512 } else { max_edge.min(512) };
        Ok(DecodedImage::new(gradient(edge, edge)))
    }

    fn dimensions(&self, _path: &Path) -> Result<(u32, u32), DecodeError> {
        Ok((512, 512))
    }
}

fn request(path: &str, tile_x: u32, priority: u32) -> TileRequest {
    TileRequest::new(path, (1024, 256), 0, tile_x, 0, 256).with_priority(priority)
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test]
async fn test_tiles_served_in_priority_order() {
    let decoder = Arc::new(CountingDecoder::new((1024, 256)));
    let (loader, mut events) =
        TileLoader::spawn(tile_cache(), Arc::clone(&decoder), StorageClass::SolidState);

    let batch = vec![
        request("/a.jpg", 0, 3),
        request("/a.jpg", 1, 1),
        request("/a.jpg", 2, 0),
        request("/a.jpg", 3, 2),
    ];
    let summary = loader.enqueue_visible(batch.clone(), 0).await;
    assert_eq!(summary.queued, 4);

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(recv(&mut events).await.key);
    }
    assert_eq!(
        order,
        vec![batch[2].key(), batch[1].key(), batch[3].key(), batch[0].key()]
    );
    assert_eq!(decoder.calls(), 4);
}

#[tokio::test]
async fn test_request_tile_appends_without_sorting() {
    let (decoder, gate) = gated();
    let (loader, mut events) = TileLoader::spawn(tile_cache(), Arc::new(decoder), StorageClass::Rotational);

    // Occupy the worker so the following requests stay queued
    loader.request_tile(request("/busy.jpg", 0, 0), 0).await;
    gate.entered().await;

    loader.request_tile(request("/b.jpg", 0, 9), 0).await;
    loader.request_tile(request("/b.jpg", 1, 1), 0).await;
    assert_eq!(loader.pending().await, 2);

    for _ in 0..3 {
        gate.release();
    }
    let keys: Vec<_> = [recv(&mut events).await, recv(&mut events).await, recv(&mut events).await]
        .into_iter()
        .map(|ready| ready.key)
        .collect();
    assert_eq!(
        keys,
        vec![
            request("/busy.jpg", 0, 0).key(),
            request("/b.jpg", 0, 9).key(),
            request("/b.jpg", 1, 1).key(),
        ]
    );
}

#[tokio::test]
async fn test_pending_requests_deduplicated() {
    let (decoder, gate) = gated();
    let (loader, _events) = TileLoader::spawn(tile_cache(), Arc::new(decoder), StorageClass::Rotational);

    loader.request_tile(request("/busy.jpg", 0, 0), 0).await;
    gate.entered().await;

    let summary = loader
        .enqueue_visible(
            vec![request("/a.jpg", 0, 0), request("/a.jpg", 0, 0), request("/a.jpg", 1, 1)],
            0,
        )
        .await;
    assert_eq!(summary.queued, 2);
    assert_eq!(summary.duplicates, 1);

    let summary = loader.enqueue_visible(vec![request("/a.jpg", 1, 1)], 0).await;
    assert_eq!(summary.duplicates, 1);
    assert_eq!(loader.pending().await, 2);

    loader.cancel_all().await;
    gate.release();
    assert!(loader.shutdown(WAIT).await);
}

// =============================================================================
// Generation Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_tile_is_cached_but_not_emitted() {
    let cache = tile_cache();
    let (decoder, gate) = gated();
    let (loader, mut events) =
        TileLoader::spawn(Arc::clone(&cache), Arc::new(decoder), StorageClass::Rotational);

    let tile = request("/a.jpg", 1, 0);
    let key = tile.key();
    assert!(loader.request_tile(tile, 0).await);
    gate.entered().await;

    assert_eq!(loader.cancel_all().await, 1);
    gate.release();

    let (cache_ref, key_ref) = (&cache, key.as_str());
    assert!(wait_until(WAIT, move || async move { cache_ref.contains(key_ref).await }).await);

    // The worker has finished with the tile once it has stopped
    assert!(loader.shutdown(WAIT).await);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_cancel_all_clears_queue() {
    let (decoder, gate) = gated();
    let decoder = Arc::new(decoder);
    let (loader, mut events) = TileLoader::spawn(tile_cache(), decoder, StorageClass::Rotational);

    loader.request_tile(request("/busy.jpg", 0, 0), 0).await;
    gate.entered().await;
    loader.request_tile(request("/a.jpg", 0, 0), 0).await;
    loader.request_tile(request("/a.jpg", 1, 0), 0).await;
    assert_eq!(loader.pending().await, 2);

    let generation = loader.cancel_all().await;
    assert_eq!(loader.pending().await, 0);
    gate.release();

    // New work under the new generation still flows
    loader.request_tile(request("/c.jpg", 0, 0), generation).await;
    let started = gate.entered().await;
    assert_eq!(started, PathBuf::from("/c.jpg"));
    gate.release();

    let ready = recv(&mut events).await;
    assert_eq!(ready.generation, generation);
    assert_eq!(ready.key, request("/c.jpg", 0, 0).key());
}

// =============================================================================
// Cache Interplay
// =============================================================================

#[tokio::test]
async fn test_two_entry_tile_cache_with_disk_shadow() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(
        ImageCache::new(2, 64 * 1024 * 1024).with_disk(DiskShadow::new(dir.path(), 50)),
    );
    let decoder = Arc::new(CountingDecoder::new((768, 256)));
    let (loader, mut events) =
        TileLoader::spawn(Arc::clone(&cache), Arc::clone(&decoder), StorageClass::SolidState);

    let tiles: Vec<_> = (0..3)
        .map(|x| TileRequest::new("/wide.jpg", (768, 256), 0, x, 0, 256).with_priority(x))
        .collect();
    loader.enqueue_visible(tiles.clone(), 0).await;
    for _ in 0..3 {
        recv(&mut events).await;
    }
    assert_eq!(decoder.calls(), 3);

    cache.flush_disk().await;
    assert_eq!(cache.len().await, 2);
    assert!(!cache.contains(&tiles[0].key()).await);

    // The evicted tile comes back from disk without another decode
    let summary = loader.enqueue_visible(vec![tiles[0].clone()], 0).await;
    assert_eq!(summary.served, 1);
    let ready = recv(&mut events).await;
    assert_eq!(ready.key, tiles[0].key());
    assert_eq!(ready.image.dimensions(), (256, 256));
    assert_eq!(decoder.calls(), 3);
}

#[tokio::test]
async fn test_cancel_during_disk_lookup_emits_nothing() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(
        ImageCache::new(1, 64 * 1024 * 1024).with_disk(DiskShadow::new(dir.path(), 50)),
    );
    let decoder = Arc::new(CountingDecoder::new((512, 256)));
    let (loader, mut events) =
        TileLoader::spawn(Arc::clone(&cache), Arc::clone(&decoder), StorageClass::SolidState);
    let loader = Arc::new(loader);

    // Tile 0 only on disk, tile 1 in memory
    let tiles: Vec<_> = (0..2)
        .map(|x| TileRequest::new("/a.jpg", (512, 256), 0, x, 0, 256).with_priority(x))
        .collect();
    for tile in &tiles {
        cache
            .put(tile.key(), DecodedImage::new(gradient(256, 256)))
            .await;
        cache.flush_disk().await;
    }
    assert!(!cache.contains(&tiles[0].key()).await);

    let batch = {
        let loader = Arc::clone(&loader);
        let tiles = tiles.clone();
        tokio::spawn(async move { loader.enqueue_visible(tiles, 0).await })
    };
    // The batch is now waiting on the disk load for tile 0
    tokio::task::yield_now().await;
    assert_eq!(loader.cancel_all().await, 1);

    let summary = batch.await.unwrap();
    assert_eq!(summary.served, 0);
    assert_eq!(summary.stale, 2);
    assert_eq!(loader.pending().await, 0);
    assert!(events.try_recv().is_err());
    assert_eq!(decoder.calls(), 0);
    assert!(loader.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_failed_tile_is_dropped() {
    let decoder = Arc::new(CountingDecoder::new((512, 512)).failing("/broken.jpg"));
    let (loader, mut events) = TileLoader::spawn(tile_cache(), decoder, StorageClass::SolidState);

    loader
        .enqueue_visible(
            vec![
                TileRequest::new("/broken.jpg", (512, 512), 0, 0, 0, 256),
                TileRequest::new("/fine.jpg", (512, 512), 0, 0, 0, 256).with_priority(1),
            ],
            0,
        )
        .await;

    let ready = recv(&mut events).await;
    assert_eq!(ready.key, "/fine.jpg|0|0|0");
}

// =============================================================================
// Tiled View
// =============================================================================

#[tokio::test]
async fn test_tiled_view_loads_real_image() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "photo.png", 600, 400);

    let (loader, mut events) =
        TileLoader::spawn(tile_cache(), Arc::new(ImageDecoder::new()), StorageClass::SolidState);
    let mut view = TiledView::new(&loader, Viewport::new(600.0, 400.0));

    let summary = view.set_source(&path).await.unwrap();
    assert_eq!(view.full_size(), Some((600, 400)));
    assert_eq!(view.level(), 0);
    assert_eq!(summary.queued, 6);

    while view.tile_count() < 6 {
        let ready = recv(&mut events).await;
        assert!(view.accept(ready));
    }
    assert_eq!(view.tile(2, 1).unwrap().dimensions(), (88, 144));
    assert_eq!(view.tile(0, 0).unwrap().dimensions(), (256, 256));

    // Everything visible at 2x is already held
    let summary = view.set_zoom(2.0).await;
    assert_eq!(summary.total(), 0);
}

#[tokio::test]
async fn test_tiled_view_rejects_other_generations() {
    let decoder = Arc::new(CountingDecoder::new((2048, 2048)));
    let (loader, _events) = TileLoader::spawn(tile_cache(), decoder, StorageClass::SolidState);
    let mut view = TiledView::new(&loader, Viewport::new(512.0, 512.0));

    view.set_source("/big.jpg").await.unwrap();
    assert_eq!(view.level(), 2);
    let current = view.generation();

    let stale = TileReady {
        key: "/big.jpg|2|0|0".to_string(),
        image: DecodedImage::new(gradient(4, 4)),
        generation: current - 1,
    };
    assert!(!view.accept(stale.clone()));

    // A new source resets the generation and drops held tiles
    assert!(view.accept(TileReady {
        generation: current,
        ..stale
    }));
    assert_eq!(view.tile_count(), 1);
    view.set_source("/other.jpg").await.unwrap();
    assert!(view.generation() > current);
    assert_eq!(view.tile_count(), 0);
}

#[tokio::test]
async fn test_tiled_view_probe_failure() {
    let decoder = Arc::new(CountingDecoder::new((64, 64)).failing("/missing.jpg"));
    let (loader, _events) = TileLoader::spawn(tile_cache(), decoder, StorageClass::SolidState);
    let mut view = TiledView::new(&loader, Viewport::new(100.0, 100.0));

    assert!(view.set_source("/missing.jpg").await.is_err());
    assert_eq!(view.full_size(), None);
    assert_eq!(view.tile_count(), 0);
}
