//! Prefetch coordinator integration tests.
//!
//! Tests verify:
//! - The prefetch window is clamped to the file list and skips cached entries
//! - Concurrent decodes never exceed the configured thread count
//! - Thumbnails are decoded once and then served from the cache
//! - Progressive loading emits a preview before the final image
//! - Read-ahead on rotational storage feeds the real decoder

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use photocache::cache::{thumb_key, ImageCache};
use photocache::decode::ImageDecoder;
use photocache::error::DecodeError;
use photocache::io::SequentialReader;
use photocache::prefetch::{DirectoryListing, FileList, Prefetcher};

use super::test_utils::{fake_paths, write_png, CountingDecoder};

fn thumbs() -> Arc<ImageCache> {
    Arc::new(ImageCache::new(512, 256 * 1024 * 1024))
}

// =============================================================================
// Prefetch Window
// =============================================================================

#[tokio::test]
async fn test_prefetch_around_warms_window() {
    let files = Arc::new(fake_paths(10));
    let cache = thumbs();
    let decoder = Arc::new(CountingDecoder::new((400, 300)));
    let prefetcher = Prefetcher::new(Arc::clone(&cache), Arc::clone(&decoder), Arc::clone(&files), 4);

    let batch = prefetcher.prefetch_around(1, 3, 64).await;
    assert_eq!(batch.issued(), 5);
    let report = batch.wait().await;
    assert_eq!(report.warmed, 5);
    assert_eq!(report.failed, 0);

    for path in &files[0..5] {
        let thumb = cache.peek(&thumb_key(path, 64)).await.unwrap();
        assert_eq!(thumb.dimensions(), (64, 48));
    }
    assert!(!cache.contains(&thumb_key(&files[5], 64)).await);

    // Everything in the window is now cached
    let report = prefetcher.prefetch_around(1, 3, 64).await.wait().await;
    assert_eq!(report.issued, 0);
    assert_eq!(report.skipped, 5);
    assert_eq!(decoder.calls(), 5);
}

#[tokio::test]
async fn test_prefetch_window_clamped_to_list() {
    let files = Arc::new(fake_paths(10));
    let decoder = Arc::new(CountingDecoder::new((100, 100)));
    let prefetcher = Prefetcher::new(thumbs(), Arc::clone(&decoder), files, 4);

    let report = prefetcher.prefetch_around(9, 5, 32).await.wait().await;
    assert_eq!(report.issued, 6);

    let report = prefetcher.prefetch_around(50, 2, 32).await.wait().await;
    assert_eq!(report.issued, 0);
    assert_eq!(report.skipped, 0);

    let empty = Prefetcher::new(thumbs(), decoder, Arc::new(Vec::<PathBuf>::new()), 1);
    assert_eq!(empty.prefetch_around(0, 10, 32).await.issued(), 0);
}

#[tokio::test]
async fn test_prefetch_reports_failures() {
    let files = fake_paths(3);
    let decoder = Arc::new(CountingDecoder::new((100, 100)).failing(files[1].clone()));
    let prefetcher = Prefetcher::new(thumbs(), decoder, Arc::new(files), 2);

    let report = prefetcher.prefetch_around(1, 1, 32).await.wait().await;
    assert_eq!(report.issued, 3);
    assert_eq!(report.warmed, 2);
    assert_eq!(report.failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decode_concurrency_bounded() {
    let files = Arc::new(fake_paths(12));
    let decoder = Arc::new(CountingDecoder::new((64, 64)).with_delay(Duration::from_millis(20)));
    let prefetcher = Prefetcher::new(thumbs(), Arc::clone(&decoder), files, 2);
    assert_eq!(prefetcher.decode_threads(), 2);

    let report = prefetcher.prefetch_around(6, 6, 32).await.wait().await;
    assert_eq!(report.warmed, 12);
    assert!(decoder.peak_concurrency() <= 2);
    assert!(decoder.peak_concurrency() >= 1);
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_load_decodes_once() {
    let decoder = Arc::new(CountingDecoder::new((1000, 500)));
    let prefetcher = Prefetcher::new(thumbs(), Arc::clone(&decoder), Arc::new(fake_paths(1)), 2);

    let first = prefetcher.load("/photos/a.jpg", 200).await.unwrap();
    let second = prefetcher.load("/photos/a.jpg", 200).await.unwrap();
    assert_eq!(first.dimensions(), (200, 100));
    assert_eq!(first, second);
    assert_eq!(decoder.calls_for("/photos/a.jpg"), 1);

    // Edge 0 is the full image, cached under its own key
    let full = prefetcher.load("/photos/a.jpg", 0).await.unwrap();
    assert_eq!(full.dimensions(), (1000, 500));
    assert_eq!(decoder.calls_for("/photos/a.jpg"), 2);
}

#[tokio::test]
async fn test_load_errors() {
    let decoder = Arc::new(CountingDecoder::new((10, 10)).failing("/photos/bad.jpg"));
    let prefetcher = Prefetcher::new(thumbs(), decoder, Arc::new(fake_paths(1)), 2);

    assert!(matches!(
        prefetcher.load("", 64).await,
        Err(DecodeError::EmptyPath)
    ));
    assert!(matches!(
        prefetcher.load("/photos/bad.jpg", 64).await,
        Err(DecodeError::Decode { .. })
    ));
}

#[tokio::test]
async fn test_load_by_id() {
    let decoder = Arc::new(CountingDecoder::new((300, 300)));
    let prefetcher = Prefetcher::new(thumbs(), decoder, Arc::new(fake_paths(1)), 2);

    let thumb = prefetcher.load_id("128//photos/a.jpg").await.unwrap();
    assert_eq!(thumb.dimensions(), (128, 128));
    let full = prefetcher.load_id("full//photos/a.jpg").await.unwrap();
    assert_eq!(full.dimensions(), (300, 300));
    assert!(prefetcher.load_id("garbage").await.is_err());
}

#[tokio::test]
async fn test_progressive_load_emits_preview_first() {
    let decoder = Arc::new(CountingDecoder::new((800, 600)));
    let prefetcher = Prefetcher::new(thumbs(), Arc::clone(&decoder), Arc::new(fake_paths(1)), 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let image = prefetcher
        .load_progressive("/photos/a.jpg", 256, &tx)
        .await
        .unwrap();
    assert_eq!(image.dimensions(), (256, 192));

    let preview = rx.try_recv().unwrap();
    assert!(preview.preview);
    assert_eq!(preview.edge, 96);
    assert_eq!(preview.image.dimensions(), (96, 72));

    let last = rx.try_recv().unwrap();
    assert!(!last.preview);
    assert_eq!(last.edge, 256);
    assert!(rx.try_recv().is_err());

    // Cached: only the final image, no preview pass
    prefetcher
        .load_progressive("/photos/a.jpg", 256, &tx)
        .await
        .unwrap();
    assert!(!rx.try_recv().unwrap().preview);
    assert!(rx.try_recv().is_err());
    assert_eq!(decoder.calls(), 2);
}

#[tokio::test]
async fn test_small_progressive_load_skips_preview() {
    let decoder = Arc::new(CountingDecoder::new((800, 600)));
    let prefetcher = Prefetcher::new(thumbs(), Arc::clone(&decoder), Arc::new(fake_paths(1)), 2);
    let (tx, mut rx) = mpsc::unbounded_channel();

    prefetcher.load_progressive("/photos/a.jpg", 48, &tx).await.unwrap();
    assert!(!rx.try_recv().unwrap().preview);
    assert!(rx.try_recv().is_err());
    assert_eq!(decoder.calls(), 1);
}

// =============================================================================
// Rotational Storage
// =============================================================================

#[tokio::test]
async fn test_read_ahead_with_real_images() {
    let dir = TempDir::new().unwrap();
    for i in 0..4 {
        write_png(dir.path(), &format!("img_{}.png", i), 120, 90);
    }
    std::fs::write(dir.path().join("readme.txt"), b"not an image").unwrap();

    let files = Arc::new(DirectoryListing::open(dir.path()).unwrap());
    assert_eq!(files.len(), 4);

    let reader = Arc::new(SequentialReader::new());
    let decoder = Arc::new(ImageDecoder::with_sequential_reader(Arc::clone(&reader)));
    let cache = thumbs();
    let prefetcher = Prefetcher::new(Arc::clone(&cache), decoder, Arc::clone(&files), 2)
        .with_read_ahead(Arc::clone(&reader), 1 << 20);

    let report = prefetcher.prefetch_around(0, 10, 60).await.wait().await;
    assert_eq!(report.warmed, 4);
    for path in files.paths() {
        let thumb = cache.peek(&thumb_key(&path, 60)).await.unwrap();
        assert_eq!(thumb.dimensions(), (60, 45));
    }
}
