//! Sequential reader integration tests.
//!
//! Tests verify:
//! - The default decoder can pull file bytes through the reader
//! - Read-ahead results are consumed once by the decoder
//! - Reads fail cleanly after shutdown

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use photocache::decode::{Decode, ImageDecoder};
use photocache::error::{DecodeError, ReadError};
use photocache::io::SequentialReader;

use super::test_utils::write_png;

#[tokio::test]
async fn test_decoder_reads_through_sequential_reader() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "a.png", 320, 200);

    let reader = Arc::new(SequentialReader::new());
    let decoder = ImageDecoder::with_sequential_reader(Arc::clone(&reader));
    assert!(decoder.is_sequential());

    let image = tokio::task::spawn_blocking(move || decoder.decode(&path, 160))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(image.dimensions(), (160, 100));
}

#[tokio::test]
async fn test_decoder_consumes_read_ahead() {
    let dir = TempDir::new().unwrap();
    let a = write_png(dir.path(), "a.png", 64, 64);
    let b = write_png(dir.path(), "b.png", 32, 16);

    let reader = Arc::new(SequentialReader::new());
    assert_eq!(reader.prefetch_files([&a, &b], 1 << 20), 2);
    // FIFO: once this read returns, both files are retained
    reader.read_file(dir.path().join("missing.png")).await.unwrap();
    assert_eq!(reader.retained_len(), 2);

    let decoder = ImageDecoder::with_sequential_reader(Arc::clone(&reader));
    let source = b.clone();
    let image = tokio::task::spawn_blocking(move || decoder.decode(&source, 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(image.dimensions(), (32, 16));
    assert!(!reader.is_retained(&b));
    assert!(reader.is_retained(&a));
}

#[tokio::test]
async fn test_unreadable_file_through_reader() {
    let reader = Arc::new(SequentialReader::new());
    let decoder = ImageDecoder::with_sequential_reader(reader);

    let err = tokio::task::spawn_blocking(move || decoder.decode("/nonexistent/x.png".as_ref(), 64))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DecodeError::Unreadable { .. }));
}

#[tokio::test]
async fn test_reads_fail_after_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);

    let reader = SequentialReader::new();
    assert!(reader.shutdown(Duration::from_secs(2)));

    assert_eq!(reader.read_file(&path).await, Err(ReadError::Shutdown));
    assert_eq!(reader.prefetch_files([&path], 1 << 20), 0);

    let decoder = ImageDecoder::with_sequential_reader(Arc::new(reader));
    let err = tokio::task::spawn_blocking(move || decoder.decode(&path, 8))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DecodeError::Open { .. }));
}
