//! # photocache
//!
//! Cache-and-prefetch pipeline for browsing large folders of photos.
//!
//! This library supplies thumbnails, full-resolution previews and zoomed or
//! panned tile views to a display surface with low latency and bounded
//! memory, adapting its I/O pattern to the backing storage (rotational or
//! solid-state).
//!
//! ## Features
//!
//! - **Two-tier caches**: LRU memory caches bounded by entry count and bytes,
//!   shadowed by a pruned on-disk PNG cache
//! - **Tile loading**: a single worker serving tiles by priority, with
//!   generation-based cancellation of stale work
//! - **Sequential reads**: one reader thread consuming files front to back,
//!   with a read-ahead cache for spinning disks
//! - **Prefetch**: bounded-concurrency warming of the neighbors of the
//!   current image
//!
//! ## Architecture
//!
//! - [`decode`] - Decode contract and the default `image`-based decoder
//! - [`cache`] - Bounded LRU caches with an optional disk tier
//! - [`io`] - Sequential single-worker file reader
//! - [`tile`] - Tile loader, viewport planning and the tiled view
//! - [`prefetch`] - Thumbnail loading and neighborhood prefetch
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use photocache::{DirectoryListing, ImageCache, ImageDecoder, Prefetcher};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let files = Arc::new(DirectoryListing::open("/photos")?);
//!     let thumbs = Arc::new(ImageCache::thumbnails(None));
//!     let prefetcher = Prefetcher::new(thumbs, Arc::new(ImageDecoder::new()), files, 8);
//!
//!     let report = prefetcher.prefetch_around(0, 20, 256).await.wait().await;
//!     println!("warmed {} thumbnails", report.warmed);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod io;
pub mod prefetch;
pub mod tile;

// Re-export commonly used types
pub use cache::{thumb_key, tile_key, BoundedCache, CacheValue, DiskShadow, ImageCache};
pub use config::{
    CacheSettings, CheckConfig, CheckOutputFormat, Cli, Command, DiskMode, PipelineArgs,
    PipelineConfig, StorageClass, TilesConfig, WarmConfig,
};
pub use decode::{Decode, DecodedImage, ImageDecoder};
pub use error::{CacheError, DecodeError, ReadError};
pub use io::SequentialReader;
pub use prefetch::{
    DirectoryListing, FileList, ImageReady, PrefetchBatch, PrefetchReport, Prefetcher,
};
pub use tile::{
    EnqueueSummary, TileLoader, TileRange, TileReady, TileRequest, TiledView, Viewport,
};
