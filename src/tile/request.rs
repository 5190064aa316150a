//! Tile request and event types.

use std::path::{Path, PathBuf};

use crate::cache::tile_key;
use crate::decode::DecodedImage;

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one tile of one pyramid level of an image.
///
/// Level `n` is the full image scaled by `1 / 2^n`, each dimension rounded up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Source image
    pub path: PathBuf,

    /// Full-resolution image size `(width, height)`
    pub full_size: (u32, u32),

    /// Pyramid level (0 = full resolution)
    pub level: u32,

    /// Tile column
    pub tile_x: u32,

    /// Tile row
    pub tile_y: u32,

    /// Tile edge length in level pixels
    pub tile_size: u32,

    /// Scheduling priority; lower is served first
    pub priority: u32,
}

impl TileRequest {
    /// Create a request with priority 0.
    pub fn new(
        path: impl Into<PathBuf>,
        full_size: (u32, u32),
        level: u32,
        tile_x: u32,
        tile_y: u32,
        tile_size: u32,
    ) -> Self {
        Self {
            path: path.into(),
            full_size,
            level,
            tile_x,
            tile_y,
            tile_size,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache key of the tile. Identical requests always produce the same key.
    pub fn key(&self) -> String {
        tile_key(&self.path, self.level, self.tile_x, self.tile_y)
    }
}

// =============================================================================
// Tile Ready
// =============================================================================

/// Emitted by the loader when a tile is available.
///
/// Consumers must ignore events whose generation is not the one they
/// scheduled with.
#[derive(Debug, Clone)]
pub struct TileReady {
    pub key: String,
    pub image: DecodedImage,
    pub generation: u64,
}

// =============================================================================
// Enqueue Summary
// =============================================================================

/// What happened to a batch passed to
/// [`TileLoader::enqueue_visible`](super::TileLoader::enqueue_visible).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    /// Served straight from the cache and emitted immediately
    pub served: usize,

    /// Added to the pending queue
    pub queued: usize,

    /// Already pending for the same generation
    pub duplicates: usize,

    /// Discarded because the batch's generation was no longer current
    pub stale: usize,
}

impl EnqueueSummary {
    /// Total requests accounted for.
    pub fn total(&self) -> usize {
        self.served + self.queued + self.duplicates + self.stale
    }
}
