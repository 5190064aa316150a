//! Configuration management for photocache.
//!
//! This module provides:
//! - Command-line arguments via clap, with one subcommand per tool
//! - Environment variables with `PHOTOCACHE_` prefix
//! - A plain [`PipelineConfig`] that the library consumes, resolved from the
//!   arguments so that nothing below the binary depends on clap
//!
//! # Example
//!
//! ```ignore
//! use photocache::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.into_command() {
//!     Command::Warm(config) => println!("warming {}", config.dir.display()),
//!     _ => {}
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `PHOTOCACHE_DISK_MODE` - Storage class: auto, hdd, ssd (default: auto)
//! - `PHOTOCACHE_DECODE_THREADS` - Concurrent decodes (default: by storage class)
//! - `PHOTOCACHE_THUMB_CACHE_ITEMS` - Max thumbnails in memory (default: 512)
//! - `PHOTOCACHE_THUMB_CACHE_BYTES` - Max thumbnail bytes in memory (default: 512MB)
//! - `PHOTOCACHE_THUMB_DISK_DIR` - Thumbnail disk cache (default: `<tmp>/photocache/thumbs`)
//! - `PHOTOCACHE_THUMB_DISK_ENTRIES` - Max persisted thumbnails (default: 5000)
//! - `PHOTOCACHE_TILE_CACHE_ITEMS` - Max tiles in memory (default: 256)
//! - `PHOTOCACHE_TILE_CACHE_BYTES` - Max tile bytes in memory (default: 256MB)
//! - `PHOTOCACHE_TILE_DISK_DIR` - Tile disk cache (default: none)
//! - `PHOTOCACHE_TILE_DISK_ENTRIES` - Max persisted tiles (default: 0, disabled)
//! - `PHOTOCACHE_PREFETCH_BUDGET` - Read-ahead budget on HDDs (default: 32MB)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::cache::{
    DEFAULT_THUMB_DISK_ENTRIES, DEFAULT_THUMB_MAX_BYTES, DEFAULT_THUMB_MAX_ITEMS,
    DEFAULT_TILE_MAX_BYTES, DEFAULT_TILE_MAX_ITEMS,
};
use crate::io::DEFAULT_PREFETCH_BUDGET;
use crate::tile::DEFAULT_TILE_SIZE;

// =============================================================================
// Default Values
// =============================================================================

/// Decode threads on rotational storage.
pub const DEFAULT_HDD_DECODE_THREADS: usize = 2;

/// Lower bound on decode threads on solid-state storage.
pub const MIN_SSD_DECODE_THREADS: usize = 8;

/// Default persisted tile count: the tile disk tier is off unless asked for.
pub const DEFAULT_TILE_DISK_ENTRIES: usize = 0;

/// Default thumbnail edge for `warm`.
pub const DEFAULT_THUMB_EDGE: u32 = 256;

/// Default prefetch radius for `warm`.
pub const DEFAULT_PREFETCH_RADIUS: usize = 20;

/// Default viewport for `tiles`.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 800;

/// Default thumbnail disk cache: `<tmp>/photocache/thumbs`.
pub fn default_thumb_disk_dir() -> PathBuf {
    std::env::temp_dir().join("photocache").join("thumbs")
}

// =============================================================================
// Storage Class
// =============================================================================

/// Backing storage medium, which drives I/O strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageClass {
    /// Spinning disk: few concurrent readers, sequential read-ahead
    Rotational,
    /// SSD/NVMe: many concurrent readers, exact-size decodes
    SolidState,
}

impl StorageClass {
    pub fn is_rotational(self) -> bool {
        self == StorageClass::Rotational
    }

    /// Decode threads to use when none are configured.
    pub fn default_decode_threads(self) -> usize {
        match self {
            StorageClass::Rotational => DEFAULT_HDD_DECODE_THREADS,
            StorageClass::SolidState => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(MIN_SSD_DECODE_THREADS),
        }
    }
}

/// Storage class as chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiskMode {
    /// No detection is performed: treated as solid-state
    #[default]
    Auto,
    /// Rotational disk
    Hdd,
    /// Solid-state disk
    Ssd,
}

impl DiskMode {
    pub fn storage_class(self) -> StorageClass {
        match self {
            DiskMode::Hdd => StorageClass::Rotational,
            DiskMode::Auto | DiskMode::Ssd => StorageClass::SolidState,
        }
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Ceilings and disk tier of one cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSettings {
    pub max_items: usize,
    pub max_bytes: usize,
    /// Disk tier directory; `None` keeps the cache memory-only
    pub disk_dir: Option<PathBuf>,
    /// Disk tier entry cap; 0 disables the disk tier
    pub max_disk_entries: usize,
}

impl CacheSettings {
    /// Whether a disk tier will be attached.
    pub fn has_disk(&self) -> bool {
        self.disk_dir.is_some() && self.max_disk_entries > 0
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_items == 0 {
            return Err(format!("{name} cache items must be greater than 0"));
        }
        if self.max_bytes == 0 {
            return Err(format!("{name} cache bytes must be greater than 0"));
        }
        if self.max_disk_entries > 0 && self.disk_dir.is_none() {
            return Err(format!(
                "{name} disk entries set to {} but no {name} disk directory given",
                self.max_disk_entries
            ));
        }
        Ok(())
    }
}

/// Everything the pipeline needs, independent of how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    pub storage: StorageClass,
    pub decode_threads: usize,
    pub thumbs: CacheSettings,
    pub tiles: CacheSettings,
    /// Read-ahead budget of the sequential reader (rotational storage only)
    pub prefetch_budget: usize,
}

impl PipelineConfig {
    /// Defaults for `storage`.
    pub fn new(storage: StorageClass) -> Self {
        Self {
            storage,
            decode_threads: storage.default_decode_threads(),
            thumbs: CacheSettings {
                max_items: DEFAULT_THUMB_MAX_ITEMS,
                max_bytes: DEFAULT_THUMB_MAX_BYTES,
                disk_dir: Some(default_thumb_disk_dir()),
                max_disk_entries: DEFAULT_THUMB_DISK_ENTRIES,
            },
            tiles: CacheSettings {
                max_items: DEFAULT_TILE_MAX_ITEMS,
                max_bytes: DEFAULT_TILE_MAX_BYTES,
                disk_dir: None,
                max_disk_entries: DEFAULT_TILE_DISK_ENTRIES,
            },
            prefetch_budget: DEFAULT_PREFETCH_BUDGET,
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.decode_threads == 0 {
            return Err("decode_threads must be greater than 0".to_string());
        }
        self.thumbs.validate("thumbnail")?;
        self.tiles.validate("tile")?;
        if self.storage.is_rotational() && self.prefetch_budget == 0 {
            return Err("prefetch_budget must be greater than 0 on rotational storage".to_string());
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(DiskMode::Auto.storage_class())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// photocache - cache and prefetch pipeline for browsing large photo folders.
#[derive(Parser, Debug, Clone)]
#[command(name = "photocache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Warm the thumbnail cache around a position in a folder.
    Warm(WarmConfig),

    /// Load the visible tiles of one image for a viewport.
    Tiles(TilesConfig),

    /// Print the resolved configuration and disk cache occupancy.
    Check(CheckConfig),
}

/// Pipeline options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Backing storage class of the photo folder.
    #[arg(long, value_enum, default_value_t = DiskMode::Auto, env = "PHOTOCACHE_DISK_MODE")]
    pub disk_mode: DiskMode,

    /// Concurrent decodes.
    ///
    /// Defaults to 2 on HDDs and max(cores, 8) otherwise.
    #[arg(long, env = "PHOTOCACHE_DECODE_THREADS")]
    pub decode_threads: Option<usize>,

    /// Read-ahead budget in bytes for the sequential reader (HDD only).
    #[arg(long, default_value_t = DEFAULT_PREFETCH_BUDGET, env = "PHOTOCACHE_PREFETCH_BUDGET")]
    pub prefetch_budget: usize,

    // =========================================================================
    // Thumbnail Cache Configuration
    // =========================================================================
    /// Maximum number of thumbnails and full images kept in memory.
    #[arg(long, default_value_t = DEFAULT_THUMB_MAX_ITEMS, env = "PHOTOCACHE_THUMB_CACHE_ITEMS")]
    pub thumb_cache_items: usize,

    /// Maximum bytes of thumbnails and full images kept in memory.
    #[arg(long, default_value_t = DEFAULT_THUMB_MAX_BYTES, env = "PHOTOCACHE_THUMB_CACHE_BYTES")]
    pub thumb_cache_bytes: usize,

    /// Directory of the thumbnail disk cache.
    #[arg(long, env = "PHOTOCACHE_THUMB_DISK_DIR")]
    pub thumb_disk_dir: Option<PathBuf>,

    /// Maximum persisted thumbnails; 0 disables the thumbnail disk cache.
    #[arg(long, default_value_t = DEFAULT_THUMB_DISK_ENTRIES, env = "PHOTOCACHE_THUMB_DISK_ENTRIES")]
    pub thumb_disk_entries: usize,

    // =========================================================================
    // Tile Cache Configuration
    // =========================================================================
    /// Maximum number of tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_TILE_MAX_ITEMS, env = "PHOTOCACHE_TILE_CACHE_ITEMS")]
    pub tile_cache_items: usize,

    /// Maximum bytes of tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_TILE_MAX_BYTES, env = "PHOTOCACHE_TILE_CACHE_BYTES")]
    pub tile_cache_bytes: usize,

    /// Directory of the tile disk cache.
    #[arg(long, env = "PHOTOCACHE_TILE_DISK_DIR")]
    pub tile_disk_dir: Option<PathBuf>,

    /// Maximum persisted tiles; 0 keeps the tile cache memory-only.
    #[arg(long, default_value_t = DEFAULT_TILE_DISK_ENTRIES, env = "PHOTOCACHE_TILE_DISK_ENTRIES")]
    pub tile_disk_entries: usize,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PipelineArgs {
    /// Resolve the arguments into the configuration the library consumes.
    pub fn resolve(&self) -> PipelineConfig {
        let storage = self.disk_mode.storage_class();
        PipelineConfig {
            storage,
            decode_threads: self
                .decode_threads
                .unwrap_or_else(|| storage.default_decode_threads()),
            thumbs: CacheSettings {
                max_items: self.thumb_cache_items,
                max_bytes: self.thumb_cache_bytes,
                disk_dir: Some(
                    self.thumb_disk_dir
                        .clone()
                        .unwrap_or_else(default_thumb_disk_dir),
                ),
                max_disk_entries: self.thumb_disk_entries,
            },
            tiles: CacheSettings {
                max_items: self.tile_cache_items,
                max_bytes: self.tile_cache_bytes,
                disk_dir: self.tile_disk_dir.clone(),
                max_disk_entries: self.tile_disk_entries,
            },
            prefetch_budget: self.prefetch_budget,
        }
    }
}

/// Configuration for the `warm` command.
#[derive(Args, Debug, Clone)]
pub struct WarmConfig {
    /// Folder of images to browse.
    pub dir: PathBuf,

    /// Index of the current image in the sorted listing.
    #[arg(long, default_value_t = 0)]
    pub center: usize,

    /// Number of neighbors on each side to warm.
    #[arg(long, default_value_t = DEFAULT_PREFETCH_RADIUS)]
    pub radius: usize,

    /// Thumbnail edge in pixels; 0 warms full-resolution images.
    #[arg(long, default_value_t = DEFAULT_THUMB_EDGE)]
    pub edge: u32,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Configuration for the `tiles` command.
#[derive(Args, Debug, Clone)]
pub struct TilesConfig {
    /// Image to view.
    pub image: PathBuf,

    /// Viewport width in pixels.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_WIDTH)]
    pub width: u32,

    /// Viewport height in pixels.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_HEIGHT)]
    pub height: u32,

    /// Zoom factor; 1 fits the image to the viewport.
    #[arg(long, default_value_t = 1.0)]
    pub zoom: f64,

    /// Tile edge in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl TilesConfig {
    /// Validate the viewport options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("viewport width and height must be greater than 0".to_string());
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err("zoom must be a positive number".to_string());
        }
        Ok(())
    }
}

/// Output format for the `check` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CheckOutputFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the `check` command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Output format.
    #[arg(long, value_enum, default_value_t = CheckOutputFormat::Text)]
    pub format: CheckOutputFormat,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

// =============================================================================
// Tests
// =============================================================================
