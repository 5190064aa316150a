//! Two-tier caches for decoded images.
//!
//! # Structure
//!
//! - **Memory tier**: an LRU index bounded by both entry count and total
//!   bytes. Every hit promotes the entry; every insert evicts from the cold
//!   end until both ceilings hold.
//! - **Disk tier** (optional): a flat directory of `<sha256(key)>.png` files,
//!   written in the background after each insert and pruned by modification
//!   time. Consulted only on a memory miss.
//!
//! The pipeline runs two independent instances: one for thumbnails and full
//! images, one for tiles. They share no locks.

mod bounded;
mod disk;
mod key;
mod value;

pub use bounded::{
    BoundedCache, ImageCache, DEFAULT_THUMB_DISK_ENTRIES, DEFAULT_THUMB_MAX_BYTES,
    DEFAULT_THUMB_MAX_ITEMS, DEFAULT_TILE_MAX_BYTES, DEFAULT_TILE_MAX_ITEMS,
};
pub use disk::DiskShadow;
pub use key::{disk_file_name, hashed_key, thumb_key, tile_key, DISK_ENTRY_EXTENSION};
pub use value::CacheValue;
