//! Cache key construction.
//!
//! Keys are plain strings so the same value can index the in-memory LRU and,
//! hashed, name the file in the disk tier. The formats are stable: changing
//! them orphans every entry already persisted on disk.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Extension of persisted cache entries.
pub const DISK_ENTRY_EXTENSION: &str = "png";

/// Key for a thumbnail or full image: `"<edge>|<path>"`.
///
/// An `edge` of 0 denotes the full-resolution image.
pub fn thumb_key(path: &Path, edge: u32) -> String {
    format!("{}|{}", edge, path.display())
}

/// Key for a tile: `"<path>|<level>|<tx>|<ty>"`.
pub fn tile_key(path: &Path, level: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{}|{}|{}|{}", path.display(), level, tile_x, tile_y)
}

/// Lowercase hex SHA-256 of the key, used as the on-disk file stem.
pub fn hashed_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// File name of the persisted entry for `key`.
pub fn disk_file_name(key: &str) -> String {
    format!("{}.{}", hashed_key(key), DISK_ENTRY_EXTENSION)
}
