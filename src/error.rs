use thiserror::Error;

/// Errors produced while turning a file on disk into pixels.
///
/// Decode failures are never fatal: thumbnail requests surface them to the
/// caller, tile requests drop them silently and rely on the next viewport
/// update to retry.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// No path was supplied
    #[error("Empty image path")]
    EmptyPath,

    /// The file could not be opened or read
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// The file was read but its contents are not a decodable image
    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    /// The sequential reader returned no bytes for the file
    #[error("No data read from {path}")]
    Unreadable { path: String },

    /// The requested tile lies outside the decoded level image
    #[error("Tile ({x}, {y}) of size {tile_size} is outside the {width}x{height} level image")]
    EmptyCrop {
        x: u32,
        y: u32,
        tile_size: u32,
        width: u32,
        height: u32,
    },

    /// Encoding pixels back into a container format failed
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// The blocking decode job panicked or was cancelled
    #[error("Decode job aborted: {message}")]
    Aborted { message: String },
}

/// Errors raised by the disk tier of a cache.
///
/// These never reach the caller of `put`: persistence is fire-and-forget and
/// failures are only logged. A load failure is treated as a cache miss.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem error while reading, writing or pruning the cache directory
    #[error("Disk cache I/O error at {path}: {message}")]
    Io { path: String, message: String },

    /// A value could not be serialized for persistence
    #[error("Failed to encode cache entry: {message}")]
    Encode { message: String },

    /// A persisted entry could not be turned back into a value
    #[error("Corrupt cache entry: {message}")]
    Corrupt { message: String },
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors returned by the sequential reader.
///
/// Failing to open a file is not an error: the reader hands back an empty
/// buffer. The only failure is the worker going away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The reader was shut down before the request completed
    #[error("Sequential reader has shut down")]
    Shutdown,
}
