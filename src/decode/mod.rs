//! Decode service.
//!
//! The pipeline treats decoding as a pure function from a file path and a
//! target edge length to a pixel buffer. Everything above this layer (caches,
//! the tile loader, the prefetcher) is written against the [`Decode`] trait so
//! the real decoder can be swapped for a counting mock in tests.
//!
//! # Components
//!
//! - [`Decode`]: the decode contract
//! - [`DecodedImage`]: immutable, cheaply clonable RGBA pixel buffer
//! - [`ImageDecoder`]: default implementation on top of the `image` crate,
//!   optionally reading file bytes through the
//!   [`SequentialReader`](crate::io::SequentialReader) on rotational storage

mod image_decoder;
mod pixels;

use std::path::Path;

use crate::error::DecodeError;

pub use image_decoder::{ImageDecoder, DEFAULT_FILTER};
pub use pixels::DecodedImage;

/// Decode contract consumed by the caches, the tile loader and the prefetcher.
///
/// Implementations must not touch shared pipeline state. They are always
/// invoked from blocking threads, so they are free to do synchronous I/O.
pub trait Decode: Send + Sync + 'static {
    /// Decode `path`, downscaled to fit within `max_edge x max_edge` while
    /// preserving aspect ratio. `max_edge == 0` means full resolution.
    fn decode(&self, path: &Path, max_edge: u32) -> Result<DecodedImage, DecodeError>;

    /// Decode `path` scaled to exactly `width x height`.
    ///
    /// Used by the tile loader on solid-state storage where the decoder can
    /// pick a scaled size up front. The default falls back to [`Decode::decode`]
    /// with the larger of the two edges.
    fn decode_to_size(
        &self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<DecodedImage, DecodeError> {
        self.decode(path, width.max(height))
    }

    /// Read the full-resolution dimensions without decoding pixels.
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), DecodeError>;
}
