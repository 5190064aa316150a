//! Default decoder built on the `image` crate.
//!
//! # Design Decisions
//!
//! - **Fit, never upscale**: `decode` only shrinks. An image already inside
//!   the requested box is returned at its native size.
//!
//! - **Storage-aware reads**: when constructed with a
//!   [`SequentialReader`], file bytes are pulled through the reader's single
//!   worker (and its read-ahead cache) and decoded from memory. Otherwise the
//!   file is opened directly by the calling blocking thread.

use std::path::Path;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::error::DecodeError;
use crate::io::SequentialReader;

use super::{Decode, DecodedImage};

/// Resampling filter used when shrinking decoded images.
pub const DEFAULT_FILTER: FilterType = FilterType::Triangle;

/// Decoder for common photo formats (JPEG, PNG, BMP, GIF, TIFF, WebP).
///
/// # Example
///
/// ```ignore
/// use photocache::decode::{Decode, ImageDecoder};
///
/// let decoder = ImageDecoder::new();
/// let thumb = decoder.decode("photos/IMG_0001.jpg".as_ref(), 256)?;
/// assert!(thumb.width() <= 256 && thumb.height() <= 256);
/// ```
#[derive(Clone)]
pub struct ImageDecoder {
    reader: Option<Arc<SequentialReader>>,
    filter: FilterType,
}

impl ImageDecoder {
    /// Create a decoder that opens files directly.
    pub fn new() -> Self {
        Self {
            reader: None,
            filter: DEFAULT_FILTER,
        }
    }

    /// Create a decoder that reads file bytes through `reader`.
    ///
    /// Must only be driven from blocking threads: reads wait on the reader's
    /// worker synchronously.
    pub fn with_sequential_reader(reader: Arc<SequentialReader>) -> Self {
        Self {
            reader: Some(reader),
            filter: DEFAULT_FILTER,
        }
    }

    /// Override the resampling filter.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Whether reads go through a sequential reader.
    pub fn is_sequential(&self) -> bool {
        self.reader.is_some()
    }

    fn load(&self, path: &Path) -> Result<DynamicImage, DecodeError> {
        if path.as_os_str().is_empty() {
            return Err(DecodeError::EmptyPath);
        }

        match &self.reader {
            Some(reader) => {
                let data = reader
                    .read_file_blocking(path)
                    .map_err(|e| open_error(path, e))?;
                if data.is_empty() {
                    return Err(DecodeError::Unreadable {
                        path: path.display().to_string(),
                    });
                }
                image::load_from_memory(&data).map_err(|e| decode_error(path, e))
            }
            None => ImageReader::open(path)
                .map_err(|e| open_error(path, e))?
                .with_guessed_format()
                .map_err(|e| open_error(path, e))?
                .decode()
                .map_err(|e| decode_error(path, e)),
        }
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decode for ImageDecoder {
    fn decode(&self, path: &Path, max_edge: u32) -> Result<DecodedImage, DecodeError> {
        let image = self.load(path)?;
        let image = if max_edge > 0 && (image.width() > max_edge || image.height() > max_edge) {
            image.resize(max_edge, max_edge, self.filter)
        } else {
            image
        };
        Ok(DecodedImage::from_dynamic(image))
    }

    fn decode_to_size(
        &self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<DecodedImage, DecodeError> {
        let image = self.load(path)?;
        let image = if width == 0 || height == 0 || (image.width(), image.height()) == (width, height)
        {
            image
        } else {
            image.resize_exact(width, height, self.filter)
        };
        Ok(DecodedImage::from_dynamic(image))
    }

    fn dimensions(&self, path: &Path) -> Result<(u32, u32), DecodeError> {
        if path.as_os_str().is_empty() {
            return Err(DecodeError::EmptyPath);
        }
        ImageReader::open(path)
            .map_err(|e| open_error(path, e))?
            .with_guessed_format()
            .map_err(|e| open_error(path, e))?
            .into_dimensions()
            .map_err(|e| decode_error(path, e))
    }
}

fn open_error(path: &Path, err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Open {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn decode_error(path: &Path, err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Decode {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
