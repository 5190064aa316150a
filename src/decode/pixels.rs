use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use image::{imageops, DynamicImage, ImageFormat, RgbaImage};

use crate::error::DecodeError;

/// Decoded RGBA pixels shared behind an `Arc`.
///
/// Clones are cheap and never copy pixel data, so caches can hand out
/// clones while keeping exclusive ownership of their entries.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Arc<RgbaImage>,
}

impl DecodedImage {
    /// Wrap an RGBA buffer.
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Convert any decoded image into an RGBA buffer.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.into_rgba8())
    }

    /// Parse an encoded image (PNG, JPEG, ...) held in memory.
    pub fn from_encoded(data: &[u8]) -> Result<Self, DecodeError> {
        let image = image::load_from_memory(data).map_err(|e| DecodeError::Decode {
            path: "<memory>".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_dynamic(image))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Size of the pixel buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// `true` for a zero-area image.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copy out the rectangle at `(x, y)` of size `width x height`, clipped to
    /// the image bounds.
    ///
    /// Returns `None` when the clipped rectangle has zero area.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let width = width.min(self.width() - x);
        let height = height.min(self.height() - y);
        if width == 0 || height == 0 {
            return None;
        }
        let tile = imageops::crop_imm(&*self.pixels, x, y, width, height).to_image();
        Some(Self::new(tile))
    }

    /// Encode as PNG, the lossless format used by the disk caches.
    pub fn encode_png(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| DecodeError::Encode {
                message: e.to_string(),
            })?;
        Ok(out)
    }
}

impl PartialEq for DecodedImage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
            || (self.dimensions() == other.dimensions()
                && self.pixels.as_raw() == other.pixels.as_raw())
    }
}

impl Eq for DecodedImage {}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
