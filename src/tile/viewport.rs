//! Viewport geometry: level selection and visible tile planning.
//!
//! At zoom 1 the image is fitted inside the viewport preserving aspect ratio
//! and centered; zoom multiplies that fitted scale and pan shifts the image in
//! screen pixels.

use std::path::Path;

use super::loader::{level_dimensions, DEFAULT_TILE_SIZE};
use super::request::TileRequest;

/// Smallest accepted zoom factor.
pub const MIN_ZOOM: f64 = 0.05;

/// Largest accepted zoom factor.
pub const MAX_ZOOM: f64 = 20.0;

/// Coarsest pyramid level the planner selects.
pub const MAX_LEVEL: u32 = 6;

// =============================================================================
// Tile Range
// =============================================================================

/// Inclusive rectangle of tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl TileRange {
    pub fn columns(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn rows(&self) -> u32 {
        self.bottom - self.top + 1
    }

    pub fn count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    /// Center tile, rounded toward the top-left.
    pub fn center(&self) -> (u32, u32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn contains(&self, tile_x: u32, tile_y: u32) -> bool {
        (self.left..=self.right).contains(&tile_x) && (self.top..=self.bottom).contains(&tile_y)
    }

    /// Manhattan distance from the center tile; lower is more urgent.
    pub fn priority(&self, tile_x: u32, tile_y: u32) -> u32 {
        let (cx, cy) = self.center();
        tile_x.abs_diff(cx) + tile_y.abs_diff(cy)
    }

    /// Coordinates in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.top..=self.bottom).flat_map(move |y| (self.left..=self.right).map(move |x| (x, y)))
    }
}

// =============================================================================
// Viewport
// =============================================================================

/// The display surface an image is drawn into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: f64,
    height: f64,
    zoom: f64,
    pan: (f64, f64),
    tile_size: u32,
}

impl Viewport {
    /// A `width x height` viewport at zoom 1 with no pan.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
            zoom: 1.0,
            pan: (0.0, 0.0),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.set_zoom(zoom);
        self
    }

    pub fn with_pan(mut self, dx: f64, dy: f64) -> Self {
        self.set_pan(dx, dy);
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn pan(&self) -> (f64, f64) {
        self.pan
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Set the zoom, clamped to `[MIN_ZOOM, MAX_ZOOM]`. Returns whether it changed.
    pub fn set_zoom(&mut self, zoom: f64) -> bool {
        let zoom = if zoom.is_finite() {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            self.zoom
        };
        if (zoom - self.zoom).abs() <= f64::EPSILON * self.zoom.max(1.0) {
            return false;
        }
        self.zoom = zoom;
        true
    }

    /// Set the pan offset in screen pixels. Returns whether it changed.
    pub fn set_pan(&mut self, dx: f64, dy: f64) -> bool {
        if self.pan == (dx, dy) {
            return false;
        }
        self.pan = (dx, dy);
        true
    }

    /// Pyramid level to display an image of `full_size` at the current zoom.
    ///
    /// The largest power of two not exceeding the on-screen downscale factor,
    /// capped at [`MAX_LEVEL`]. Level 0 whenever the image is shown at or
    /// above native resolution.
    pub fn select_level(&self, full_size: (u32, u32)) -> u32 {
        let (w, h) = full_size;
        if w == 0 || h == 0 {
            return 0;
        }
        let downscale = (f64::from(w) / self.width).max(f64::from(h) / self.height) / self.zoom;

        let mut level = 0;
        while level < MAX_LEVEL && f64::from(1u32 << (level + 1)) <= downscale {
            level += 1;
        }
        level
    }

    /// Screen pixels per level pixel.
    fn scale(&self, level_size: (u32, u32)) -> f64 {
        let (lw, lh) = level_size;
        (self.width / f64::from(lw)).min(self.height / f64::from(lh)) * self.zoom
    }

    /// Tiles of `level` that intersect the viewport, clipped to the level's
    /// tile grid. `None` when nothing is visible.
    pub fn visible_tiles(&self, full_size: (u32, u32), level: u32) -> Option<TileRange> {
        if full_size.0 == 0 || full_size.1 == 0 {
            return None;
        }
        let (lw, lh) = level_dimensions(full_size, level);
        let scale = self.scale((lw, lh));
        let span = f64::from(self.tile_size) * scale;

        let offset_x = (self.width - f64::from(lw) * scale) / 2.0 + self.pan.0;
        let offset_y = (self.height - f64::from(lh) * scale) / 2.0 + self.pan.1;

        let tiles_x = lw.div_ceil(self.tile_size);
        let tiles_y = lh.div_ceil(self.tile_size);

        let axis = |offset: f64, extent: f64, tiles: u32| -> Option<(u32, u32)> {
            let first = (-offset / span).floor();
            let last = ((extent - offset) / span).ceil() - 1.0;
            if last < 0.0 || first >= f64::from(tiles) || last < first {
                return None;
            }
            let first = first.max(0.0) as u32;
            let last = (last as u32).min(tiles - 1);
            Some((first, last))
        };

        let (left, right) = axis(offset_x, self.width, tiles_x)?;
        let (top, bottom) = axis(offset_y, self.height, tiles_y)?;
        Some(TileRange {
            left,
            top,
            right,
            bottom,
        })
    }

    /// Requests for every visible tile of `level`, prioritized by distance
    /// from the center of the visible range.
    pub fn plan(&self, path: &Path, full_size: (u32, u32), level: u32) -> Vec<TileRequest> {
        let Some(range) = self.visible_tiles(full_size, level) else {
            return Vec::new();
        };
        range
            .iter()
            .map(|(x, y)| {
                TileRequest::new(path, full_size, level, x, y, self.tile_size)
                    .with_priority(range.priority(x, y))
            })
            .collect()
    }
}
