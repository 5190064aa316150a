//! Display-side consumer of the tile loader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::decode::{Decode, DecodedImage};
use crate::error::DecodeError;

use super::loader::TileLoader;
use super::request::{EnqueueSummary, TileReady};
use super::viewport::Viewport;

/// Tiles currently held for one image on one display surface.
///
/// Borrows the loader it schedules on; the loader and its caches are owned by
/// whoever composed the pipeline. Every source change resets the view:
/// outstanding work is cancelled, held tiles are dropped and the pyramid level
/// is chosen anew. Zoom and pan changes only schedule the tiles still missing.
pub struct TiledView<'a, D: Decode> {
    loader: &'a TileLoader<D>,
    viewport: Viewport,
    source: Option<PathBuf>,
    full_size: Option<(u32, u32)>,
    level: u32,
    generation: u64,
    tiles: HashMap<String, DecodedImage>,
}

impl<'a, D: Decode> TiledView<'a, D> {
    pub fn new(loader: &'a TileLoader<D>, viewport: Viewport) -> Self {
        Self {
            loader,
            viewport,
            source: None,
            full_size: None,
            level: 0,
            generation: loader.generation(),
            tiles: HashMap::new(),
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn full_size(&self) -> Option<(u32, u32)> {
        self.full_size
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of tiles held.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Held tile at `(tile_x, tile_y)` of the current level.
    pub fn tile(&self, tile_x: u32, tile_y: u32) -> Option<&DecodedImage> {
        let source = self.source.as_ref()?;
        let key = crate::cache::tile_key(source, self.level, tile_x, tile_y);
        self.tiles.get(&key)
    }

    /// Show `path` and schedule its visible tiles.
    ///
    /// The full size is probed without decoding pixels. On failure the view
    /// is left empty and the error returned.
    pub async fn set_source(
        &mut self,
        path: impl Into<PathBuf>,
    ) -> Result<EnqueueSummary, DecodeError> {
        let path = path.into();
        if self.source.as_ref() == Some(&path) {
            return Ok(EnqueueSummary::default());
        }
        self.source = Some(path);
        self.reset().await
    }

    /// Cancel outstanding work, drop held tiles, re-probe the source and
    /// re-select the level.
    pub async fn reset(&mut self) -> Result<EnqueueSummary, DecodeError> {
        self.generation = self.loader.cancel_all().await;
        self.tiles.clear();
        self.full_size = None;
        self.level = 0;

        let Some(source) = self.source.clone() else {
            return Ok(EnqueueSummary::default());
        };

        let decoder = Arc::clone(self.loader.decoder());
        let probed = tokio::task::spawn_blocking(move || decoder.dimensions(&source))
            .await
            .map_err(|e| DecodeError::Aborted {
                message: e.to_string(),
            })??;
        if probed.0 == 0 || probed.1 == 0 {
            return Ok(EnqueueSummary::default());
        }

        self.full_size = Some(probed);
        self.level = self.viewport.select_level(probed);
        debug!(
            width = probed.0,
            height = probed.1,
            level = self.level,
            generation = self.generation,
            "tiled view reset"
        );
        Ok(self.schedule().await)
    }

    /// Clamp and apply a new zoom, then schedule newly visible tiles.
    pub async fn set_zoom(&mut self, zoom: f64) -> EnqueueSummary {
        if !self.viewport.set_zoom(zoom) {
            return EnqueueSummary::default();
        }
        self.schedule().await
    }

    /// Apply a new pan offset, then schedule newly visible tiles.
    pub async fn set_pan(&mut self, dx: f64, dy: f64) -> EnqueueSummary {
        if !self.viewport.set_pan(dx, dy) {
            return EnqueueSummary::default();
        }
        self.schedule().await
    }

    /// Request every visible tile of the current level not already held.
    pub async fn schedule(&mut self) -> EnqueueSummary {
        let (Some(source), Some(full_size)) = (self.source.as_ref(), self.full_size) else {
            return EnqueueSummary::default();
        };

        let requests: Vec<_> = self
            .viewport
            .plan(source, full_size, self.level)
            .into_iter()
            .filter(|request| !self.tiles.contains_key(&request.key()))
            .collect();
        if requests.is_empty() {
            return EnqueueSummary::default();
        }
        self.loader.enqueue_visible(requests, self.generation).await
    }

    /// Take a loader event. Returns `false` for events of another generation
    /// or empty images, which are discarded.
    pub fn accept(&mut self, event: TileReady) -> bool {
        if event.generation != self.generation || event.image.is_empty() {
            return false;
        }
        self.tiles.insert(event.key, event.image);
        true
    }
}

impl<D: Decode> std::fmt::Debug for TiledView<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledView")
            .field("source", &self.source)
            .field("full_size", &self.full_size)
            .field("level", &self.level)
            .field("generation", &self.generation)
            .field("tiles", &self.tiles.len())
            .finish()
    }
}
