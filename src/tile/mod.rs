//! Tiled viewing of large images.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          TiledView (display)            │
//! │   Viewport → level + visible tiles      │
//! └────────────────────┬────────────────────┘
//!                      │ enqueue_visible / cancel_all
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileLoader                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ priority     │  │ worker:         │  │
//! │  │ queue +      │  │ decode level →  │  │
//! │  │ generation   │  │ crop → cache    │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ TileReady
//!                      ▼
//!                  consumer
//! ```
//!
//! # Components
//!
//! - [`TileLoader`]: single-worker loader with priority ordering and
//!   generation-based cancellation
//! - [`TileRequest`]: one tile of one pyramid level of one image
//! - [`TileReady`]: event emitted when a tile is available
//! - [`Viewport`]: zoom/pan geometry, level selection and visible-tile planning
//! - [`TiledView`]: display-side consumer that owns the held tiles

mod loader;
mod request;
mod view;
mod viewport;

pub use loader::{level_dimensions, render_tile, TileLoader, DEFAULT_TILE_SIZE};
pub use request::{EnqueueSummary, TileReady, TileRequest};
pub use view::TiledView;
pub use viewport::{TileRange, Viewport, MAX_LEVEL, MAX_ZOOM, MIN_ZOOM};
