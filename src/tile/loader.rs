//! Background tile loader.
//!
//! A single worker task drains a priority-sorted queue of tile requests,
//! decodes the requested pyramid level on the blocking pool, crops the tile,
//! stores it in the tile cache and emits a [`TileReady`] event.
//!
//! # Cancellation
//!
//! Every request carries the generation it was issued under. [`TileLoader::cancel_all`]
//! bumps the generation and clears the queue. Work already in flight is
//! allowed to finish and its tile is cached (the key depends only on content),
//! but it is not emitted: the generation is compared once at dequeue and again
//! after decoding.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::ImageCache;
use crate::config::StorageClass;
use crate::decode::{Decode, DecodedImage};
use crate::error::DecodeError;

use super::request::{EnqueueSummary, TileReady, TileRequest};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Queued unit of work.
#[derive(Debug, Clone)]
struct TileTask {
    request: TileRequest,
    generation: u64,
    key: String,
}

impl TileTask {
    fn new(request: TileRequest, generation: u64) -> Self {
        let key = request.key();
        Self {
            request,
            generation,
            key,
        }
    }
}

struct LoaderShared<D> {
    cache: Arc<ImageCache>,
    decoder: Arc<D>,
    storage: StorageClass,
    generation: AtomicU64,
    pending: Mutex<VecDeque<TileTask>>,
    wake: Notify,
    stop: AtomicBool,
    events: mpsc::UnboundedSender<TileReady>,
}

impl<D: Decode> LoaderShared<D> {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn emit(&self, key: String, image: DecodedImage, generation: u64) {
        // A closed channel means nobody is listening any more
        let _ = self.events.send(TileReady {
            key,
            image,
            generation,
        });
    }

    async fn next_task(&self) -> Option<TileTask> {
        loop {
            let notified = self.wake.notified();
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            if let Some(task) = self.pending.lock().await.pop_front() {
                return Some(task);
            }
            notified.await;
        }
    }
}

/// Priority-ordered, generation-cancellable tile loader.
///
/// # Example
///
/// ```ignore
/// let (loader, mut events) = TileLoader::spawn(tile_cache, decoder, StorageClass::SolidState);
///
/// let generation = loader.cancel_all().await;
/// loader.enqueue_visible(requests, generation).await;
///
/// while let Some(ready) = events.recv().await {
///     if ready.generation == loader.generation() {
///         // draw ready.image
///     }
/// }
/// ```
pub struct TileLoader<D: Decode> {
    shared: Arc<LoaderShared<D>>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<D: Decode> TileLoader<D> {
    /// Start the loader's worker task.
    ///
    /// Must be called from within a tokio runtime. Returns the loader and
    /// the receiving end of its [`TileReady`] events.
    pub fn spawn(
        cache: Arc<ImageCache>,
        decoder: Arc<D>,
        storage: StorageClass,
    ) -> (Self, mpsc::UnboundedReceiver<TileReady>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(LoaderShared {
            cache,
            decoder,
            storage,
            generation: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            stop: AtomicBool::new(false),
            events,
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&shared)));
        let loader = Self {
            shared,
            worker: std::sync::Mutex::new(Some(worker)),
        };
        (loader, receiver)
    }

    /// Current generation. Requests must be issued with this value.
    pub fn generation(&self) -> u64 {
        self.shared.current_generation()
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.shared.cache
    }

    pub fn decoder(&self) -> &Arc<D> {
        &self.shared.decoder
    }

    pub fn storage(&self) -> StorageClass {
        self.shared.storage
    }

    /// Number of requests waiting in the queue.
    pub async fn pending(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Queue a single request.
    ///
    /// Dropped if `generation` is not current. Appended at the back without
    /// re-sorting the queue. Returns whether the request was queued.
    pub async fn request_tile(&self, request: TileRequest, generation: u64) -> bool {
        let mut pending = self.shared.pending.lock().await;
        if generation != self.shared.current_generation() {
            trace!(generation, "dropping stale tile request");
            return false;
        }
        pending.push_back(TileTask::new(request, generation));
        drop(pending);

        self.shared.wake.notify_one();
        true
    }

    /// Queue a batch of visible tiles.
    ///
    /// Tiles already cached are emitted, unless the batch was cancelled while
    /// they were being looked up. The rest are deduplicated against pending
    /// work of the same generation, appended, and the whole queue is re-sorted
    /// by ascending priority. The sort is stable, so equal priorities keep
    /// their insertion order.
    pub async fn enqueue_visible(
        &self,
        requests: impl IntoIterator<Item = TileRequest>,
        generation: u64,
    ) -> EnqueueSummary {
        let mut summary = EnqueueSummary::default();
        let requests: Vec<TileRequest> = requests.into_iter().collect();

        if generation != self.shared.current_generation() {
            summary.stale = requests.len();
            trace!(generation, count = summary.stale, "dropping stale tile batch");
            return summary;
        }

        let mut hits = Vec::new();
        let mut misses = Vec::with_capacity(requests.len());
        for request in requests {
            let task = TileTask::new(request, generation);
            match self.shared.cache.get(&task.key).await {
                Some(image) => hits.push((task.key, image)),
                None => misses.push(task),
            }
        }

        // Hits are emitted under the same lock cancel_all bumps the generation under
        let mut pending = self.shared.pending.lock().await;
        if generation != self.shared.current_generation() {
            summary.stale = hits.len() + misses.len();
            trace!(generation, count = summary.stale, "tile batch cancelled during lookup");
            return summary;
        }
        for (key, image) in hits {
            summary.served += 1;
            self.shared.emit(key, image, generation);
        }
        for task in misses {
            let duplicate = pending
                .iter()
                .any(|queued| queued.key == task.key && queued.generation == task.generation);
            if duplicate {
                summary.duplicates += 1;
            } else {
                summary.queued += 1;
                pending.push_back(task);
            }
        }
        pending
            .make_contiguous()
            .sort_by_key(|task| task.request.priority);
        let queued = pending.len();
        drop(pending);

        debug!(
            generation,
            served = summary.served,
            queued = summary.queued,
            duplicates = summary.duplicates,
            pending = queued,
            "enqueued visible tiles"
        );
        self.shared.wake.notify_one();
        summary
    }

    /// Invalidate all outstanding work.
    ///
    /// Bumps the generation and clears the queue. Returns the new generation.
    pub async fn cancel_all(&self) -> u64 {
        let mut pending = self.shared.pending.lock().await;
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let dropped = pending.len();
        pending.clear();
        drop(pending);

        debug!(generation, dropped, "cancelled pending tiles");
        generation
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    ///
    /// Pending requests are abandoned. A tile being decoded finishes first.
    /// Returns `false` if the worker did not exit in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return true;
        };

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "tile worker failed");
                true
            }
            Err(_) => {
                warn!(?timeout, "tile worker did not stop in time");
                false
            }
        }
    }
}

impl<D: Decode> Drop for TileLoader<D> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

impl<D: Decode> std::fmt::Debug for TileLoader<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLoader")
            .field("generation", &self.generation())
            .field("storage", &self.shared.storage)
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn run_worker<D: Decode>(shared: Arc<LoaderShared<D>>) {
    while let Some(task) = shared.next_task().await {
        if task.generation != shared.current_generation() {
            trace!(key = %task.key, "skipping stale tile");
            continue;
        }

        if let Some(image) = shared.cache.get(&task.key).await {
            shared.emit(task.key, image, task.generation);
            continue;
        }

        let decoder = Arc::clone(&shared.decoder);
        let storage = shared.storage;
        let request = task.request.clone();
        let rendered =
            tokio::task::spawn_blocking(move || render_tile(decoder.as_ref(), storage, &request))
                .await;

        let tile = match rendered {
            Ok(Ok(tile)) => tile,
            Ok(Err(e)) => {
                debug!(key = %task.key, error = %e, "tile failed");
                continue;
            }
            Err(e) => {
                debug!(key = %task.key, error = %e, "tile job aborted");
                continue;
            }
        };

        shared.cache.put(task.key.clone(), tile.clone()).await;

        if task.generation != shared.current_generation() {
            trace!(key = %task.key, "tile finished after cancellation");
            continue;
        }
        shared.emit(task.key, tile, task.generation);
    }
    trace!("tile worker stopped");
}

// =============================================================================
// Rendering
// =============================================================================

/// Size of pyramid `level` for an image of `full_size`: each dimension
/// divided by `2^level`, rounded up, never below 1.
pub fn level_dimensions(full_size: (u32, u32), level: u32) -> (u32, u32) {
    let divisor = 1u64 << level.min(32);
    let scale = |full: u32| -> u32 {
        let scaled = (u64::from(full) + divisor - 1) / divisor;
        scaled.max(1) as u32
    };
    (scale(full_size.0), scale(full_size.1))
}

/// Decode the level image for `request` and crop out its tile.
///
/// Rotational storage decodes through the general fit-within path. Solid-state
/// storage asks for the exact level size and falls back to the general path
/// if that fails. The crop is clipped to the level bounds; an empty crop is
/// an error.
pub fn render_tile<D: Decode + ?Sized>(
    decoder: &D,
    storage: StorageClass,
    request: &TileRequest,
) -> Result<DecodedImage, DecodeError> {
    let (level_w, level_h) = level_dimensions(request.full_size, request.level);
    let max_edge = level_w.max(level_h);

    let level_image = match storage {
        StorageClass::Rotational => decoder.decode(&request.path, max_edge)?,
        StorageClass::SolidState => {
            match decoder.decode_to_size(&request.path, level_w, level_h) {
                Ok(image) => image,
                Err(e) => {
                    trace!(path = %request.path.display(), error = %e, "sized decode failed, falling back");
                    decoder.decode(&request.path, max_edge)?
                }
            }
        }
    };

    let x = request.tile_x.saturating_mul(request.tile_size);
    let y = request.tile_y.saturating_mul(request.tile_size);
    level_image
        .crop(x, y, request.tile_size, request.tile_size)
        .ok_or_else(|| DecodeError::EmptyCrop {
            x: request.tile_x,
            y: request.tile_y,
            tile_size: request.tile_size,
            width: level_image.width(),
            height: level_image.height(),
        })
}
