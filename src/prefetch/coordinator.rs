//! Thumbnail loading and neighborhood prefetch.
//!
//! # Design Decisions
//!
//! - **Bounded decode pool**: decodes run on the blocking pool, gated by a
//!   semaphore with one permit per decode thread. Spinning disks want few
//!   concurrent readers, solid-state storage wants many.
//!
//! - **Check, then check again**: the cache is consulted before a job is
//!   issued and again once the job holds a permit, so a neighborhood that was
//!   warmed while the job waited costs nothing.
//!
//! - **Read-ahead first**: with a [`SequentialReader`] attached, the files of
//!   a prefetch window are queued for sequential reading before the decode
//!   jobs start, so the single reader consumes them in list order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::{thumb_key, ImageCache};
use crate::decode::{Decode, DecodedImage};
use crate::error::DecodeError;
use crate::io::SequentialReader;

use super::listing::FileList;

/// Upper bound on the edge of the quick preview pass.
pub const QUICK_EDGE_MAX: u32 = 96;

/// Previews smaller than this are not worth a separate pass.
pub const QUICK_EDGE_MIN: u32 = 32;

/// Edge of the low-resolution preview for a thumbnail of `edge`, if any.
pub fn quick_edge(edge: u32) -> Option<u32> {
    let quick = (edge / 2).min(QUICK_EDGE_MAX);
    (quick >= QUICK_EDGE_MIN).then_some(quick)
}

/// Parse an image id of the form `"<edge>/<path>"` or `"full/<path>"`.
///
/// Returns the path and the edge, 0 standing for full resolution.
pub fn parse_image_id(id: &str) -> Option<(PathBuf, u32)> {
    let (head, path) = id.split_once('/')?;
    if head.is_empty() || path.is_empty() {
        return None;
    }
    let edge = if head == "full" {
        0
    } else {
        head.parse().ok()?
    };
    Some((PathBuf::from(path), edge))
}

// =============================================================================
// Events and Reports
// =============================================================================

/// Emitted by [`Prefetcher::load_progressive`] for each pass.
#[derive(Debug, Clone)]
pub struct ImageReady {
    pub path: PathBuf,
    pub edge: u32,
    pub image: DecodedImage,
    /// `true` for the quick low-resolution pass
    pub preview: bool,
}

/// Outcome of a finished prefetch window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Jobs issued
    pub issued: usize,
    /// Entries already in memory, no job issued
    pub skipped: usize,
    /// Jobs that left the image in the cache
    pub warmed: usize,
    /// Jobs whose decode failed
    pub failed: usize,
}

/// Jobs issued by one [`Prefetcher::prefetch_around`] call.
///
/// Dropping the batch detaches the jobs; they still run to completion.
#[derive(Debug, Default)]
pub struct PrefetchBatch {
    handles: Vec<JoinHandle<bool>>,
    skipped: usize,
}

impl PrefetchBatch {
    /// Number of decode jobs issued.
    pub fn issued(&self) -> usize {
        self.handles.len()
    }

    /// Number of entries skipped because they were already cached.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Wait for every job of the batch.
    pub async fn wait(self) -> PrefetchReport {
        let mut report = PrefetchReport {
            issued: self.handles.len(),
            skipped: self.skipped,
            ..PrefetchReport::default()
        };
        for handle in self.handles {
            match handle.await {
                Ok(true) => report.warmed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    debug!(error = %e, "prefetch job aborted");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

// =============================================================================
// Warm Job
// =============================================================================

/// What a decode job needs, cloneable into spawned tasks.
struct WarmContext<D> {
    cache: Arc<ImageCache>,
    decoder: Arc<D>,
    permits: Arc<Semaphore>,
}

impl<D> Clone for WarmContext<D> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            decoder: Arc::clone(&self.decoder),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<D: Decode> WarmContext<D> {
    /// Get-or-decode `path` at `edge` behind the decode pool.
    async fn warm(&self, path: PathBuf, edge: u32) -> Result<DecodedImage, DecodeError> {
        let key = thumb_key(&path, edge);
        if let Some(image) = self.cache.get(&key).await {
            return Ok(image);
        }

        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| DecodeError::Aborted {
                message: e.to_string(),
            })?;

        if let Some(image) = self.cache.get(&key).await {
            trace!(key = %key, "warmed while waiting");
            return Ok(image);
        }

        let decoder = Arc::clone(&self.decoder);
        let source = path.clone();
        let image = tokio::task::spawn_blocking(move || decoder.decode(&source, edge))
            .await
            .map_err(|e| DecodeError::Aborted {
                message: e.to_string(),
            })??;

        if image.is_empty() {
            return Err(DecodeError::Decode {
                path: path.display().to_string(),
                message: "decoder produced an empty image".to_string(),
            });
        }

        self.cache.put(key, image.clone()).await;
        Ok(image)
    }
}

// =============================================================================
// Prefetcher
// =============================================================================

/// Serves thumbnails and full images, and warms the cache around the
/// current position of an ordered file list.
///
/// # Example
///
/// ```ignore
/// let files = Arc::new(DirectoryListing::open("/photos")?);
/// let prefetcher = Prefetcher::new(thumbs, decoder, files, 8);
///
/// let thumb = prefetcher.load("/photos/IMG_0001.jpg", 256).await?;
/// let report = prefetcher.prefetch_around(40, 20, 256).await.wait().await;
/// ```
pub struct Prefetcher<D: Decode, L: FileList> {
    context: WarmContext<D>,
    files: Arc<L>,
    decode_threads: usize,
    read_ahead: Option<(Arc<SequentialReader>, usize)>,
}

impl<D: Decode, L: FileList> Prefetcher<D, L> {
    /// Create a prefetcher running at most `decode_threads` decodes at once.
    pub fn new(cache: Arc<ImageCache>, decoder: Arc<D>, files: Arc<L>, decode_threads: usize) -> Self {
        let decode_threads = decode_threads.max(1);
        Self {
            context: WarmContext {
                cache,
                decoder,
                permits: Arc::new(Semaphore::new(decode_threads)),
            },
            files,
            decode_threads,
            read_ahead: None,
        }
    }

    /// Queue each prefetch window's files on `reader`, retaining at most
    /// `budget` bytes.
    pub fn with_read_ahead(mut self, reader: Arc<SequentialReader>, budget: usize) -> Self {
        self.read_ahead = Some((reader, budget));
        self
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.context.cache
    }

    pub fn files(&self) -> &Arc<L> {
        &self.files
    }

    pub fn decode_threads(&self) -> usize {
        self.decode_threads
    }

    /// Get `path` at `edge` from the cache, decoding it on a miss.
    ///
    /// An `edge` of 0 loads the full-resolution image.
    pub async fn load(&self, path: impl AsRef<Path>, edge: u32) -> Result<DecodedImage, DecodeError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(DecodeError::EmptyPath);
        }
        self.context.warm(path.to_path_buf(), edge).await
    }

    /// Load by image id (`"<edge>/<path>"` or `"full/<path>"`).
    pub async fn load_id(&self, id: &str) -> Result<DecodedImage, DecodeError> {
        let (path, edge) = parse_image_id(id).ok_or(DecodeError::EmptyPath)?;
        self.load(path, edge).await
    }

    /// Load `path` at `edge`, emitting a quick low-resolution preview first.
    ///
    /// The preview pass runs only when [`quick_edge`] yields an edge and the
    /// full-edge image is not already cached. A failed preview is skipped.
    pub async fn load_progressive(
        &self,
        path: impl AsRef<Path>,
        edge: u32,
        events: &mpsc::UnboundedSender<ImageReady>,
    ) -> Result<DecodedImage, DecodeError> {
        let path = path.as_ref();
        let emit = |image: &DecodedImage, edge: u32, preview: bool| {
            let _ = events.send(ImageReady {
                path: path.to_path_buf(),
                edge,
                image: image.clone(),
                preview,
            });
        };

        let cached = self.context.cache.get(&thumb_key(path, edge)).await;
        if let Some(image) = cached {
            emit(&image, edge, false);
            return Ok(image);
        }

        if let Some(quick) = quick_edge(edge) {
            match self.load(path, quick).await {
                Ok(preview) => emit(&preview, quick, true),
                Err(e) => debug!(path = %path.display(), error = %e, "preview failed"),
            }
        }

        let image = self.load(path, edge).await?;
        emit(&image, edge, false);
        Ok(image)
    }

    /// Warm the cache for list entries `center - radius ..= center + radius`.
    ///
    /// Out-of-range indices and entries already in memory are skipped. The
    /// remaining entries become concurrent decode jobs; they complete in no
    /// particular order.
    pub async fn prefetch_around(&self, center: usize, radius: usize, edge: u32) -> PrefetchBatch {
        let mut batch = PrefetchBatch::default();
        let len = self.files.len();
        if len == 0 {
            return batch;
        }

        let start = center.saturating_sub(radius);
        let end = center.saturating_add(radius).min(len - 1);
        let mut window = Vec::new();
        for index in start..=end {
            let Some(path) = self.files.path_at(index) else {
                continue;
            };
            if self.context.cache.contains(&thumb_key(&path, edge)).await {
                batch.skipped += 1;
                continue;
            }
            window.push(path);
        }

        if let Some((reader, budget)) = &self.read_ahead {
            let queued = reader.prefetch_files(&window, *budget);
            trace!(queued, "queued read-ahead");
        }

        for path in window {
            let context = self.context.clone();
            batch.handles.push(tokio::spawn(async move {
                match context.warm(path.clone(), edge).await {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "prefetch decode failed");
                        false
                    }
                }
            }));
        }

        debug!(
            center,
            radius,
            edge,
            issued = batch.issued(),
            skipped = batch.skipped,
            "prefetch issued"
        );
        batch
    }
}

impl<D: Decode, L: FileList> std::fmt::Debug for Prefetcher<D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("files", &self.files.len())
            .field("decode_threads", &self.decode_threads)
            .field("read_ahead", &self.read_ahead.as_ref().map(|(_, budget)| *budget))
            .finish()
    }
}
