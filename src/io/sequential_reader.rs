use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::error::ReadError;

/// Default read chunk: 4MB.
/// Large enough that a spinning disk spends its time transferring rather than seeking.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default byte budget for files read ahead by `prefetch_files`: 32MB.
pub const DEFAULT_PREFETCH_BUDGET: usize = 32 * 1024 * 1024;

/// How long `shutdown` waits for the worker to finish its current read.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// A unit of work for the reader thread.
struct ReadTask {
    path: PathBuf,
    /// Completion handle for synchronous reads; `None` for read-ahead.
    reply: Option<oneshot::Sender<Bytes>>,
    /// Byte budget of the read-ahead cache; `None` for synchronous reads.
    retain_budget: Option<usize>,
}

/// Read-ahead results, evicted in insertion order.
///
/// Entries are never promoted: they are either drained by a read or pushed
/// out by newer read-ahead.
struct Retained {
    entries: LruCache<PathBuf, Bytes>,
    bytes: usize,
}

impl Retained {
    fn take(&mut self, path: &Path) -> Option<Bytes> {
        let data = self.entries.pop(path)?;
        self.bytes = self.bytes.saturating_sub(data.len());
        Some(data)
    }

    fn insert(&mut self, path: PathBuf, data: Bytes, budget: usize) {
        if data.is_empty() {
            return;
        }
        if let Some(old) = self.entries.pop(&path) {
            self.bytes = self.bytes.saturating_sub(old.len());
        }
        self.bytes += data.len();
        self.entries.push(path, data);

        while self.bytes > budget {
            match self.entries.pop_lru() {
                Some((path, evicted)) => {
                    trace!(path = %path.display(), bytes = evicted.len(), "read-ahead evicted");
                    self.bytes = self.bytes.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }
}

struct Shared {
    retained: Mutex<Retained>,
    stop: AtomicBool,
}

impl Shared {
    fn retained(&self) -> MutexGuard<'_, Retained> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-threaded whole-file reader for rotational storage.
///
/// All reads funnel through one dedicated thread so a spinning disk serves
/// them one file at a time, in request order, instead of seeking between
/// concurrent readers.
///
/// Features:
/// - Strict FIFO processing of synchronous reads and read-ahead
/// - Large chunked reads (default 4MB) appended until end of file
/// - Byte-budgeted read-ahead cache, drained on read (one-shot)
/// - Bounded shutdown: queued synchronous reads are cancelled with
///   [`ReadError::Shutdown`] instead of hanging
///
/// Duplicate reads are not coalesced: a synchronous read for a path that is
/// still queued as read-ahead is queued again and the file is read twice.
///
/// # Example
///
/// ```ignore
/// use photocache::io::SequentialReader;
///
/// let reader = SequentialReader::new();
/// reader.prefetch_files(["a.jpg", "b.jpg"], 32 * 1024 * 1024);
///
/// // Served from the read-ahead cache once the worker has reached it.
/// let bytes = reader.read_file("a.jpg").await?;
/// ```
pub struct SequentialReader {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<ReadTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    exited: Mutex<Option<std_mpsc::Receiver<()>>>,
    chunk_size: usize,
}

impl SequentialReader {
    /// Start a reader with the default 4MB chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Start a reader that reads files in chunks of `chunk_size` bytes.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let shared = Arc::new(Shared {
            retained: Mutex::new(Retained {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            stop: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = std_mpsc::channel();

        let worker_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("sequential-reader".to_string())
            .spawn(move || run_worker(worker_shared, rx, chunk_size, exited_tx));

        let (queue, worker, exited) = match spawned {
            Ok(handle) => (Some(tx), Some(handle), Some(exited_rx)),
            Err(e) => {
                error!(error = %e, "failed to start sequential reader thread");
                (None, None, None)
            }
        };

        Self {
            shared,
            queue: Mutex::new(queue),
            worker: Mutex::new(worker),
            exited: Mutex::new(exited),
            chunk_size,
        }
    }

    /// Read a whole file.
    ///
    /// A read-ahead hit is removed from the cache and returned immediately.
    /// Otherwise the read is queued behind any pending work and this call
    /// waits for the worker to finish it. A file that cannot be opened yields
    /// an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Shutdown`] if the reader stops before the read runs.
    pub async fn read_file(&self, path: impl AsRef<Path>) -> Result<Bytes, ReadError> {
        let path = path.as_ref();
        if let Some(data) = self.shared.retained().take(path) {
            trace!(path = %path.display(), "read-ahead hit");
            return Ok(data);
        }
        let done = self.submit_read(path)?;
        done.await.map_err(|_| ReadError::Shutdown)
    }

    /// Blocking variant of [`read_file`](Self::read_file) for decoder threads.
    ///
    /// Must not be called from within an async context.
    pub fn read_file_blocking(&self, path: impl AsRef<Path>) -> Result<Bytes, ReadError> {
        let path = path.as_ref();
        if let Some(data) = self.shared.retained().take(path) {
            trace!(path = %path.display(), "read-ahead hit");
            return Ok(data);
        }
        let done = self.submit_read(path)?;
        done.blocking_recv().map_err(|_| ReadError::Shutdown)
    }

    /// Queue fire-and-forget reads whose results are kept in the read-ahead
    /// cache, bounded to `max_bytes` (oldest inserted evicted first).
    ///
    /// Paths already held in the cache are skipped. Returns the number of
    /// reads queued.
    pub fn prefetch_files<I, P>(&self, paths: I, max_bytes: usize) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let wanted: Vec<PathBuf> = {
            let retained = self.shared.retained();
            paths
                .into_iter()
                .map(|p| p.as_ref().to_path_buf())
                .filter(|p| !retained.entries.contains(p))
                .collect()
        };

        let mut queued = 0;
        for path in wanted {
            let task = ReadTask {
                path,
                reply: None,
                retain_budget: Some(max_bytes),
            };
            if self.enqueue(task).is_err() {
                break;
            }
            queued += 1;
        }
        queued
    }

    /// Whether `path` is currently held in the read-ahead cache.
    pub fn is_retained(&self, path: impl AsRef<Path>) -> bool {
        self.shared.retained().entries.contains(path.as_ref())
    }

    /// Number of files held in the read-ahead cache.
    pub fn retained_len(&self) -> usize {
        self.shared.retained().entries.len()
    }

    /// Total bytes held in the read-ahead cache.
    pub fn retained_bytes(&self) -> usize {
        self.shared.retained().bytes
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    ///
    /// The read in progress (if any) completes and is delivered. Every read
    /// still queued is dropped and its waiter receives
    /// [`ReadError::Shutdown`]. Returns `false` if the worker was still busy
    /// when the timeout elapsed; it is then detached.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.shared.stop.store(true, Ordering::Release);
        drop(lock(&self.queue).take());

        let Some(worker) = lock(&self.worker).take() else {
            return true;
        };
        let exited = lock(&self.exited).take();

        let finished = match exited {
            Some(rx) => !matches!(
                rx.recv_timeout(timeout),
                Err(std_mpsc::RecvTimeoutError::Timeout)
            ),
            None => true,
        };

        if finished {
            let _ = worker.join();
            debug!("sequential reader stopped");
        } else {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "sequential reader did not stop in time, detaching worker"
            );
        }
        finished
    }

    fn submit_read(&self, path: &Path) -> Result<oneshot::Receiver<Bytes>, ReadError> {
        let (reply, done) = oneshot::channel();
        self.enqueue(ReadTask {
            path: path.to_path_buf(),
            reply: Some(reply),
            retain_budget: None,
        })?;
        Ok(done)
    }

    fn enqueue(&self, task: ReadTask) -> Result<(), ReadError> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(ReadError::Shutdown);
        }
        match lock(&self.queue).as_ref() {
            Some(queue) => queue.send(task).map_err(|_| ReadError::Shutdown),
            None => Err(ReadError::Shutdown),
        }
    }
}

impl Default for SequentialReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SequentialReader {
    /// Signals the worker and detaches it without waiting, so dropping the
    /// last handle never blocks an async runtime thread. Use
    /// [`shutdown`](Self::shutdown) to wait for the worker.
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        drop(lock(&self.queue).take());
        if lock(&self.worker).take().is_some() {
            trace!("sequential reader dropped, worker detached");
        }
    }
}

impl std::fmt::Debug for SequentialReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialReader")
            .field("chunk_size", &self.chunk_size)
            .field("retained", &self.retained_len())
            .field("stopped", &self.shared.stop.load(Ordering::Relaxed))
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Worker
// =============================================================================

fn run_worker(
    shared: Arc<Shared>,
    mut queue: mpsc::UnboundedReceiver<ReadTask>,
    chunk_size: usize,
    _exited: std_mpsc::Sender<()>,
) {
    while let Some(task) = queue.blocking_recv() {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let data = read_whole_file(&task.path, chunk_size);

        if let Some(budget) = task.retain_budget {
            shared.retained().insert(task.path, data.clone(), budget);
        }
        if let Some(reply) = task.reply {
            let _ = reply.send(data);
        }
    }
    debug!("sequential reader worker exiting");
}

/// Read `path` to the end in `chunk_size` pieces. Empty on open failure.
fn read_whole_file(path: &Path, chunk_size: usize) -> Bytes {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "sequential read failed to open file");
            return Bytes::new();
        }
    };

    let expected = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
    let mut buffer = BytesMut::with_capacity(expected);
    let mut chunk = vec![0u8; chunk_size];

    loop {
        match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "sequential read stopped early");
                break;
            }
        }
    }

    buffer.freeze()
}

// =============================================================================
// Tests
// =============================================================================
