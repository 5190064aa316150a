//! Ordered image file lists.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

/// Extensions recognized as images, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp", "heic", "raw", "nef", "cr2", "dng",
];

/// Whether `path` has an image extension (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Index-addressable, ordered list of image paths.
pub trait FileList: Send + Sync + 'static {
    /// Number of entries.
    fn len(&self) -> usize;

    /// Path at `index`, `None` when out of range.
    fn path_at(&self, index: usize) -> Option<PathBuf>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileList for Vec<PathBuf> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn path_at(&self, index: usize) -> Option<PathBuf> {
        self.get(index).cloned()
    }
}

/// The images directly inside one folder, sorted case-insensitively by path.
///
/// Subdirectories are not descended into. A missing folder lists as empty.
#[derive(Debug)]
pub struct DirectoryListing {
    folder: PathBuf,
    paths: RwLock<Vec<PathBuf>>,
}

impl DirectoryListing {
    /// List `folder`. Relative folders are resolved against the working directory.
    pub fn open(folder: impl AsRef<Path>) -> std::io::Result<Self> {
        let folder = folder.as_ref();
        let folder = if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            std::env::current_dir()?.join(folder)
        };

        let listing = Self {
            folder,
            paths: RwLock::new(Vec::new()),
        };
        listing.reload()?;
        Ok(listing)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Snapshot of the current entries.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rescan the folder. Returns the new number of entries.
    pub fn reload(&self) -> std::io::Result<usize> {
        let mut files = match std::fs::read_dir(&self.folder) {
            Ok(dir) => {
                let mut files = Vec::new();
                for entry in dir {
                    let entry = entry?;
                    let path = entry.path();
                    if entry.file_type()?.is_file() && is_image_file(&path) {
                        files.push(path);
                    }
                }
                files
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        files.sort_by_cached_key(|path| path.to_string_lossy().to_lowercase());

        let count = files.len();
        *self.paths.write().unwrap_or_else(PoisonError::into_inner) = files;
        debug!(folder = %self.folder.display(), count, "listed images");
        Ok(count)
    }
}

impl FileList for DirectoryListing {
    fn len(&self) -> usize {
        self.paths.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn path_at(&self, index: usize) -> Option<PathBuf> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }
}
