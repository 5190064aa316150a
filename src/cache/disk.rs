//! Disk tier of the two-tier caches.
//!
//! One flat directory per cache instance holding `<sha256(key)>.png` files.
//! The directory is pruned by modification time after each write,
//! independently of the in-memory LRU order and occupancy.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::error::CacheError;

use super::key::{disk_file_name, hashed_key, DISK_ENTRY_EXTENSION};

/// Distinguishes temp files of concurrent writers to the same key.
static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Best-effort persisted copy of cache entries.
#[derive(Debug, Clone)]
pub struct DiskShadow {
    root: PathBuf,
    max_entries: usize,
}

impl DiskShadow {
    /// Create a disk tier rooted at `root` holding at most `max_entries` files.
    ///
    /// The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            root: root.into(),
            max_entries,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Location of the persisted entry for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(disk_file_name(key))
    }

    /// Read the persisted bytes for `key`, `None` if absent.
    pub fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Persist `data` under `key`.
    ///
    /// Writes go to a temp file that is renamed into place, so a concurrent
    /// `load` sees either the old entry, the new one, or none.
    pub fn store(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;

        let path = self.path_for(key);
        let tmp = self.root.join(format!(
            "{}.{}.{}.tmp",
            hashed_key(key),
            std::process::id(),
            TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));

        write_or_discard(&tmp, |file| file.write_all(data))
            .map_err(|e| CacheError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::io(&path, e));
        }
        Ok(())
    }

    /// Delete the persisted entry for `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Remove the oldest-modified entries beyond `max_entries`.
    ///
    /// Returns the number of files removed. Files that vanish concurrently
    /// (another prune got there first) are not counted and not an error.
    pub fn prune(&self) -> Result<usize, CacheError> {
        let mut entries = self.list()?;
        if entries.len() <= self.max_entries {
            return Ok(0);
        }

        entries.sort_by_key(|(_, modified)| *modified);
        let surplus = entries.len() - self.max_entries;

        let mut removed = 0;
        for (path, _) in entries.into_iter().take(surplus) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }
        Ok(removed)
    }

    /// Number of persisted entries.
    pub fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.list()?.len())
    }

    /// Delete every persisted entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (path, _) in self.list()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }
        Ok(removed)
    }

    /// Persisted entries with their modification times.
    fn list(&self) -> Result<Vec<(PathBuf, SystemTime)>, CacheError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DISK_ENTRY_EXTENSION) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::io(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((path, modified));
        }
        Ok(entries)
    }
}

/// Create `path` and fill it with `write`; a partially written file is deleted.
fn write_or_discard(
    path: &Path,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let result = File::create(path).and_then(|mut file| write(&mut file));
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}
