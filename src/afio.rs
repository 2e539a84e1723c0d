//
// AbstractFileIO: a bounded pool of open file streams, each behind its own
// lock, multiplexing positioned byte I/O over an unbounded file namespace.
//

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{Result, VfsError};

struct CacheEntry {
    file: Arc<Mutex<File>>,
    last_used: Instant,
}

struct Cache {
    entries: HashMap<PathBuf, CacheEntry>,
    n_max: usize,
}

/// A process-wide cache of at most `n_max` open file streams, keyed by path.
///
/// Non-copyable by design; share an `AbstractFileIo` with `Arc::clone`, the
/// way callers are expected to share any non-trivial resource in this crate.
pub struct AbstractFileIo {
    cache: Mutex<Cache>,
}

impl AbstractFileIo {
    /// Creates a fresh AFIO instance that keeps at most `n_max` file handles
    /// open at once. `n_max` must be at least 1.
    pub fn new(n_max: usize) -> Arc<AbstractFileIo> {
        assert!(n_max >= 1, "AbstractFileIo requires n_max >= 1");

        Arc::new(AbstractFileIo {
            cache: Mutex::new(Cache {
                entries: HashMap::new(),
                n_max,
            }),
        })
    }

    /// Reads exactly `buf.len()` bytes from `path` at `offset`.
    pub fn read(&self, path: &Path, buf: &mut [u8], offset: u64) -> Result<()> {
        let entry = self.get_or_open(path)?;
        let mut file = entry.lock().unwrap();

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf).map_err(|source| {
            log::warn!("afio: short read on {:?} at offset {}", path, offset);
            VfsError::Io(source)
        })?;

        log::trace!("afio: read {} bytes from {:?}@{}", buf.len(), path, offset);
        Ok(())
    }

    /// Writes exactly `buf` at `offset`, extending the file if `offset` lies
    /// past the current end.
    pub fn write(&self, path: &Path, buf: &[u8], offset: u64) -> Result<()> {
        let entry = self.get_or_open(path)?;
        let mut file = entry.lock().unwrap();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;

        log::trace!("afio: wrote {} bytes to {:?}@{}", buf.len(), path, offset);
        Ok(())
    }

    /// Creates an empty regular file at `path`.
    pub fn make(&self, path: &Path) -> Result<()> {
        File::create(path).map_err(|source| VfsError::CannotAccessFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// True iff `path` resolves to a regular file.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Invalidates any cached stream for `path`, then deletes the file.
    pub fn remove(&self, path: &Path) -> Result<()> {
        self.close_matching_streams(path);
        std::fs::remove_file(path).map_err(|source| VfsError::CannotAccessFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Invalidates any cached stream for `path`, then truncates or extends
    /// the file to `new_size`.
    pub fn resize(&self, path: &Path, new_size: u64) -> Result<()> {
        self.close_matching_streams(path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| VfsError::CannotAccessFile {
                path: path.to_path_buf(),
                source,
            })?;
        file.set_len(new_size)?;
        Ok(())
    }

    /// Drops every cache entry whose path starts with `prefix`, returning
    /// the number dropped.
    pub fn close_matching_streams(&self, prefix: &Path) -> usize {
        let prefix = prefix.to_string_lossy().into_owned();
        let mut cache = self.cache.lock().unwrap();

        let before = cache.entries.len();
        cache
            .entries
            .retain(|path, _| !path.to_string_lossy().starts_with(&prefix));
        let dropped = before - cache.entries.len();

        if dropped > 0 {
            log::debug!("afio: closed {} stream(s) matching prefix {:?}", dropped, prefix);
        }
        dropped
    }

    fn get_or_open(&self, path: &Path) -> Result<Arc<Mutex<File>>> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.entries.get_mut(path) {
                entry.last_used = Instant::now();
                return Ok(Arc::clone(&entry.file));
            }
        }

        // Miss: open outside the cache lock so a slow `open` doesn't block
        // unrelated lookups, then retry the insert.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| VfsError::CannotAccessFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file = Arc::new(Mutex::new(file));

        let mut cache = self.cache.lock().unwrap();
        if cache.entries.len() >= cache.n_max {
            self.evict_oldest(&mut cache);
        }
        cache.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                file: Arc::clone(&file),
                last_used: Instant::now(),
            },
        );

        Ok(file)
    }

    fn evict_oldest(&self, cache: &mut Cache) {
        if let Some(oldest) = cache
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(path, _)| path.clone())
        {
            log::debug!("afio: evicting {:?} (cache at capacity)", oldest);
            cache.entries.remove(&oldest);
        }
    }
}
