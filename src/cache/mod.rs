use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::TileKey;
use crate::error::CacheError;

/// Temp files older than this are left over from writers that died before
/// renaming; anything younger may still belong to a running writer.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Disk cache for downloaded tiles, one file per [`TileKey`]
///
/// Layout: `{root}/{map}/{version}/{zoom}/{column}_{row}.{ext}`.
#[derive(Debug, Clone)]
pub struct TileCache {
    cache_dir: PathBuf,
}

impl TileCache {
    /// Create a new cache rooted at the given directory
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.as_ref().to_path_buf();

        // Create the cache directory if it doesn't exist
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| CacheError::io(&cache_dir, e))?;
        }

        let cache = Self { cache_dir };
        match cache.sweep_stale_temp_files(STALE_TEMP_AGE) {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} stale temp files from the cache", removed),
            Err(e) => warn!("Failed to sweep stale temp files: {}", e),
        }
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the file backing a key
    pub fn path_for(&self, key: &TileKey) -> PathBuf {
        self.cache_dir.join(key.relative_path())
    }

    /// Look up a tile. Never touches the network; unreadable entries count as misses.
    pub fn get(&self, key: &TileKey) -> Option<Vec<u8>> {
        let file_path = self.path_for(key);
        match fs::read(&file_path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", file_path.display(), e);
                None
            }
        }
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Save a tile to the cache
    ///
    /// The data is written to a uniquely named sibling file and renamed into
    /// place, so readers never observe a partial tile and concurrent writers
    /// of the same key simply race to the last rename.
    pub fn put(&self, key: &TileKey, data: &[u8]) -> Result<PathBuf, CacheError> {
        let file_path = self.path_for(key);

        // Create parent directories if they don't exist
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.cache_dir.clone());
        fs::create_dir_all(&parent).map_err(|e| CacheError::io(&parent, e))?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = write_file(&temp_path, data) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &file_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(CacheError::io(&file_path, e));
        }

        debug!("Cached tile {} at {}", key, file_path.display());
        Ok(file_path)
    }

    /// Remove a single tile. Returns whether an entry existed.
    pub fn remove(&self, key: &TileKey) -> Result<bool, CacheError> {
        let file_path = self.path_for(key);
        match fs::remove_file(&file_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&file_path, e)),
        }
    }

    /// Remove every cached tile of one map, across versions and zoom levels
    pub fn clear_map(&self, label: &str) -> Result<(), CacheError> {
        if label.is_empty() || label == "." || label == ".." || label.contains(['/', '\\']) {
            return Err(CacheError::InvalidLabel(label.to_string()));
        }
        let map_dir = self.cache_dir.join(label);
        if map_dir.exists() {
            fs::remove_dir_all(&map_dir).map_err(|e| CacheError::io(&map_dir, e))?;
        }
        Ok(())
    }

    /// Delete temp files abandoned by interrupted writes. Returns how many were removed.
    pub fn sweep_stale_temp_files(&self, older_than: Duration) -> Result<usize, CacheError> {
        let cutoff = SystemTime::now().checked_sub(older_than).unwrap_or(SystemTime::UNIX_EPOCH);
        sweep_dir(&self.cache_dir, cutoff)
    }

    /// Clear the cache
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir).map_err(|e| CacheError::io(&self.cache_dir, e))?;
            fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::io(&self.cache_dir, e))?;
        }

        Ok(())
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let mut file = File::create(path).map_err(|e| CacheError::io(path, e))?;
    file.write_all(data).map_err(|e| CacheError::io(path, e))?;
    file.sync_all().map_err(|e| CacheError::io(path, e))?;
    Ok(())
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
}

fn sweep_dir(dir: &Path, cutoff: SystemTime) -> Result<usize, CacheError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|e| CacheError::io(dir, e))? {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
        if file_type.is_dir() {
            removed += sweep_dir(&path, cutoff)?;
            continue;
        }
        if !file_type.is_file() || !is_temp_file(&path) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            // Renamed into place by its writer meanwhile
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        if modified > cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed stale temp file {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&path, e)),
        }
    }
    Ok(removed)
}
