//! CLI command implementations.

pub mod items;
pub mod reset;
pub mod status;
pub mod verify;

use contentsync_client::{CacheManager, FileKvStore, FsBlobStore, VersionManager};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// The on-disk cache a command operates on.
pub struct LocalCache {
    /// Items, snapshot and asset records.
    pub cache: CacheManager<FileKvStore, FsBlobStore>,
    /// The local version pointer.
    pub versions: VersionManager<FileKvStore>,
}

/// Opens the cache at `path`, holding its lock for the lifetime of the value.
pub fn open(path: &Path) -> Result<LocalCache, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No cache found at {:?}", path).into());
    }
    let kv = Arc::new(FileKvStore::open(path)?);
    let blobs = Arc::new(FsBlobStore::open(path)?);
    debug!(path = %path.display(), "opened cache");
    Ok(LocalCache {
        cache: CacheManager::new(Arc::clone(&kv), blobs),
        versions: VersionManager::new(kv),
    })
}

/// Formats a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn open_holds_the_cache_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _held = open(dir.path()).unwrap();
        assert!(open(dir.path()).is_err());
    }
}
