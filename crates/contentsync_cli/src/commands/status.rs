//! Status command implementation.

use super::{format_size, open};
use serde::Serialize;
use std::path::Path;

/// Summary of a local cache.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Cache path.
    pub path: String,
    /// Local content version, if the cache has ever synced.
    pub content_version: Option<u64>,
    /// Local asset version.
    pub asset_version: Option<u64>,
    /// Server-side time of the last content change (Unix millis).
    pub last_updated_ms: Option<u64>,
    /// Number of cached items.
    pub item_count: usize,
    /// Number of cached asset records.
    pub asset_count: usize,
    /// Total bytes of cached assets.
    pub cached_bytes: u64,
}

/// Runs the status command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let status = collect(path)?;

    println!("=== Cache Status ===");
    println!();
    println!("Path: {}", status.path);
    match (status.content_version, status.asset_version) {
        (Some(content), Some(assets)) => {
            println!("Content version: {}", content);
            println!("Asset version:   {}", assets);
        }
        _ => println!("Version: never synced (next sync is a full resync)"),
    }
    println!();
    println!("Items:  {}", status.item_count);
    println!("Assets: {} ({})", status.asset_count, format_size(status.cached_bytes));

    Ok(())
}

/// Reads the status of the cache at `path`.
pub fn collect(path: &Path) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let local = open(path)?;
    let pointer = local.versions.local_version()?;
    let assets = local.cache.asset_records()?;

    Ok(StatusReport {
        path: path.display().to_string(),
        content_version: pointer.map(|p| p.content_version),
        asset_version: pointer.map(|p| p.asset_version),
        last_updated_ms: pointer.map(|p| p.last_updated_ms),
        item_count: local.cache.get_items()?.len(),
        asset_count: assets.len(),
        cached_bytes: assets.iter().map(|a| a.size_bytes).sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;

    #[test]
    fn reports_pointer_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let status = collect(dir.path()).unwrap();
        assert_eq!(status.content_version, Some(4));
        assert_eq!(status.asset_version, Some(2));
        assert_eq!(status.item_count, 1);
        assert_eq!(status.asset_count, 1);
        assert_eq!(status.cached_bytes, 10);
    }

    #[test]
    fn empty_cache_has_no_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let status = collect(dir.path()).unwrap();
        assert_eq!(status.content_version, None);
        assert_eq!(status.item_count, 0);
    }
}
