//! Verify command implementation.

use super::open;
use std::path::Path;

/// Runs the verify command.
///
/// Corrupted or missing assets are marked in the cache so the next sync
/// re-downloads them.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying cache at {:?}", path);
    println!();

    let local = open(path)?;
    let report = local.cache.validate_all_assets()?;

    println!("Assets checked: {}", report.total_assets);
    println!("  Valid:     {}", report.valid_assets);
    println!("  Corrupted: {}", report.corrupted_paths.len());
    for path in &report.corrupted_paths {
        println!("    - {}", path);
    }

    println!();
    if report.is_clean() {
        println!("✓ Cache verification passed");
        Ok(())
    } else {
        println!("✗ Cache verification failed");
        Err("Verification failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;

    #[test]
    fn intact_cache_passes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        assert!(run(dir.path()).is_ok());
    }

    #[test]
    fn corrupted_blob_fails_and_is_marked() {
        let dir = tempfile::tempdir().unwrap();
        let blob = seed(dir.path());
        std::fs::write(blob, b"bit rot").unwrap();

        assert!(run(dir.path()).is_err());

        let local = open(dir.path()).unwrap();
        assert!(!local.cache.has_asset("audio/moon.mp3").unwrap());
    }
}
