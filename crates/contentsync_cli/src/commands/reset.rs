//! Reset command implementation.

use super::open;
use std::path::Path;

/// Runs the reset command. Cached items and assets are kept; only the
/// version pointer is discarded.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let local = open(path)?;
    match local.versions.local_version()? {
        Some(pointer) => {
            local.versions.reset()?;
            println!(
                "Cleared version pointer (content v{}, assets v{})",
                pointer.content_version, pointer.asset_version
            );
            println!("The next sync performs a full resync");
        }
        None => println!("No version pointer stored; nothing to reset"),
    }
    Ok(())
}
