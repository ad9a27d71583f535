//! Items command implementation.

use super::open;
use contentsync_protocol::ContentItem;
use serde::Serialize;
use std::path::Path;

/// A cached item as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct ItemView {
    /// Item id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Category.
    pub category: String,
    /// Item version.
    pub version: u64,
    /// Item checksum.
    pub checksum: String,
    /// Referenced assets and whether each is cached intact.
    pub assets: Vec<AssetView>,
}

/// An asset reference of a cached item.
#[derive(Debug, Serialize)]
pub struct AssetView {
    /// Asset path.
    pub path: String,
    /// True if the bytes are cached and last validated.
    pub cached: bool,
}

/// Runs the items command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let views = collect(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&views)?),
        "text" => print_text_output(&views),
        other => return Err(format!("Unknown format: {}", other).into()),
    }
    Ok(())
}

/// Lists the cached items at `path`.
pub fn collect(path: &Path) -> Result<Vec<ItemView>, Box<dyn std::error::Error>> {
    let local = open(path)?;
    let mut views = Vec::new();
    for item in local.cache.get_items()? {
        let mut assets = Vec::with_capacity(item.asset_paths().len());
        for asset in item.asset_paths() {
            assets.push(AssetView {
                path: asset.clone(),
                cached: local.cache.has_asset(asset)?,
            });
        }
        views.push(view(&item, assets));
    }
    Ok(views)
}

fn view(item: &ContentItem, assets: Vec<AssetView>) -> ItemView {
    ItemView {
        id: item.id().to_string(),
        title: item.title().to_string(),
        category: item.category().to_string(),
        version: item.version(),
        checksum: item.checksum().to_string(),
        assets,
    }
}

fn print_text_output(views: &[ItemView]) {
    if views.is_empty() {
        println!("No cached items");
        return;
    }
    for item in views {
        println!("{} [{}] v{} \"{}\"", item.id, item.category, item.version, item.title);
        for asset in &item.assets {
            let mark = if asset.cached { "✓" } else { "✗" };
            println!("  {} {}", mark, asset.path);
        }
    }
    println!();
    println!("{} item(s)", views.len());
}
