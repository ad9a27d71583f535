//! Authoritative checksum index.
//!
//! The index owns the published items, the asset manifest and the two
//! version counters. Every mutation that changes content bumps the
//! matching counter, so clients can detect staleness with one comparison.

use contentsync_protocol::{
    AssetManifestEntry, Checksum, ChecksumSnapshot, Clock, ContentItem, VersionPointer,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Index contents guarded by the lock.
#[derive(Debug, Default)]
pub(crate) struct IndexState {
    pub(crate) items: BTreeMap<String, ContentItem>,
    pub(crate) assets: BTreeMap<String, AssetManifestEntry>,
    pub(crate) content_version: u64,
    pub(crate) asset_version: u64,
    pub(crate) last_updated_ms: u64,
}

impl IndexState {
    pub(crate) fn pointer(&self) -> VersionPointer {
        VersionPointer::new(self.content_version, self.asset_version, self.last_updated_ms)
    }
}

/// Thread-safe store of the server's published content.
pub struct ChecksumIndex {
    state: RwLock<IndexState>,
    clock: Arc<dyn Clock>,
}

impl ChecksumIndex {
    /// Creates an empty index at version 0.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            clock,
        }
    }

    /// Returns the current version pointer.
    pub fn version_pointer(&self) -> VersionPointer {
        self.state.read().pointer()
    }

    /// Publishes or replaces an item.
    ///
    /// Returns the new content version, or `None` if the item was already
    /// present with the same checksum.
    pub fn upsert_item(&self, item: ContentItem) -> Option<u64> {
        let mut state = self.state.write();
        if state
            .items
            .get(item.id())
            .is_some_and(|existing| existing.checksum() == item.checksum())
        {
            return None;
        }
        state.items.insert(item.id().to_string(), item);
        state.content_version += 1;
        state.last_updated_ms = self.clock.now_millis();
        Some(state.content_version)
    }

    /// Removes an item. Returns the new content version if it existed.
    pub fn remove_item(&self, id: &str) -> Option<u64> {
        let mut state = self.state.write();
        state.items.remove(id)?;
        state.content_version += 1;
        state.last_updated_ms = self.clock.now_millis();
        Some(state.content_version)
    }

    /// Records an asset's checksum and size.
    ///
    /// Returns the new asset version, or `None` if nothing changed.
    pub fn upsert_asset(&self, path: impl Into<String>, checksum: Checksum, size_bytes: u64) -> Option<u64> {
        let path = path.into();
        let entry = AssetManifestEntry {
            checksum,
            size_bytes,
        };
        let mut state = self.state.write();
        if state.assets.get(&path) == Some(&entry) {
            return None;
        }
        state.assets.insert(path, entry);
        state.asset_version += 1;
        state.last_updated_ms = self.clock.now_millis();
        Some(state.asset_version)
    }

    /// Removes an asset from the manifest.
    pub fn remove_asset(&self, path: &str) -> Option<u64> {
        let mut state = self.state.write();
        state.assets.remove(path)?;
        state.asset_version += 1;
        state.last_updated_ms = self.clock.now_millis();
        Some(state.asset_version)
    }

    /// Returns a copy of an item.
    pub fn item(&self, id: &str) -> Option<ContentItem> {
        self.state.read().items.get(id).cloned()
    }

    /// Returns the manifest entry for an asset.
    pub fn asset(&self, path: &str) -> Option<AssetManifestEntry> {
        self.state.read().assets.get(path).cloned()
    }

    /// Returns true if the asset is known to the manifest.
    pub fn has_asset(&self, path: &str) -> bool {
        self.state.read().assets.contains_key(path)
    }

    /// Returns the checksum of every published item.
    pub fn item_checksums(&self) -> ChecksumSnapshot {
        ChecksumSnapshot::from_items(self.state.read().items.values())
    }

    /// Returns the checksum of one item.
    pub fn checksum_of(&self, id: &str) -> Option<Checksum> {
        self.state.read().items.get(id).map(|item| item.checksum().clone())
    }

    /// Number of published items.
    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    /// Returns true if no items are published.
    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    /// Number of assets in the manifest.
    pub fn asset_count(&self) -> usize {
        self.state.read().assets.len()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&IndexState) -> R) -> R {
        f(&self.state.read())
    }
}

impl std::fmt::Debug for ChecksumIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ChecksumIndex")
            .field("items", &state.items.len())
            .field("assets", &state.assets.len())
            .field("content_version", &state.content_version)
            .field("asset_version", &state.asset_version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentsync_protocol::ManualClock;

    fn index() -> ChecksumIndex {
        ChecksumIndex::new(Arc::new(ManualClock::new(1_000)))
    }

    fn item(id: &str, title: &str) -> ContentItem {
        ContentItem::new(id, title, "tales", 1, vec![format!("stories/{id}.txt")])
    }

    #[test]
    fn empty_index() {
        let index = index();
        assert_eq!(index.version_pointer(), VersionPointer::default());
        assert!(index.is_empty());
        assert!(index.item_checksums().is_empty());
    }

    #[test]
    fn upsert_bumps_content_version() {
        let index = index();
        assert_eq!(index.upsert_item(item("a", "A")), Some(1));
        assert_eq!(index.upsert_item(item("b", "B")), Some(2));

        let pointer = index.version_pointer();
        assert_eq!(pointer.content_version, 2);
        assert_eq!(pointer.asset_version, 0);
        assert_eq!(pointer.last_updated_ms, 1_000);
    }

    #[test]
    fn identical_upsert_is_noop() {
        let index = index();
        index.upsert_item(item("a", "A"));
        assert_eq!(index.upsert_item(item("a", "A")), None);
        assert_eq!(index.version_pointer().content_version, 1);

        assert_eq!(index.upsert_item(item("a", "A2")), Some(2));
    }

    #[test]
    fn remove_item() {
        let index = index();
        index.upsert_item(item("a", "A"));
        assert_eq!(index.remove_item("a"), Some(2));
        assert_eq!(index.remove_item("a"), None);
        assert!(index.item("a").is_none());
    }

    #[test]
    fn asset_versioning() {
        let index = index();
        let checksum = Checksum::of_bytes(b"x");
        assert_eq!(index.upsert_asset("audio/x.mp3", checksum.clone(), 1), Some(1));
        assert_eq!(index.upsert_asset("audio/x.mp3", checksum, 1), None);
        assert_eq!(index.asset("audio/x.mp3").map(|e| e.size_bytes), Some(1));
        assert!(index.has_asset("audio/x.mp3"));
        assert_eq!(index.remove_asset("audio/x.mp3"), Some(2));
        assert_eq!(index.version_pointer().content_version, 0);
    }

    #[test]
    fn checksums_match_items() {
        let index = index();
        let a = item("a", "A");
        index.upsert_item(a.clone());
        assert_eq!(index.item_checksums().get("a"), Some(a.checksum()));
        assert_eq!(index.checksum_of("a").as_ref(), Some(a.checksum()));
    }
}
