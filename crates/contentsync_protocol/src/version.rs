//! Version pointers and checksum snapshots.

use crate::checksum::Checksum;
use crate::error::{ProtocolError, ProtocolResult};
use crate::item::ContentItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A pair of monotonic version counters.
///
/// The server's pointer only ever moves forward. The client stores the last
/// pointer it fully materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionPointer {
    /// Content version.
    pub content_version: u64,
    /// Asset version.
    pub asset_version: u64,
    /// Time of the last change (Unix millis).
    pub last_updated_ms: u64,
}

impl VersionPointer {
    /// Creates a version pointer.
    pub fn new(content_version: u64, asset_version: u64, last_updated_ms: u64) -> Self {
        Self {
            content_version,
            asset_version,
            last_updated_ms,
        }
    }

    /// Returns true if `server` has newer content than `self`.
    pub fn content_behind(&self, server: &VersionPointer) -> bool {
        server.content_version > self.content_version
    }

    /// Returns true if `server` has newer assets than `self`.
    pub fn assets_behind(&self, server: &VersionPointer) -> bool {
        server.asset_version > self.asset_version
    }

    /// Returns true if either counter of `self` is ahead of `server`.
    pub fn is_ahead_of(&self, server: &VersionPointer) -> bool {
        self.content_version > server.content_version || self.asset_version > server.asset_version
    }
}

/// The client's description of what it already has: item id to checksum.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumSnapshot(BTreeMap<String, Checksum>);

impl ChecksumSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from items.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ContentItem>) -> Self {
        Self(
            items
                .into_iter()
                .map(|item| (item.id().to_string(), item.checksum().clone()))
                .collect(),
        )
    }

    /// Records the checksum for an id.
    pub fn insert(&mut self, id: impl Into<String>, checksum: Checksum) {
        self.0.insert(id.into(), checksum);
    }

    /// Forgets an id.
    pub fn remove(&mut self, id: &str) -> Option<Checksum> {
        self.0.remove(id)
    }

    /// Returns the checksum recorded for an id.
    pub fn get(&self, id: &str) -> Option<&Checksum> {
        self.0.get(id)
    }

    /// Returns true if the id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Checksum)> {
        self.0.iter()
    }

    /// Iterates ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Fails if the snapshot holds more than `max` entries.
    pub fn ensure_within(&self, max: usize) -> ProtocolResult<()> {
        if self.0.len() > max {
            return Err(ProtocolError::TooManyEntries {
                what: "item checksums",
                count: self.0.len(),
                max,
            });
        }
        Ok(())
    }
}

impl FromIterator<(String, Checksum)> for ChecksumSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Checksum)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison() {
        let local = VersionPointer::new(5, 3, 0);
        assert!(local.content_behind(&VersionPointer::new(6, 3, 0)));
        assert!(!local.content_behind(&VersionPointer::new(5, 9, 0)));
        assert!(local.assets_behind(&VersionPointer::new(5, 4, 0)));
        assert!(local.is_ahead_of(&VersionPointer::new(4, 3, 0)));
        assert!(!local.is_ahead_of(&local));
    }

    #[test]
    fn snapshot_bounds() {
        let snapshot: ChecksumSnapshot = (0..3)
            .map(|i| (format!("item_{i}"), Checksum::of_bytes(&[i as u8])))
            .collect();
        assert!(snapshot.ensure_within(3).is_ok());
        assert!(matches!(
            snapshot.ensure_within(2),
            Err(ProtocolError::TooManyEntries { count: 3, max: 2, .. })
        ));
    }

    #[test]
    fn snapshot_from_items() {
        let items = [
            ContentItem::new("a", "A", "c", 1, vec![]),
            ContentItem::new("b", "B", "c", 1, vec![]),
        ];
        let snapshot = ChecksumSnapshot::from_items(&items);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a"), Some(items[0].checksum()));
        assert_eq!(snapshot.ids().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
