//! Content items.

use crate::checksum::Checksum;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const ITEM_DIGEST_TAG: &[u8] = b"contentsync.item.v1";

/// A versioned piece of structured content.
///
/// The checksum is never set by hand: every constructor and setter recomputes
/// it from the semantic fields, so it changes if and only if one of them
/// changes. Items received over the network carry the sender's checksum and
/// must be checked with [`ContentItem::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    id: String,
    title: String,
    category: String,
    version: u64,
    asset_paths: Vec<String>,
    checksum: Checksum,
}

impl ContentItem {
    /// Creates an item and computes its checksum.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        category: impl Into<String>,
        version: u64,
        asset_paths: Vec<String>,
    ) -> Self {
        let mut item = Self {
            id: id.into(),
            title: title.into(),
            category: category.into(),
            version,
            asset_paths,
            checksum: Checksum::from_hex(""),
        };
        item.checksum = item.compute_checksum();
        item
    }

    /// Returns the item id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the category.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Returns the content version of this item.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the referenced asset paths, in order.
    pub fn asset_paths(&self) -> &[String] {
        &self.asset_paths
    }

    /// Returns the checksum.
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Sets the title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.checksum = self.compute_checksum();
    }

    /// Sets the category.
    pub fn set_category(&mut self, category: impl Into<String>) {
        self.category = category.into();
        self.checksum = self.compute_checksum();
    }

    /// Sets the version.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
        self.checksum = self.compute_checksum();
    }

    /// Replaces the referenced asset paths.
    pub fn set_asset_paths(&mut self, asset_paths: Vec<String>) {
        self.asset_paths = asset_paths;
        self.checksum = self.compute_checksum();
    }

    /// Recomputes the checksum from the semantic fields.
    ///
    /// Every variable-length field is length-prefixed so that adjacent fields
    /// cannot be re-split into a colliding input.
    pub fn compute_checksum(&self) -> Checksum {
        let mut hasher = Sha256::new();
        hasher.update(ITEM_DIGEST_TAG);
        for field in [&self.id, &self.title, &self.category] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(self.version.to_be_bytes());
        hasher.update((self.asset_paths.len() as u64).to_be_bytes());
        for path in &self.asset_paths {
            hasher.update((path.len() as u64).to_be_bytes());
            hasher.update(path.as_bytes());
        }
        Checksum::from_hex(hex::encode(hasher.finalize()))
    }

    /// Checks that the carried checksum agrees with the fields.
    pub fn verify(&self) -> ProtocolResult<()> {
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(ProtocolError::ItemChecksumMismatch {
                id: self.id.clone(),
                carried: self.checksum.to_string(),
                computed: computed.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn story(title: &str) -> ContentItem {
        ContentItem::new(
            "story_1",
            title,
            "bedtime",
            1,
            vec!["images/story_1/cover.jpg".into()],
        )
    }

    #[test]
    fn checksum_is_stable() {
        assert_eq!(story("Moon Bear").checksum(), story("Moon Bear").checksum());
        assert!(story("Moon Bear").verify().is_ok());
    }

    #[test]
    fn setters_recompute_checksum() {
        let mut item = story("Moon Bear");
        let before = item.checksum().clone();

        item.set_title("Sleepy Moon Bear");
        assert_ne!(item.checksum(), &before);
        assert!(item.verify().is_ok());

        item.set_title("Moon Bear");
        assert_eq!(item.checksum(), &before);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = ContentItem::new("x", "ab", "c", 1, vec![]);
        let b = ContentItem::new("x", "a", "bc", 1, vec![]);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn asset_order_is_significant() {
        let a = ContentItem::new("x", "t", "c", 1, vec!["audio/a".into(), "audio/b".into()]);
        let b = ContentItem::new("x", "t", "c", 1, vec!["audio/b".into(), "audio/a".into()]);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn tampered_item_fails_verify() {
        let item = story("Moon Bear");
        let mut forged = story("Other");
        forged.checksum = item.checksum().clone();

        let err = forged.verify().unwrap_err();
        assert!(matches!(err, ProtocolError::ItemChecksumMismatch { .. }));
    }

    proptest! {
        #[test]
        fn recompute_is_idempotent(
            id in "[a-z0-9_]{1,12}",
            title in ".{0,24}",
            category in "[a-z]{0,8}",
            version in any::<u64>(),
            paths in proptest::collection::vec("images/[a-z]{1,8}\\.png", 0..4),
        ) {
            let item = ContentItem::new(id, title, category, version, paths);
            prop_assert_eq!(item.compute_checksum(), item.checksum().clone());
            prop_assert!(item.verify().is_ok());
        }

        #[test]
        fn title_change_changes_checksum(title in "[a-z]{1,16}", other in "[A-Z]{1,16}") {
            let mut item = ContentItem::new("id", title, "cat", 1, vec![]);
            let before = item.checksum().clone();
            item.set_title(other);
            prop_assert_ne!(item.checksum().clone(), before);
        }
    }
}
