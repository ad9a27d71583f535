//! Delta computation.
//!
//! Given the client's id to checksum map, determines which items are new
//! or changed and which ids the client holds that the server has deleted.
//! An empty map means "send everything".

use crate::error::ServerResult;
use crate::index::ChecksumIndex;
use contentsync_protocol::{ChecksumSnapshot, DeltaRequest, DeltaResponse};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Computes deltas against a [`ChecksumIndex`].
#[derive(Debug, Clone)]
pub struct DeltaComputer {
    index: Arc<ChecksumIndex>,
    max_checksum_entries: usize,
}

impl DeltaComputer {
    /// Creates a delta computer that rejects requests larger than `max_checksum_entries`.
    pub fn new(index: Arc<ChecksumIndex>, max_checksum_entries: usize) -> Self {
        Self {
            index,
            max_checksum_entries,
        }
    }

    /// Computes the delta for a request.
    ///
    /// The version in the request is informational. The response is always
    /// derived from the checksums, so a client with a stale or wrong version
    /// still converges.
    pub fn compute_delta(&self, request: &DeltaRequest) -> ServerResult<DeltaResponse> {
        request.item_checksums.ensure_within(self.max_checksum_entries)?;

        let response = self.index.read(|state| {
            let client = &request.item_checksums;

            let changed: Vec<_> = state
                .items
                .values()
                .filter(|item| client.get(item.id()) != Some(item.checksum()))
                .cloned()
                .collect();

            let deleted_ids: Vec<String> = client
                .ids()
                .filter(|id| !state.items.contains_key(id.as_str()))
                .cloned()
                .collect();

            let mut assets = BTreeMap::new();
            for item in state.items.values() {
                for path in item.asset_paths() {
                    if let Some(entry) = state.assets.get(path) {
                        assets.insert(path.clone(), entry.clone());
                    }
                }
            }

            let pointer = state.pointer();
            DeltaResponse {
                server_version: pointer.content_version,
                asset_version: pointer.asset_version,
                updated_count: changed.len() as u64,
                total_items: state.items.len() as u64,
                changed,
                deleted_ids,
                full_checksums: ChecksumSnapshot::from_items(state.items.values()),
                assets,
                last_updated_ms: pointer.last_updated_ms,
            }
        });

        debug!(
            client_version = request.client_version,
            server_version = response.server_version,
            full = request.is_full(),
            changed = response.changed.len(),
            deleted = response.deleted_ids.len(),
            "computed delta"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use contentsync_protocol::{Checksum, ContentItem, ManualClock};
    use proptest::prelude::*;

    fn item(id: &str, title: &str, assets: &[&str]) -> ContentItem {
        ContentItem::new(
            id,
            title,
            "tales",
            1,
            assets.iter().map(|a| (*a).to_string()).collect(),
        )
    }

    fn computer(index: &Arc<ChecksumIndex>) -> DeltaComputer {
        DeltaComputer::new(Arc::clone(index), 500)
    }

    fn seeded() -> (Arc<ChecksumIndex>, ContentItem, ContentItem) {
        let index = Arc::new(ChecksumIndex::new(Arc::new(ManualClock::new(0))));
        let a = item("a", "A", &["audio/a.mp3"]);
        let b = item("b", "B", &["audio/b.mp3", "images/shared.png"]);
        index.upsert_item(a.clone());
        index.upsert_item(b.clone());
        for path in ["audio/a.mp3", "audio/b.mp3", "images/shared.png"] {
            index.upsert_asset(path, Checksum::of_bytes(path.as_bytes()), 10);
        }
        (index, a, b)
    }

    #[test]
    fn empty_snapshot_returns_everything() {
        let (index, _, _) = seeded();
        let response = computer(&index).compute_delta(&DeltaRequest::full()).unwrap();

        assert_eq!(response.changed.len(), 2);
        assert!(response.deleted_ids.is_empty());
        assert_eq!(response.total_items, 2);
        assert_eq!(response.updated_count, 2);
        assert_eq!(response.assets.len(), 3);
        assert_eq!(response.server_version, 2);
    }

    #[test]
    fn changed_and_deleted() {
        let (index, a, _) = seeded();
        let mut snapshot = ChecksumSnapshot::new();
        snapshot.insert("a", a.checksum().clone());
        snapshot.insert("b", Checksum::from_hex("00"));
        snapshot.insert("gone", Checksum::from_hex("11"));

        let response = computer(&index)
            .compute_delta(&DeltaRequest::new(1, snapshot))
            .unwrap();

        let changed: Vec<_> = response.changed.iter().map(|i| i.id()).collect();
        assert_eq!(changed, vec!["b"]);
        assert_eq!(response.deleted_ids, vec!["gone".to_string()]);
        assert_eq!(response.full_checksums.len(), 2);
    }

    #[test]
    fn up_to_date_client_gets_empty_delta() {
        let (index, _, _) = seeded();
        let snapshot = index.item_checksums();
        let response = computer(&index)
            .compute_delta(&DeltaRequest::new(2, snapshot))
            .unwrap();

        assert!(response.changed.is_empty());
        assert!(response.deleted_ids.is_empty());
        assert_eq!(response.updated_count, 0);
    }

    #[test]
    fn manifest_skips_unknown_assets() {
        let index = Arc::new(ChecksumIndex::new(Arc::new(ManualClock::new(0))));
        index.upsert_item(item("a", "A", &["audio/missing.mp3"]));
        let response = computer(&index).compute_delta(&DeltaRequest::full()).unwrap();
        assert!(response.assets.is_empty());
    }

    #[test]
    fn oversized_snapshot_rejected() {
        let (index, _, _) = seeded();
        let snapshot: ChecksumSnapshot = (0..4)
            .map(|i| (format!("id{i}"), Checksum::from_hex("00")))
            .collect();

        let result = DeltaComputer::new(index, 3).compute_delta(&DeltaRequest::new(0, snapshot));
        assert!(matches!(result, Err(ServerError::RequestTooLarge { count: 4, max: 3, .. })));
    }

    proptest! {
        #[test]
        fn applying_delta_converges(
            server_titles in proptest::collection::btree_map("[a-f]{1,2}", "[a-z]{1,4}", 0..12),
            client_titles in proptest::collection::btree_map("[a-f]{1,2}", "[a-z]{1,4}", 0..12),
        ) {
            let index = Arc::new(ChecksumIndex::new(Arc::new(ManualClock::new(0))));
            for (id, title) in &server_titles {
                index.upsert_item(item(id, title, &[]));
            }

            let mut client: BTreeMap<String, ContentItem> = client_titles
                .iter()
                .map(|(id, title)| (id.clone(), item(id, title, &[])))
                .collect();
            let snapshot = ChecksumSnapshot::from_items(client.values());

            let response = DeltaComputer::new(Arc::clone(&index), 100)
                .compute_delta(&DeltaRequest::new(0, snapshot))
                .unwrap();

            for id in &response.deleted_ids {
                client.remove(id);
            }
            for changed in response.changed {
                client.insert(changed.id().to_string(), changed);
            }

            prop_assert_eq!(ChecksumSnapshot::from_items(client.values()), index.item_checksums());
        }
    }
}
