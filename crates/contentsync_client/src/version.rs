//! Local version pointer management.

use crate::error::{SyncError, SyncResult};
use crate::store::{get_record, keys, put_record, KeyValueStore};
use crate::transport::ContentTransport;
use contentsync_protocol::VersionPointer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of comparing local and server version pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCheck {
    /// Last fully materialized version, if any.
    pub local: Option<VersionPointer>,
    /// Server version, or `None` when the server was unreachable.
    pub server: Option<VersionPointer>,
    /// Items must be fetched.
    pub needs_content_sync: bool,
    /// Assets must be refreshed.
    pub needs_asset_sync: bool,
}

impl VersionCheck {
    /// Returns true if the server could not be reached.
    pub fn is_offline(&self) -> bool {
        self.server.is_none()
    }

    /// Returns true if anything needs syncing.
    pub fn needs_sync(&self) -> bool {
        self.needs_content_sync || self.needs_asset_sync
    }
}

/// Persists and compares version pointers.
pub struct VersionManager<K: KeyValueStore> {
    store: Arc<K>,
}

impl<K: KeyValueStore> VersionManager<K> {
    /// Creates a version manager over a key-value store.
    pub fn new(store: Arc<K>) -> Self {
        Self { store }
    }

    /// Returns the stored version pointer.
    pub fn local_version(&self) -> SyncResult<Option<VersionPointer>> {
        Ok(get_record(&*self.store, keys::VERSION_POINTER)?)
    }

    /// Compares the local pointer with the server's.
    ///
    /// An unreachable server is reported as `server: None`, not as an error.
    /// A local pointer ahead of the server is treated as up to date.
    pub async fn check_versions<T>(&self, transport: &T) -> SyncResult<VersionCheck>
    where
        T: ContentTransport + ?Sized,
    {
        let local = self.local_version()?;

        let server = match transport.check_version().await {
            Ok(pointer) => pointer,
            Err(err) if err.is_offline() => {
                info!(error = %err, "server unreachable, serving cached content");
                return Ok(VersionCheck {
                    local,
                    server: None,
                    needs_content_sync: false,
                    needs_asset_sync: false,
                });
            }
            Err(err) => return Err(err),
        };

        let (needs_content_sync, needs_asset_sync) = match local {
            None => (true, true),
            Some(local) if local.is_ahead_of(&server) => {
                warn!(
                    local_content = local.content_version,
                    local_assets = local.asset_version,
                    server_content = server.content_version,
                    server_assets = server.asset_version,
                    "local version is ahead of server, treating as up to date"
                );
                (false, false)
            }
            Some(local) => (local.content_behind(&server), local.assets_behind(&server)),
        };

        debug!(
            needs_content_sync,
            needs_asset_sync,
            server_content = server.content_version,
            "compared versions"
        );

        Ok(VersionCheck {
            local,
            server: Some(server),
            needs_content_sync,
            needs_asset_sync,
        })
    }

    /// Persists a new local pointer.
    ///
    /// Call only after every item and asset of the run has been committed.
    pub fn update_local_version(&self, pointer: VersionPointer) -> SyncResult<()> {
        put_record(&*self.store, keys::VERSION_POINTER, &pointer)?;
        debug!(
            content_version = pointer.content_version,
            asset_version = pointer.asset_version,
            "advanced local version"
        );
        Ok(())
    }

    /// Discards the local pointer so the next run performs a full resync.
    pub fn reset(&self) -> SyncResult<()> {
        self.store
            .delete(keys::VERSION_POINTER)
            .map_err(SyncError::from)?;
        info!("local version reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;
    use crate::transport::MockTransport;

    fn manager() -> VersionManager<MemoryKvStore> {
        VersionManager::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn first_run_needs_everything() {
        let versions = manager();
        let transport = MockTransport::new();
        transport.set_version(VersionPointer::new(1, 1, 0));

        let check = versions.check_versions(&transport).await.unwrap();
        assert!(check.local.is_none());
        assert!(check.needs_content_sync);
        assert!(check.needs_asset_sync);
    }

    #[tokio::test]
    async fn up_to_date() {
        let versions = manager();
        versions.update_local_version(VersionPointer::new(4, 2, 0)).unwrap();
        let transport = MockTransport::new();
        transport.set_version(VersionPointer::new(4, 2, 10));

        let check = versions.check_versions(&transport).await.unwrap();
        assert!(!check.needs_sync());
        assert!(!check.is_offline());
    }

    #[tokio::test]
    async fn only_assets_behind() {
        let versions = manager();
        versions.update_local_version(VersionPointer::new(4, 2, 0)).unwrap();
        let transport = MockTransport::new();
        transport.set_version(VersionPointer::new(4, 3, 0));

        let check = versions.check_versions(&transport).await.unwrap();
        assert!(!check.needs_content_sync);
        assert!(check.needs_asset_sync);
    }

    #[tokio::test]
    async fn local_ahead_is_up_to_date() {
        let versions = manager();
        versions.update_local_version(VersionPointer::new(9, 9, 0)).unwrap();
        let transport = MockTransport::new();
        transport.set_version(VersionPointer::new(5, 9, 0));

        let check = versions.check_versions(&transport).await.unwrap();
        assert!(!check.needs_sync());
    }

    #[tokio::test]
    async fn unreachable_server_is_offline() {
        let versions = manager();
        versions.update_local_version(VersionPointer::new(2, 0, 0)).unwrap();
        let transport = MockTransport::new();
        transport.set_offline(true);

        let check = versions.check_versions(&transport).await.unwrap();
        assert!(check.is_offline());
        assert_eq!(check.local, Some(VersionPointer::new(2, 0, 0)));
        assert!(!check.needs_sync());
    }

    #[tokio::test]
    async fn protocol_error_is_not_offline() {
        let versions = manager();
        let transport = MockTransport::new();
        // No version configured: the mock replies with a protocol error.
        assert!(matches!(
            versions.check_versions(&transport).await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn reset_discards_pointer() {
        let versions = manager();
        versions.update_local_version(VersionPointer::new(1, 1, 1)).unwrap();
        assert!(versions.local_version().unwrap().is_some());

        versions.reset().unwrap();
        assert!(versions.local_version().unwrap().is_none());
    }
}
