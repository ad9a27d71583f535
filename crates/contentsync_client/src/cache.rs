//! Local content cache.
//!
//! Items, the checksum snapshot and asset records are stored as separate
//! records so that an interrupted run leaves a stale but consistent cache.
//! Asset bytes live in the blob store and are only recorded after their
//! checksum has been verified.

use crate::error::{StoreError, SyncError, SyncResult};
use crate::store::{get_record, keys, put_record, BlobHandle, BlobStore, KeyValueStore};
use crate::transport::ContentTransport;
use bytes::Bytes;
use contentsync_protocol::{AssetDescriptor, Checksum, ChecksumSnapshot, ContentItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validity of a cached asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetState {
    /// Bytes present and matching the recorded checksum.
    Valid,
    /// Bytes present but their checksum no longer matches.
    Corrupted,
    /// Bytes absent from the blob store.
    Missing,
}

/// A cached asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAssetRecord {
    /// Asset path.
    pub path: String,
    /// Blob store handle.
    pub handle: BlobHandle,
    /// Checksum the bytes were accepted against.
    pub checksum: Checksum,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Last known validity.
    pub state: AssetState,
}

/// Result of [`CacheManager::validate_all_assets`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of asset records checked.
    pub total_assets: usize,
    /// Number found intact.
    pub valid_assets: usize,
    /// Paths whose bytes are corrupted or missing.
    pub corrupted_paths: Vec<String>,
}

impl ValidationReport {
    /// Returns true if every asset is intact.
    pub fn is_clean(&self) -> bool {
        self.corrupted_paths.is_empty()
    }
}

/// Persists content items and cached assets.
pub struct CacheManager<K: KeyValueStore, B: BlobStore> {
    kv: Arc<K>,
    blobs: Arc<B>,
}

impl<K: KeyValueStore, B: BlobStore> CacheManager<K, B> {
    /// Creates a cache over the given stores.
    pub fn new(kv: Arc<K>, blobs: Arc<B>) -> Self {
        Self { kv, blobs }
    }

    /// Returns all cached items, ordered by id.
    pub fn get_items(&self) -> SyncResult<Vec<ContentItem>> {
        let mut items = Vec::new();
        for key in self.kv.keys_with_prefix(keys::ITEM_PREFIX)? {
            if let Some(item) = get_record(&*self.kv, &key)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Returns one cached item.
    pub fn get_item(&self, id: &str) -> SyncResult<Option<ContentItem>> {
        Ok(get_record(&*self.kv, &keys::item(id))?)
    }

    /// Returns the id to checksum map of committed items.
    pub fn snapshot(&self) -> SyncResult<ChecksumSnapshot> {
        Ok(get_record(&*self.kv, keys::SNAPSHOT)?.unwrap_or_default())
    }

    /// Commits items and their snapshot entries. Returns the number written.
    ///
    /// Assets a replaced item no longer references are dropped once no
    /// other item uses them.
    pub fn update_items(&self, items: &[ContentItem]) -> SyncResult<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut snapshot = self.snapshot()?;
        let mut dropped = BTreeSet::new();
        for item in items {
            if let Some(previous) = self.get_item(item.id())? {
                dropped.extend(
                    previous
                        .asset_paths()
                        .iter()
                        .filter(|path| !item.asset_paths().contains(*path))
                        .cloned(),
                );
            }
            put_record(&*self.kv, &keys::item(item.id()), item)?;
            snapshot.insert(item.id(), item.checksum().clone());
        }
        put_record(&*self.kv, keys::SNAPSHOT, &snapshot)?;

        if !dropped.is_empty() {
            let referenced = self.referenced_paths()?;
            for path in dropped.difference(&referenced) {
                if self.remove_asset(path)? {
                    debug!(path = %path, "dropped asset no longer referenced");
                }
            }
        }

        debug!(count = items.len(), "committed items");
        Ok(items.len())
    }

    /// Removes items, their snapshot entries, and any asset no remaining
    /// item references. Returns the number of items removed.
    pub fn remove_items(&self, ids: &[String]) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut snapshot = self.snapshot()?;
        let mut removed = 0;
        for id in ids {
            if self.kv.delete(&keys::item(id))? {
                removed += 1;
            }
            snapshot.remove(id);
        }
        put_record(&*self.kv, keys::SNAPSHOT, &snapshot)?;

        let referenced = self.referenced_paths()?;
        for record in self.asset_records()? {
            if !referenced.contains(&record.path) {
                self.remove_asset(&record.path)?;
            }
        }

        debug!(removed, "removed items");
        Ok(removed)
    }

    /// Returns true if the asset is cached, marked valid, and its bytes are present.
    pub fn has_asset(&self, path: &str) -> SyncResult<bool> {
        Ok(self.valid_record(path)?.is_some())
    }

    /// Returns true if the asset is cached and valid with the given checksum.
    pub fn has_asset_with_checksum(&self, path: &str, checksum: &Checksum) -> SyncResult<bool> {
        Ok(self
            .valid_record(path)?
            .is_some_and(|record| &record.checksum == checksum))
    }

    /// Returns the record for a cached asset.
    pub fn asset_record(&self, path: &str) -> SyncResult<Option<CachedAssetRecord>> {
        Ok(get_record(&*self.kv, &keys::asset(path))?)
    }

    /// Returns every asset record, ordered by path.
    pub fn asset_records(&self) -> SyncResult<Vec<CachedAssetRecord>> {
        let mut records = Vec::new();
        for key in self.kv.keys_with_prefix(keys::ASSET_PREFIX)? {
            if let Some(record) = get_record(&*self.kv, &key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Reads a valid cached asset's bytes.
    pub fn read_asset(&self, path: &str) -> SyncResult<Option<Bytes>> {
        match self.valid_record(path)? {
            Some(record) => Ok(self.blobs.get(&record.handle)?),
            None => Ok(None),
        }
    }

    /// Downloads an asset, verifies it, and records it.
    ///
    /// Unless `force_update` is set, an asset already cached with the same
    /// checksum is returned without a download. A failed download other
    /// than an expired URL is retried once against `fallback_url`. Bytes
    /// whose checksum does not match the descriptor are never stored.
    pub async fn download_and_cache_asset<T>(
        &self,
        transport: &T,
        descriptor: &AssetDescriptor,
        fallback_url: Option<&str>,
        force_update: bool,
    ) -> SyncResult<BlobHandle>
    where
        T: ContentTransport + ?Sized,
    {
        let path = descriptor.path.as_str();
        if !force_update {
            if let Some(record) = self.valid_record(path)? {
                if record.checksum == descriptor.checksum {
                    return Ok(record.handle);
                }
            }
        }

        let bytes = match transport.download(&descriptor.signed_url).await {
            Ok(bytes) => bytes,
            Err(err) => match fallback_url {
                Some(fallback) if !matches!(err, SyncError::UrlExpired { .. }) => {
                    warn!(path, error = %err, "download failed, trying fallback url");
                    transport.download(fallback).await?
                }
                _ => return Err(err),
            },
        };

        let actual = Checksum::of_bytes(&bytes);
        if actual != descriptor.checksum {
            return Err(SyncError::ChecksumMismatch {
                path: path.to_string(),
                expected: descriptor.checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        let handle = self.blobs.put(&bytes).map_err(|err| match err {
            StoreError::Full { needed, available } => SyncError::InsufficientDiskSpace {
                required: needed,
                available,
            },
            other => SyncError::Storage(other),
        })?;

        let previous = self.asset_record(path)?;
        let record = CachedAssetRecord {
            path: path.to_string(),
            handle: handle.clone(),
            checksum: actual,
            size_bytes: bytes.len() as u64,
            state: AssetState::Valid,
        };
        put_record(&*self.kv, &keys::asset(path), &record)?;

        if let Some(previous) = previous {
            if previous.handle != handle {
                self.release_blob(&previous.handle)?;
            }
        }

        debug!(path, bytes = record.size_bytes, "cached asset");
        Ok(handle)
    }

    /// Re-hashes every cached asset and records which are corrupted or missing.
    pub fn validate_all_assets(&self) -> SyncResult<ValidationReport> {
        let mut report = ValidationReport::default();
        for mut record in self.asset_records()? {
            report.total_assets += 1;
            let state = match self.blobs.get(&record.handle)? {
                None => AssetState::Missing,
                Some(bytes) if record.checksum.matches(&bytes) => AssetState::Valid,
                Some(_) => AssetState::Corrupted,
            };

            if state == AssetState::Valid {
                report.valid_assets += 1;
            } else {
                warn!(path = %record.path, state = ?state, "cached asset failed validation");
                report.corrupted_paths.push(record.path.clone());
            }

            if state != record.state {
                record.state = state;
                put_record(&*self.kv, &keys::asset(&record.path), &record)?;
            }
        }
        Ok(report)
    }

    /// Fails fast if the blob store cannot hold `estimated_bytes`.
    pub fn check_disk_space_for_sync(&self, estimated_bytes: u64) -> SyncResult<()> {
        let available = self.blobs.available_space()?;
        if estimated_bytes > available {
            return Err(SyncError::InsufficientDiskSpace {
                required: estimated_bytes,
                available,
            });
        }
        Ok(())
    }

    /// Removes an asset record and its blob if nothing else uses it.
    pub fn remove_asset(&self, path: &str) -> SyncResult<bool> {
        let Some(record) = self.asset_record(path)? else {
            return Ok(false);
        };
        self.kv.delete(&keys::asset(path))?;
        self.release_blob(&record.handle)?;
        Ok(true)
    }

    fn valid_record(&self, path: &str) -> SyncResult<Option<CachedAssetRecord>> {
        let Some(record) = self.asset_record(path)? else {
            return Ok(None);
        };
        if record.state != AssetState::Valid || self.blobs.get(&record.handle)?.is_none() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn referenced_paths(&self) -> SyncResult<BTreeSet<String>> {
        Ok(self
            .get_items()?
            .into_iter()
            .flat_map(|item| item.asset_paths().to_vec())
            .collect())
    }

    /// Deletes a blob unless another record still points at it.
    fn release_blob(&self, handle: &BlobHandle) -> SyncResult<()> {
        let in_use = self
            .asset_records()?
            .iter()
            .any(|record| &record.handle == handle);
        if !in_use {
            self.blobs.delete(handle)?;
        }
        Ok(())
    }
}
