//! Local persistence collaborators.
//!
//! Two stores back the client cache:
//! - a [`KeyValueStore`] holding small CBOR records
//! - a content-addressed [`BlobStore`] holding asset bytes
//!
//! ## On-disk layout
//!
//! ```text
//! <cache_path>/
//! ├─ LOCK       # Advisory lock for single-writer
//! ├─ records/   # One file per key, named by the SHA-256 of the key
//! └─ blobs/     # One file per blob, named by SHA-256
//! ```

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use contentsync_protocol::{from_cbor, to_cbor, Checksum};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Record keys. Each record is readable independently of the others.
pub mod keys {
    /// The last fully materialized version pointer.
    pub const VERSION_POINTER: &str = "version/pointer";
    /// id to checksum map of committed items.
    pub const SNAPSHOT: &str = "snapshot/items";
    /// Prefix for item records.
    pub const ITEM_PREFIX: &str = "items/";
    /// Prefix for cached asset records.
    pub const ASSET_PREFIX: &str = "assets/";

    /// Key of an item record.
    pub fn item(id: &str) -> String {
        format!("{ITEM_PREFIX}{id}")
    }

    /// Key of an asset record.
    pub fn asset(path: &str) -> String {
        format!("{ASSET_PREFIX}{path}")
    }
}

const LOCK_FILE: &str = "LOCK";
const RECORDS_DIR: &str = "records";
const BLOBS_DIR: &str = "blobs";
/// Length of a record file name: hex SHA-256.
const RECORD_NAME_LEN: usize = 64;
const MAX_KEY_LEN: usize = 64 * 1024;

/// A small-record key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a value. The write is atomic: readers see the old or the new value.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Deletes a value. Returns true if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Lists keys starting with `prefix`, in order.
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Reads and decodes a CBOR record.
pub(crate) fn get_record<T: DeserializeOwned, S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => from_cbor(&bytes)
            .map(Some)
            .map_err(|e| StoreError::CorruptRecord {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encodes and writes a CBOR record.
pub(crate) fn put_record<T: Serialize + ?Sized, S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let bytes = to_cbor(value).map_err(|e| StoreError::CorruptRecord {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.put(key, &bytes)
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// File-backed key-value store.
///
/// Each record lives in its own file named by the SHA-256 of its key, so
/// arbitrarily long keys fit the filesystem's name limit. A file starts
/// with the key (a big-endian `u32` length, then the UTF-8 bytes) followed
/// by the value.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// target, so a crash never leaves a torn record. The store holds an
/// exclusive lock on the directory while open.
#[derive(Debug)]
pub struct FileKvStore {
    records: PathBuf,
    _lock_file: File,
}

impl FileKvStore {
    /// Opens or creates a store rooted at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let records = path.join(RECORDS_DIR);
        fs::create_dir_all(&records)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.display().to_string()));
        }

        Ok(Self {
            records,
            _lock_file: lock_file,
        })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.records.join(Checksum::of_bytes(key.as_bytes()).as_str())
    }

    fn encode_record(key: &str, value: &[u8]) -> StoreResult<Vec<u8>> {
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::CorruptRecord {
                key: key.chars().take(64).collect(),
                message: "key too long".into(),
            });
        }
        let key_len = key.len() as u32;
        let mut data = Vec::with_capacity(4 + key.len() + value.len());
        data.extend_from_slice(&key_len.to_be_bytes());
        data.extend_from_slice(key.as_bytes());
        data.extend_from_slice(value);
        Ok(data)
    }

    /// Reads the key stored in a record file's header.
    fn read_key(reader: &mut impl Read) -> io::Result<String> {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_KEY_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "key header too long"));
        }
        let mut key = vec![0u8; len];
        reader.read_exact(&mut key)?;
        String::from_utf8(key).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut file = match File::open(self.record_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored = Self::read_key(&mut file).map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        if stored != key {
            return Err(StoreError::CorruptRecord {
                key: key.to_string(),
                message: format!("record belongs to key {stored}"),
            });
        }
        let mut value = Vec::new();
        file.read_to_end(&mut value)?;
        Ok(Some(value))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let data = Self::encode_record(key, value)?;
        write_atomic(&self.records, &self.record_path(key), &data)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.records)? {
            let entry = entry?;
            // Temporary files from interrupted writes are not records.
            let is_record = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.len() == RECORD_NAME_LEN && !name.starts_with('.'));
            if !is_record {
                continue;
            }
            let mut file = match File::open(entry.path()) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match Self::read_key(&mut file) {
                Ok(key) if key.starts_with(prefix) => keys.push(key),
                Ok(_) => {}
                Err(e) => {
                    warn!(file = %entry.path().display(), error = %e, "skipping unreadable record");
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> StoreResult<()> {
    let temp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Identifier of a stored blob: the SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(String);

impl BlobHandle {
    /// Returns the handle for the given bytes.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(Checksum::of_bytes(data).as_str().to_string())
    }

    /// Returns the handle as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content-addressed store for asset bytes.
pub trait BlobStore: Send + Sync {
    /// Stores bytes and returns their handle. Storing identical bytes twice
    /// yields the same handle.
    fn put(&self, data: &[u8]) -> StoreResult<BlobHandle>;

    /// Reads a blob.
    fn get(&self, handle: &BlobHandle) -> StoreResult<Option<Bytes>>;

    /// Deletes a blob. Returns true if it existed.
    fn delete(&self, handle: &BlobHandle) -> StoreResult<bool>;

    /// Free space available for new blobs.
    fn available_space(&self) -> StoreResult<u64>;
}

/// In-memory blob store with an optional capacity.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobHandle, Bytes>>,
    capacity: u64,
}

impl MemoryBlobStore {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::with_capacity(u64::MAX)
    }

    /// Creates a store that holds at most `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Overwrites a blob's bytes without re-addressing it, as disk corruption would.
    pub fn replace_unchecked(&self, handle: &BlobHandle, data: impl Into<Bytes>) {
        self.blobs.write().insert(handle.clone(), data.into());
    }

    fn used(&self) -> u64 {
        self.blobs.read().values().map(|b| b.len() as u64).sum()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, data: &[u8]) -> StoreResult<BlobHandle> {
        let handle = BlobHandle::for_bytes(data);
        let mut blobs = self.blobs.write();
        if let Some(existing) = blobs.get(&handle) {
            if BlobHandle::for_bytes(existing) == handle {
                return Ok(handle);
            }
            blobs.remove(&handle);
        }
        let used: u64 = blobs.values().map(|b| b.len() as u64).sum();
        let available = self.capacity.saturating_sub(used);
        if data.len() as u64 > available {
            return Err(StoreError::Full {
                needed: data.len() as u64,
                available,
            });
        }
        blobs.insert(handle.clone(), Bytes::copy_from_slice(data));
        Ok(handle)
    }

    fn get(&self, handle: &BlobHandle) -> StoreResult<Option<Bytes>> {
        Ok(self.blobs.read().get(handle).cloned())
    }

    fn delete(&self, handle: &BlobHandle) -> StoreResult<bool> {
        Ok(self.blobs.write().remove(handle).is_some())
    }

    fn available_space(&self) -> StoreResult<u64> {
        Ok(self.capacity.saturating_sub(self.used()))
    }
}

/// Filesystem blob store. Free space is reported by the underlying volume.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens or creates a blob directory under `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let root = path.join(BLOBS_DIR);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the file backing a blob.
    pub fn blob_path(&self, handle: &BlobHandle) -> PathBuf {
        self.root.join(handle.as_str())
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> StoreResult<BlobHandle> {
        let handle = BlobHandle::for_bytes(data);
        let target = self.blob_path(&handle);
        let intact = match fs::read(&target) {
            Ok(existing) => BlobHandle::for_bytes(&existing) == handle,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if !intact {
            write_atomic(&self.root, &target, data)?;
        }
        Ok(handle)
    }

    fn get(&self, handle: &BlobHandle) -> StoreResult<Option<Bytes>> {
        match fs::read(self.blob_path(handle)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, handle: &BlobHandle) -> StoreResult<bool> {
        match fs::remove_file(self.blob_path(handle)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn available_space(&self) -> StoreResult<u64> {
        Ok(fs2::available_space(&self.root)?)
    }
}
