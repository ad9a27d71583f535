//! Object storage behind signed URLs.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A blob bucket keyed by asset path.
pub trait ObjectStore: Send + Sync {
    /// Returns the object at `path`.
    fn get(&self, path: &str) -> Option<Bytes>;

    /// Stores an object, replacing any previous one.
    fn put(&self, path: &str, data: Bytes);

    /// Deletes an object. Returns true if it existed.
    fn delete(&self, path: &str) -> bool;

    /// Returns true if an object exists at `path`.
    fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, path: &str) -> Option<Bytes> {
        self.objects.read().get(path).cloned()
    }

    fn put(&self, path: &str, data: Bytes) {
        self.objects.write().insert(path.to_string(), data);
    }

    fn delete(&self, path: &str) -> bool {
        self.objects.write().remove(path).is_some()
    }

    fn contains(&self, path: &str) -> bool {
        self.objects.read().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryObjectStore::new();
        assert!(store.is_empty());

        store.put("audio/a.mp3", Bytes::from_static(b"abc"));
        assert_eq!(store.get("audio/a.mp3"), Some(Bytes::from_static(b"abc")));
        assert!(store.contains("audio/a.mp3"));
        assert_eq!(store.len(), 1);

        assert!(store.delete("audio/a.mp3"));
        assert!(!store.delete("audio/a.mp3"));
        assert!(store.get("audio/a.mp3").is_none());
    }
}
