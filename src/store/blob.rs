//! Blob Storage Collaborator
//!
//! File bodies live outside the object store. The store only keeps a
//! [`BlobHandle`] and asks the backend to release the body when the item
//! is deleted or swept.
//!
//! # Design
//!
//! - Synchronous trait: callers on the async runtime wrap filesystem-backed
//!   calls in `spawn_blocking`
//! - In-memory backend for tests and diskless deployments
//! - Filesystem backend purges leftovers from a previous process at startup

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque reference to a stored body
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Fresh random handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blob storage backend trait
pub trait BlobStore: Send + Sync {
    /// Store a body and return its handle
    fn write(&self, data: Bytes) -> Result<BlobHandle>;

    /// Read a body back. A released or unknown handle is [`Error::NotFound`].
    fn read(&self, handle: &BlobHandle) -> Result<Bytes>;

    /// Release a body. Releasing an unknown handle is not an error.
    fn release(&self, handle: &BlobHandle) -> Result<()>;

    /// Drop every stored body, returning how many were removed
    fn purge(&self) -> Result<usize>;

    /// Get storage statistics
    fn stats(&self) -> BlobStoreStats;
}

/// Blob backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStoreStats {
    /// Bodies currently held
    pub blob_count: u64,
    /// Bytes currently held
    pub total_bytes: u64,
    /// Release calls that removed a body
    pub releases: u64,
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// In-memory blob backend
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<BlobHandle, Bytes>,
    total_bytes: AtomicU64,
    releases: AtomicU64,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write(&self, data: Bytes) -> Result<BlobHandle> {
        let handle = BlobHandle::generate();
        self.total_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.blobs.insert(handle.clone(), data);
        Ok(handle)
    }

    fn read(&self, handle: &BlobHandle) -> Result<Bytes> {
        self.blobs
            .get(handle)
            .map(|data| data.clone())
            .ok_or(Error::NotFound)
    }

    fn release(&self, handle: &BlobHandle) -> Result<()> {
        if let Some((_, data)) = self.blobs.remove(handle) {
            self.total_bytes
                .fetch_sub(data.len() as u64, Ordering::Relaxed);
            self.releases.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn purge(&self) -> Result<usize> {
        let removed = self.blobs.len();
        self.blobs.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(removed)
    }

    fn stats(&self) -> BlobStoreStats {
        BlobStoreStats {
            blob_count: self.blobs.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Filesystem Backend
// =============================================================================

/// Filesystem blob backend: one file per body under `root`
pub struct FsBlobStore {
    root: PathBuf,
    blob_count: AtomicU64,
    total_bytes: AtomicU64,
    releases: AtomicU64,
}

impl FsBlobStore {
    /// Open (creating if needed) the blob directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("Blob store directory: {}", root.display());
        Ok(Self {
            root,
            blob_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        })
    }

    /// Blob directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &BlobHandle) -> Result<PathBuf> {
        // Handles are generated hex strings; anything else never maps to a path
        if handle.as_str().is_empty()
            || !handle.as_str().chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Blob(format!("malformed blob handle {:?}", handle.as_str())));
        }
        Ok(self.root.join(handle.as_str()))
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, data: Bytes) -> Result<BlobHandle> {
        let handle = BlobHandle::generate();
        let path = self.path_for(&handle)?;
        fs::write(&path, &data)
            .map_err(|e| Error::Blob(format!("write {}: {}", path.display(), e)))?;
        self.blob_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(handle)
    }

    fn read(&self, handle: &BlobHandle) -> Result<Bytes> {
        let path = self.path_for(handle)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(Error::Blob(format!("read {}: {}", path.display(), e))),
        }
    }

    fn release(&self, handle: &BlobHandle) -> Result<()> {
        let path = self.path_for(handle)?;
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Blob(format!("stat {}: {}", path.display(), e))),
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                self.blob_count.fetch_sub(1, Ordering::Relaxed);
                self.total_bytes.fetch_sub(size, Ordering::Relaxed);
                self.releases.fetch_add(1, Ordering::Relaxed);
                debug!(blob = %handle, size, "released blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Blob(format!("remove {}: {}", path.display(), e))),
        }
    }

    fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        self.blob_count.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(removed)
    }

    fn stats(&self) -> BlobStoreStats {
        BlobStoreStats {
            blob_count: self.blob_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("clipdrop-blob-{}", Uuid::new_v4().simple()))
    }

    #[test]
    fn test_in_memory_write_read_release() {
        let store = InMemoryBlobStore::new();
        let handle = store.write(Bytes::from_static(b"body")).unwrap();

        assert_eq!(store.read(&handle).unwrap().as_ref(), b"body");
        assert_eq!(store.stats().blob_count, 1);
        assert_eq!(store.stats().total_bytes, 4);

        store.release(&handle).unwrap();
        assert!(matches!(store.read(&handle), Err(Error::NotFound)));
        assert_eq!(store.stats().releases, 1);
        assert_eq!(store.stats().total_bytes, 0);

        // Second release is a no-op
        store.release(&handle).unwrap();
        assert_eq!(store.stats().releases, 1);
    }

    #[test]
    fn test_fs_write_read_release() {
        let root = temp_root();
        let store = FsBlobStore::open(&root).unwrap();

        let handle = store.write(Bytes::from_static(b"file body")).unwrap();
        assert!(root.join(handle.as_str()).exists());
        assert_eq!(store.read(&handle).unwrap().as_ref(), b"file body");

        store.release(&handle).unwrap();
        assert!(!root.join(handle.as_str()).exists());
        assert!(matches!(store.read(&handle), Err(Error::NotFound)));
        store.release(&handle).unwrap();
        assert_eq!(store.stats().releases, 1);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_fs_purge_removes_leftovers() {
        let root = temp_root();
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("stale1"), b"old").unwrap();
        fs::write(root.join("stale2"), b"old").unwrap();

        let store = FsBlobStore::open(&root).unwrap();
        assert_eq!(store.purge().unwrap(), 2);
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_fs_rejects_malformed_handle() {
        let root = temp_root();
        let store = FsBlobStore::open(&root).unwrap();

        let result = store.read(&BlobHandle::new("../etc/passwd"));
        assert!(matches!(result, Err(Error::Blob(_))));

        fs::remove_dir_all(&root).unwrap();
    }
}
