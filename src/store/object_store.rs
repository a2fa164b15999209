//! Object Store - TTL-bounded item index
//!
//! Items become invisible to [`ObjectStore::get`] the moment `now` reaches
//! their `expires_at`, whether or not a sweep has physically removed them
//! yet. The periodic [`ObjectStore::sweep`] reclaims memory and blob bodies.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::blob::BlobStore;
use super::id::{IdGenerator, KeySpace};
use super::item::{Item, ItemId, ItemKind, Payload};
use super::shard::ShardedMap;
use crate::clock::Clock;
use crate::error::{Error, Result};

/// Outcome of a sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items removed from the index
    pub removed: usize,
    /// Blob releases that failed (the index entry is still removed)
    pub release_failures: usize,
}

/// Concurrent TTL-bounded item store
pub struct ObjectStore {
    items: ShardedMap<ItemId, Arc<Item>>,
    ids: IdGenerator,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl ObjectStore {
    /// Create a store over the given blob backend and clock
    pub fn new(blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: ShardedMap::new(),
            ids: IdGenerator::new(),
            blobs,
            clock,
        }
    }

    /// Blob backend holding file bodies
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Insert a new item living for `ttl`, returning its identifier.
    ///
    /// Never overwrites: an identifier that turns out to be taken at insert
    /// time fails the put with [`Error::IdCollision`].
    pub fn put(&self, payload: Payload, ttl: Duration) -> Result<ItemId> {
        self.put_item(payload, ttl).map(|item| item.id().to_owned())
    }

    /// Same as [`put`](Self::put), returning the stored item itself
    pub fn put_item(&self, payload: Payload, ttl: Duration) -> Result<Arc<Item>> {
        if ttl.is_zero() {
            return Err(Error::InvalidTtl("TTL must be positive".into()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::InvalidTtl(format!("{:?} out of range: {}", ttl, e)))?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::InvalidTtl("expiry overflows the calendar".into()))?;

        let id = self.ids.generate(self);
        let kind = payload.kind();
        let item = Arc::new(Item::new(id.clone(), payload, now, expires_at));

        if self
            .items
            .insert_if_absent(id.clone(), Arc::clone(&item))
            .is_err()
        {
            error!(id = %id, "generated identifier already present, refusing to overwrite");
            return Err(Error::IdCollision(id));
        }

        debug!(
            id = %id,
            %kind,
            size = item.payload().size(),
            expires_at = %expires_at,
            "stored item"
        );
        Ok(item)
    }

    /// Look up a live item
    pub fn get(&self, id: &str) -> Result<Arc<Item>> {
        let now = self.clock.now();
        match self.items.get(id) {
            Some(item) if !item.is_expired_at(now) => Ok(item),
            _ => Err(Error::NotFound),
        }
    }

    /// Look up a live item of a specific kind. A kind mismatch is NotFound.
    pub fn get_kind(&self, id: &str, kind: ItemKind) -> Result<Arc<Item>> {
        let item = self.get(id)?;
        if item.kind() != kind {
            return Err(Error::NotFound);
        }
        Ok(item)
    }

    /// Remove an item if present. Idempotent.
    ///
    /// Returns true only when a live item was removed by this call. The file
    /// body is released before the index entry is dropped.
    pub fn delete(&self, id: &str) -> bool {
        let Some(item) = self.items.get(id) else {
            return false;
        };
        self.release_body(&item);

        let removed = self
            .items
            .remove_if(id, |current| Arc::ptr_eq(current, &item))
            .is_some();
        if removed {
            debug!(id = %id, "deleted item");
        }
        removed && !item.is_expired_at(self.clock.now())
    }

    /// Remove every item with `expires_at <= now`, returning the count removed
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.sweep_report(now).removed
    }

    /// Sweep with per-item failure accounting.
    ///
    /// Candidates are snapshotted under shard read locks. Each body is
    /// released first, then the entry is dropped under its shard write lock
    /// if it is still the same expired item.
    pub fn sweep_report(&self, now: DateTime<Utc>) -> SweepReport {
        let candidates = self.items.keys_where(|item| item.is_expired_at(now));
        let mut report = SweepReport::default();

        for id in candidates {
            let Some(item) = self.items.get(&id) else {
                continue;
            };
            if !item.is_expired_at(now) {
                continue;
            }
            let released = self.release_body(&item);
            if self
                .items
                .remove_if(&id, |current| Arc::ptr_eq(current, &item))
                .is_none()
            {
                continue;
            }
            report.removed += 1;
            if !released {
                report.release_failures += 1;
            }
        }

        if report.removed > 0 {
            debug!(
                removed = report.removed,
                release_failures = report.release_failures,
                "sweep complete"
            );
        }
        report
    }

    /// Physically present items, expired or not
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Physically present, regardless of expiry
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    fn release_body(&self, item: &Item) -> bool {
        let Some(file) = item.file() else {
            return true;
        };
        match self.blobs.release(&file.handle) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %item.id(), blob = %file.handle, "failed to release blob: {}", e);
                false
            }
        }
    }
}

impl KeySpace for ObjectStore {
    fn contains_id(&self, id: &str) -> bool {
        self.contains(id)
    }
}

// =============================================================================
// Tests
// =============================================================================
