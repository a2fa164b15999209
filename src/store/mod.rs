//! Ephemeral Object Store
//!
//! Time-bounded storage for text snippets and file metadata, keyed by short
//! human-typable identifiers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           Object Store                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐   ┌──────────────────┐   ┌───────────────────┐   │
//! │  │ ShardedMap         │   │ IdGenerator      │   │ BlobStore         │   │
//! │  │ id -> Arc<Item>    │◀──│ 4 chars, 100     │   │ file bodies       │   │
//! │  │ (64-way RwLock)    │   │ tries, 6 chars   │   │ (memory / disk)   │   │
//! │  └────────────────────┘   └──────────────────┘   └───────────────────┘   │
//! │            │                                               ▲             │
//! │            └──────────── sweep(now) releases ──────────────┘             │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Expiry
//!
//! - Lazy: `get` hides items once `now >= expires_at`
//! - Eager: the reaper calls `sweep(now)` periodically to reclaim memory

pub mod blob;
pub mod id;
mod item;
mod object_store;
mod shard;

pub use blob::{BlobHandle, BlobStore, BlobStoreStats, FsBlobStore, InMemoryBlobStore};
pub use id::{IdGenerator, KeySpace};
pub use item::{FileRef, Item, ItemId, ItemKind, Payload};
pub use object_store::{ObjectStore, SweepReport};
pub use shard::ShardedMap;

/// Default time-to-live for stored items (24 hours)
pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Default maximum file body size (10 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
