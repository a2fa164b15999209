//! Stored Item Types
//!
//! An [`Item`] is immutable once built. The store hands out `Arc<Item>` so a
//! reader always sees a fully constructed value.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::blob::BlobHandle;

/// Short identifier of a stored item
pub type ItemId = String;

/// Item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Inline text snippet
    Text,
    /// File body held by the blob store
    File,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::File => "file",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a file body plus the metadata served with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Handle into the blob store
    pub handle: BlobHandle,
    /// Original file name as uploaded
    pub name: String,
    /// Media type as uploaded
    pub content_type: String,
    /// Body size in bytes
    pub size: u64,
}

/// Item payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    File(FileRef),
}

impl Payload {
    /// Kind implied by this payload
    #[inline]
    pub fn kind(&self) -> ItemKind {
        match self {
            Payload::Text(_) => ItemKind::Text,
            Payload::File(_) => ItemKind::File,
        }
    }

    /// Size in bytes of the content this payload stands for
    pub fn size(&self) -> u64 {
        match self {
            Payload::Text(text) => text.len() as u64,
            Payload::File(file) => file.size,
        }
    }
}

/// A stored item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    id: ItemId,
    payload: Payload,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Item {
    /// Build an item. Callers guarantee `expires_at > created_at`.
    pub(crate) fn new(
        id: ItemId,
        payload: Payload,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(expires_at > created_at);
        Self {
            id,
            payload,
            created_at,
            expires_at,
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> ItemKind {
        self.payload.kind()
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Text content, if this is a text item
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::File(_) => None,
        }
    }

    /// File reference, if this is a file item
    pub fn file(&self) -> Option<&FileRef> {
        match &self.payload {
            Payload::File(file) => Some(file),
            Payload::Text(_) => None,
        }
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Expired once `now` reaches `expires_at`
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Tests
// =============================================================================
