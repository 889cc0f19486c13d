//! Durable document storage for buckets and checkpoints.
//!
//! Persisted layout:
//!
//! - Bucket document `{ contentId, fetchedAt, reportedTotal, records }`,
//!   keyed by `contentId`. Always written as a full snapshot.
//! - Checkpoint document `{ ownerId, timestamp }`, keyed by `ownerId`.
//!
//! Storage is best-effort from the engine's point of view: every error is
//! returned to the caller, which logs it and keeps its in-memory state
//! authoritative.

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::{ContentId, OwnerId, ViewerRecord};

pub use memory::{FaultPlan, MemoryStorage};
pub use sqlite::SqliteStorage;

/// Full-bucket snapshot as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDocument {
    pub content_id: ContentId,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub reported_total: Option<u64>,
    #[serde(default)]
    pub records: Vec<ViewerRecord>,
}

/// Last-review instant for one owner, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDocument {
    pub owner_id: OwnerId,
    pub timestamp: DateTime<Utc>,
}

/// Lightweight listing entry used by retention and `sight list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMeta {
    pub content_id: ContentId,
    pub fetched_at: DateTime<Utc>,
    pub record_count: usize,
}

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to open store at {path}: {detail}")]
    Open { path: PathBuf, detail: String },

    #[error("store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("failed to read {what}: {source}")]
    Read {
        what: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to write {what}: {source}")]
    Write {
        what: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("stored {what} is corrupt: {detail}")]
    Corrupt { what: String, detail: String },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("batch aborted: {0}")]
    BatchAborted(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether the stored content itself is unusable, as opposed to the
    /// store being temporarily unreadable.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    /// Machine-readable code associated with this storage error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Open { .. } | Self::Read { .. } => ErrorCode::StorageReadFailed,
            Self::SchemaTooNew { .. } => ErrorCode::SchemaTooNew,
            Self::Corrupt { .. } => ErrorCode::CorruptDocument,
            Self::Write { .. }
            | Self::Encode { .. }
            | Self::BatchAborted(_)
            | Self::Unavailable(_) => ErrorCode::StorageWriteFailed,
        }
    }
}

/// Outcome of deleting one bucket as part of a batch.
pub type DeleteOutcome = (ContentId, Result<bool, StorageError>);

/// Key/document store used by the engine.
///
/// Implementations must treat each call independently: one failing call
/// never poisons later ones.
pub trait Storage {
    /// Insert or replace a bucket document.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the document cannot be encoded or written.
    fn put_bucket(&mut self, doc: &BucketDocument) -> Result<(), StorageError>;

    /// Load a bucket document, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on read failure or undecodable content.
    fn load_bucket(&self, content_id: &ContentId) -> Result<Option<BucketDocument>, StorageError>;

    /// List every stored bucket, newest `fetched_at` first.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on read failure.
    fn list_buckets(&self) -> Result<Vec<BucketMeta>, StorageError>;

    /// Delete one bucket. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on write failure.
    fn delete_bucket(&mut self, content_id: &ContentId) -> Result<bool, StorageError>;

    /// Delete a batch of buckets, reporting each outcome separately.
    fn delete_buckets(&mut self, content_ids: &[ContentId]) -> Vec<DeleteOutcome> {
        content_ids
            .iter()
            .map(|id| (id.clone(), self.delete_bucket(id)))
            .collect()
    }

    /// Insert or replace a checkpoint document.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the document cannot be written.
    fn put_checkpoint(&mut self, doc: &CheckpointDocument) -> Result<(), StorageError>;

    /// Load a checkpoint document, `None` if the owner never reviewed.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on read failure or undecodable content.
    fn load_checkpoint(&self, owner_id: &OwnerId)
    -> Result<Option<CheckpointDocument>, StorageError>;
}
