//! Per-owner review checkpoints.
//!
//! A checkpoint is the instant an owner last reviewed their content. It
//! only ever moves forward. Records captured strictly after it are "new";
//! with no checkpoint every record is new.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::model::{OwnerId, ViewerRecord};
use crate::storage::{CheckpointDocument, Storage};

/// Sole writer of checkpoint state.
///
/// In-memory values are authoritative: once an owner's checkpoint is known
/// here, storage is only written to, never consulted again.
#[derive(Debug, Default)]
pub struct CheckpointManager {
    known: HashMap<OwnerId, DateTime<Utc>>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner's checkpoint, reading storage when it is not known yet.
    ///
    /// A load failure is logged and treated as "no checkpoint".
    pub fn get<S: Storage + ?Sized>(
        &self,
        owner_id: &OwnerId,
        storage: &S,
    ) -> Option<DateTime<Utc>> {
        if let Some(known) = self.known.get(owner_id) {
            return Some(*known);
        }
        match storage.load_checkpoint(owner_id) {
            Ok(doc) => doc.map(|doc| doc.timestamp),
            Err(error) => {
                warn!(%owner_id, code = %error.code(), %error, "failed to load checkpoint; treating every record as new");
                None
            }
        }
    }

    /// Like [`CheckpointManager::get`], remembering a successfully loaded value.
    pub fn prime<S: Storage + ?Sized>(
        &mut self,
        owner_id: &OwnerId,
        storage: &S,
    ) -> Option<DateTime<Utc>> {
        let value = self.get(owner_id, storage);
        if let Some(at) = value {
            self.known.entry(owner_id.clone()).or_insert(at);
        }
        value
    }

    /// In-memory value only.
    #[must_use]
    pub fn peek(&self, owner_id: &OwnerId) -> Option<DateTime<Utc>> {
        self.known.get(owner_id).copied()
    }

    /// Move the owner's checkpoint to `now`, never backwards.
    ///
    /// Returns the resulting checkpoint. A persistence failure is logged and
    /// the in-memory value still advances.
    pub fn advance<S: Storage + ?Sized>(
        &mut self,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
        storage: &mut S,
    ) -> DateTime<Utc> {
        let previous = self.get(owner_id, storage);
        let next = previous.map_or(now, |previous| previous.max(now));
        self.known.insert(owner_id.clone(), next);

        let doc = CheckpointDocument {
            owner_id: owner_id.clone(),
            timestamp: next,
        };
        if let Err(error) = storage.put_checkpoint(&doc) {
            warn!(%owner_id, code = %error.code(), %error, "failed to persist checkpoint; keeping in memory");
        }

        info!(%owner_id, checkpoint = %next, "advanced checkpoint");
        next
    }
}

/// Whether `record` counts as new relative to `checkpoint`.
#[must_use]
pub fn is_new(record: &ViewerRecord, checkpoint: Option<DateTime<Utc>>) -> bool {
    checkpoint.is_none_or(|checkpoint| record.captured_at > checkpoint)
}
