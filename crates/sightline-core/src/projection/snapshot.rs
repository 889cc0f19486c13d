//! Immutable, denormalized projection of one bucket for one owner.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bucket::Bucket;
use crate::checkpoint::is_new;
use crate::model::{ContentId, OwnerId, ViewerRecord};

/// One row of the flattened list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerRow {
    #[serde(flatten)]
    pub record: ViewerRecord,
    /// Captured after the owner's checkpoint.
    pub is_new: bool,
}

/// Read-optimized view handed to presentation.
///
/// Every field is computed from one read of the bucket and checkpoint, so a
/// snapshot is always self-consistent. Snapshots are replaced wholesale,
/// never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSnapshot {
    pub content_id: ContentId,
    pub owner_id: OwnerId,
    /// Number of deduplicated records held locally.
    pub total: usize,
    pub new_count: usize,
    /// Count reported by the source, possibly larger than `total`.
    pub reported_total: Option<u64>,
    pub follower_count: usize,
    pub reaction_count: usize,
    /// Checkpoint the novelty flags were computed against.
    pub checkpoint: Option<DateTime<Utc>>,
    /// Newest capture first; equal instants by id.
    pub records: Vec<ViewerRow>,
    pub generation: u64,
    pub built_at: DateTime<Utc>,
}

impl ProjectionSnapshot {
    /// Build a snapshot from the bucket (absent means empty) and checkpoint.
    #[must_use]
    pub fn build(
        content_id: ContentId,
        owner_id: OwnerId,
        bucket: Option<&Bucket>,
        checkpoint: Option<DateTime<Utc>>,
        generation: u64,
        built_at: DateTime<Utc>,
    ) -> Self {
        let mut records: Vec<ViewerRow> = bucket
            .into_iter()
            .flat_map(Bucket::records)
            .map(|record| ViewerRow {
                is_new: is_new(record, checkpoint),
                record: record.clone(),
            })
            .collect();
        records.sort_by(|a, b| {
            b.record
                .captured_at
                .cmp(&a.record.captured_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });

        Self {
            content_id,
            owner_id,
            total: records.len(),
            new_count: records.iter().filter(|row| row.is_new).count(),
            reported_total: bucket.and_then(Bucket::reported_total),
            follower_count: records.iter().filter(|row| row.record.follows_subject).count(),
            reaction_count: records.iter().filter(|row| row.record.reaction.is_some()).count(),
            checkpoint,
            records,
            generation,
            built_at,
        }
    }

    /// Rows flagged as new, in display order.
    pub fn new_rows(&self) -> impl Iterator<Item = &ViewerRow> {
        self.records.iter().filter(|row| row.is_new)
    }
}
