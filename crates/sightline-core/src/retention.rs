//! Retention: TTL and capacity eviction of buckets.
//!
//! Buckets are ranked by `fetched_at` descending; equal instants rank by
//! `content_id` ascending, so among equally old buckets the lexicographically
//! smaller id survives longest. A sweep evicts the union of
//!
//! - every bucket ranked at or beyond `max_buckets`, and
//! - every bucket with `now - fetched_at > ttl`.
//!
//! Deletion is per id: one failed delete is logged and never blocks the
//! rest of the batch.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::to_delta;
use crate::model::ContentId;
use crate::storage::{BucketMeta, Storage};

/// Default time-to-live: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Bucket cap under the constrained tier.
pub const CONSTRAINED_MAX_BUCKETS: usize = 3;

/// Eviction limits. Configuration, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    /// Capacity bound; `None` is unbounded.
    pub max_buckets: Option<usize>,
    /// Maximum age since the bucket's last write.
    pub ttl: Duration,
}

impl RetentionPolicy {
    /// Constrained tier: 3 buckets, 24 h.
    #[must_use]
    pub const fn constrained() -> Self {
        Self {
            max_buckets: Some(CONSTRAINED_MAX_BUCKETS),
            ttl: DEFAULT_TTL,
        }
    }

    /// Expanded tier: unbounded capacity, 24 h.
    #[must_use]
    pub const fn expanded() -> Self {
        Self {
            max_buckets: None,
            ttl: DEFAULT_TTL,
        }
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_max_buckets(mut self, max_buckets: Option<usize>) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    /// Whether a bucket last written at `fetched_at` has outlived the TTL.
    #[must_use]
    pub fn is_expired(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(fetched_at) > to_delta(self.ttl)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::constrained()
    }
}

/// Retention order: newest first, then smaller id first.
#[must_use]
pub fn rank_order(a: &BucketMeta, b: &BucketMeta) -> Ordering {
    b.fetched_at
        .cmp(&a.fetched_at)
        .then_with(|| a.content_id.cmp(&b.content_id))
}

/// Ids to evict from `metas` under `policy` at `now`, in rank order.
///
/// Duplicate ids are collapsed, keeping the newest `fetched_at`.
#[must_use]
pub fn plan(metas: &[BucketMeta], policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<ContentId> {
    let mut newest: BTreeMap<&ContentId, &BucketMeta> = BTreeMap::new();
    for meta in metas {
        newest
            .entry(&meta.content_id)
            .and_modify(|seen| {
                if meta.fetched_at > seen.fetched_at {
                    *seen = meta;
                }
            })
            .or_insert(meta);
    }

    let mut ranked: Vec<&BucketMeta> = newest.into_values().collect();
    ranked.sort_by(|a, b| rank_order(a, b));

    let capacity = policy.max_buckets.unwrap_or(usize::MAX);
    ranked
        .into_iter()
        .enumerate()
        .filter(|(rank, meta)| *rank >= capacity || policy.is_expired(meta.fetched_at, now))
        .map(|(_, meta)| meta.content_id.clone())
        .collect()
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Every id the policy evicts. Callers drop these from memory.
    pub evicted: Vec<ContentId>,
    /// Evicted ids whose storage deletion failed; retried by the next sweep.
    pub failed: Vec<ContentId>,
    /// Listing storage failed and only resident buckets were considered.
    pub listing_failed: bool,
}

/// Run one sweep over the stored buckets plus the `resident` in-memory ones.
pub fn sweep<S: Storage + ?Sized>(
    storage: &mut S,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    resident: &[BucketMeta],
) -> SweepReport {
    let mut report = SweepReport::default();

    let mut candidates = match storage.list_buckets() {
        Ok(stored) => stored,
        Err(error) => {
            warn!(code = %error.code(), %error, "bucket listing failed; sweeping resident buckets only");
            report.listing_failed = true;
            Vec::new()
        }
    };
    candidates.extend_from_slice(resident);

    report.evicted = plan(&candidates, policy, now);
    if report.evicted.is_empty() {
        debug!(candidates = candidates.len(), "sweep found nothing to evict");
        return report;
    }

    for (content_id, outcome) in storage.delete_buckets(&report.evicted) {
        match outcome {
            Ok(existed) => debug!(%content_id, existed, "evicted bucket"),
            Err(error) => {
                warn!(%content_id, code = %error.code(), %error, "failed to delete evicted bucket");
                report.failed.push(content_id);
            }
        }
    }

    info!(
        evicted = report.evicted.len(),
        failed = report.failed.len(),
        "retention sweep"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BucketDocument, MemoryStorage};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    fn meta(id: &str, millis: i64) -> BucketMeta {
        BucketMeta {
            content_id: ContentId::new(id).unwrap(),
            fetched_at: at(millis),
            record_count: 0,
        }
    }

    fn ids(list: &[ContentId]) -> Vec<&str> {
        list.iter().map(ContentId::as_str).collect()
    }

    #[test]
    fn capacity_evicts_oldest() {
        let metas = [meta("S1", 0), meta("S2", 1), meta("S3", 2), meta("S4", 3)];
        let evicted = plan(&metas, &RetentionPolicy::constrained(), at(10));
        assert_eq!(ids(&evicted), vec!["S1"]);
    }

    #[test]
    fn capacity_tie_evicts_larger_id_first() {
        let metas = [meta("b", 5), meta("a", 5), meta("c", 5)];
        let policy = RetentionPolicy::expanded().with_max_buckets(Some(2));
        assert_eq!(ids(&plan(&metas, &policy, at(5))), vec!["c"]);

        let policy = RetentionPolicy::expanded().with_max_buckets(Some(1));
        assert_eq!(ids(&plan(&metas, &policy, at(5))), vec!["b", "c"]);
    }

    #[test]
    fn ttl_is_strictly_greater_than() {
        let policy = RetentionPolicy::expanded().with_ttl(Duration::from_millis(1_000));
        let metas = [meta("S1", 0)];
        assert!(plan(&metas, &policy, at(1_000)).is_empty());
        assert_eq!(ids(&plan(&metas, &policy, at(1_001))), vec!["S1"]);
    }

    #[test]
    fn union_of_age_and_capacity() {
        let policy = RetentionPolicy::expanded()
            .with_max_buckets(Some(2))
            .with_ttl(Duration::from_millis(100));
        let metas = [meta("old", 0), meta("mid", 500), meta("new", 600), meta("newest", 650)];
        let evicted = plan(&metas, &policy, at(650));
        assert_eq!(ids(&evicted), vec!["mid", "old"]);
    }

    #[test]
    fn duplicate_candidates_keep_newest_instant() {
        let policy = RetentionPolicy::expanded().with_ttl(Duration::from_millis(100));
        let metas = [meta("S1", 0), meta("S1", 900)];
        assert!(plan(&metas, &policy, at(950)).is_empty());
    }

    #[test]
    fn unbounded_policy_keeps_everything_fresh() {
        let metas: Vec<_> = (0..50).map(|i| meta(&format!("S{i}"), i)).collect();
        assert!(plan(&metas, &RetentionPolicy::expanded(), at(100)).is_empty());
    }

    fn stored(storage: &mut MemoryStorage, id: &str, millis: i64) {
        storage
            .put_bucket(&BucketDocument {
                content_id: ContentId::new(id).unwrap(),
                fetched_at: at(millis),
                reported_total: None,
                records: Vec::new(),
            })
            .unwrap();
    }

    #[test]
    fn sweep_deletes_and_reports_failures_without_stopping() {
        let mut storage = MemoryStorage::new();
        for (i, id) in ["S1", "S2", "S3", "S4", "S5"].iter().enumerate() {
            stored(&mut storage, id, i64::try_from(i).unwrap());
        }
        storage.faults.fail_deletes.insert(ContentId::new("S1").unwrap());

        let report = sweep(&mut storage, &RetentionPolicy::constrained(), at(10), &[]);
        assert_eq!(ids(&report.evicted), vec!["S2", "S1"]);
        assert_eq!(ids(&report.failed), vec!["S1"]);
        assert!(!storage.contains_bucket(&ContentId::new("S2").unwrap()));
        assert_eq!(storage.bucket_count(), 4);
    }

    #[test]
    fn sweep_falls_back_to_resident_metas_when_listing_fails() {
        let mut storage = MemoryStorage::new();
        storage.faults.fail_listing = true;
        let resident = [meta("S1", 0), meta("S2", 1), meta("S3", 2), meta("S4", 3)];

        let report = sweep(&mut storage, &RetentionPolicy::constrained(), at(10), &resident);
        assert!(report.listing_failed);
        assert_eq!(ids(&report.evicted), vec!["S1"]);
        assert!(report.failed.is_empty());
    }
}
