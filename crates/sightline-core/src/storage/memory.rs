//! In-memory [`Storage`] with switchable failures.
//!
//! Used for ephemeral sessions and for exercising the best-effort
//! persistence paths: every operation consults the [`FaultPlan`] first.

use std::collections::{BTreeMap, BTreeSet};

use super::{BucketDocument, BucketMeta, CheckpointDocument, Storage, StorageError};
use crate::model::{ContentId, OwnerId};

/// Which operations should fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_bucket_writes: bool,
    pub fail_bucket_loads: bool,
    /// Report every stored bucket as undecodable.
    pub corrupt_bucket_loads: bool,
    pub fail_listing: bool,
    pub fail_checkpoint_writes: bool,
    pub fail_checkpoint_loads: bool,
    /// Buckets whose deletion fails.
    pub fail_deletes: BTreeSet<ContentId>,
}

/// `BTreeMap`-backed document store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: BTreeMap<ContentId, BucketDocument>,
    checkpoints: BTreeMap<OwnerId, CheckpointDocument>,
    /// Failure switches, freely adjustable between calls.
    pub faults: FaultPlan,
    /// Successful bucket writes so far.
    pub bucket_writes: usize,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Whether a bucket is stored.
    #[must_use]
    pub fn contains_bucket(&self, content_id: &ContentId) -> bool {
        self.buckets.contains_key(content_id)
    }
}

fn injected(op: &str) -> StorageError {
    StorageError::Unavailable(format!("injected {op} failure"))
}

impl Storage for MemoryStorage {
    fn put_bucket(&mut self, doc: &BucketDocument) -> Result<(), StorageError> {
        if self.faults.fail_bucket_writes {
            return Err(injected("bucket write"));
        }
        self.buckets.insert(doc.content_id.clone(), doc.clone());
        self.bucket_writes += 1;
        Ok(())
    }

    fn load_bucket(&self, content_id: &ContentId) -> Result<Option<BucketDocument>, StorageError> {
        if self.faults.fail_bucket_loads {
            return Err(injected("bucket load"));
        }
        if self.faults.corrupt_bucket_loads && self.buckets.contains_key(content_id) {
            return Err(StorageError::Corrupt {
                what: format!("bucket {content_id}"),
                detail: "injected decode failure".to_string(),
            });
        }
        Ok(self.buckets.get(content_id).cloned())
    }

    fn list_buckets(&self) -> Result<Vec<BucketMeta>, StorageError> {
        if self.faults.fail_listing {
            return Err(injected("listing"));
        }
        let mut metas: Vec<BucketMeta> = self
            .buckets
            .values()
            .map(|doc| BucketMeta {
                content_id: doc.content_id.clone(),
                fetched_at: doc.fetched_at,
                record_count: doc.records.len(),
            })
            .collect();
        metas.sort_by(|a, b| {
            b.fetched_at
                .cmp(&a.fetched_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        Ok(metas)
    }

    fn delete_bucket(&mut self, content_id: &ContentId) -> Result<bool, StorageError> {
        if self.faults.fail_deletes.contains(content_id) {
            return Err(injected("delete"));
        }
        Ok(self.buckets.remove(content_id).is_some())
    }

    fn put_checkpoint(&mut self, doc: &CheckpointDocument) -> Result<(), StorageError> {
        if self.faults.fail_checkpoint_writes {
            return Err(injected("checkpoint write"));
        }
        let keep_existing = self
            .checkpoints
            .get(&doc.owner_id)
            .is_some_and(|existing| existing.timestamp > doc.timestamp);
        if !keep_existing {
            self.checkpoints.insert(doc.owner_id.clone(), doc.clone());
        }
        Ok(())
    }

    fn load_checkpoint(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<CheckpointDocument>, StorageError> {
        if self.faults.fail_checkpoint_loads {
            return Err(injected("checkpoint load"));
        }
        Ok(self.checkpoints.get(owner_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn doc(id: &str, millis: i64) -> BucketDocument {
        BucketDocument {
            content_id: ContentId::new(id).unwrap(),
            fetched_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap(),
            reported_total: None,
            records: Vec::new(),
        }
    }

    #[test]
    fn injected_write_failure_leaves_store_untouched() {
        let mut storage = MemoryStorage::new();
        storage.faults.fail_bucket_writes = true;
        let err = storage.put_bucket(&doc("S1", 0)).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StorageWriteFailed);
        assert_eq!(storage.bucket_count(), 0);

        storage.faults.fail_bucket_writes = false;
        storage.put_bucket(&doc("S1", 0)).unwrap();
        assert_eq!(storage.bucket_writes, 1);
    }

    #[test]
    fn delete_failures_are_per_id() {
        let mut storage = MemoryStorage::new();
        storage.put_bucket(&doc("S1", 0)).unwrap();
        storage.put_bucket(&doc("S2", 1)).unwrap();
        storage.faults.fail_deletes.insert(ContentId::new("S1").unwrap());

        let outcomes =
            storage.delete_buckets(&[ContentId::new("S1").unwrap(), ContentId::new("S2").unwrap()]);
        assert!(outcomes[0].1.is_err());
        assert!(matches!(outcomes[1].1, Ok(true)));
        assert!(storage.contains_bucket(&ContentId::new("S1").unwrap()));
        assert_eq!(storage.bucket_count(), 1);
    }
}
