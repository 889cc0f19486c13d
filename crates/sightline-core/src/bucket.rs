//! Bucket store: one deduplicated record set per content id.
//!
//! The store is the only code that mutates buckets. Merging is in-memory
//! and synchronous; durable writes happen afterwards through
//! [`BucketStore::persist_dirty`], which writes whole-bucket snapshots and
//! keeps a bucket dirty until a write for it succeeds.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{ContentId, ViewerId, ViewerRecord};
use crate::storage::{BucketDocument, BucketMeta, Storage, StorageError};

/// Per-merge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    /// Records whose id was not yet in the bucket.
    pub inserted: usize,
    /// Existing records that changed.
    pub updated: usize,
    /// Existing records that were already up to date.
    pub unchanged: usize,
}

impl MergeResult {
    /// Whether the merge modified any record.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }

    fn absorb(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Deduplicated records for one content id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    content_id: ContentId,
    records: BTreeMap<ViewerId, ViewerRecord>,
    fetched_at: DateTime<Utc>,
    reported_total: Option<u64>,
}

impl Bucket {
    #[must_use]
    pub const fn new(content_id: ContentId, fetched_at: DateTime<Utc>) -> Self {
        Self {
            content_id,
            records: BTreeMap::new(),
            fetched_at,
            reported_total: None,
        }
    }

    /// Rebuild a bucket from its persisted document.
    ///
    /// Documents written by older builds may repeat an id; repeats are merged
    /// so the one-entry-per-id invariant holds after loading.
    #[must_use]
    pub fn from_document(doc: BucketDocument) -> Self {
        let mut bucket = Self::new(doc.content_id, doc.fetched_at);
        bucket.reported_total = doc.reported_total;
        for record in doc.records {
            bucket.upsert(record);
        }
        bucket
    }

    /// Fold a stored document underneath the resident state.
    ///
    /// Used when the stored copy could not be read before this bucket was
    /// merged into. Resident observations win ties; stored ids missing from
    /// memory are added back. Returns `true` if the bucket changed.
    pub fn reconcile(&mut self, doc: BucketDocument) -> bool {
        let mut changed = false;
        for stored in doc.records {
            let merged = match self.records.remove(&stored.id) {
                Some(resident) => {
                    let mut base = stored;
                    base.absorb(&resident);
                    changed |= base != resident;
                    base
                }
                None => {
                    changed = true;
                    stored
                }
            };
            self.records.insert(merged.id.clone(), merged);
        }
        self.fetched_at = self.fetched_at.max(doc.fetched_at);
        if self.reported_total.is_none() && doc.reported_total.is_some() {
            self.reported_total = doc.reported_total;
            changed = true;
        }
        changed
    }

    /// Full snapshot for persistence.
    #[must_use]
    pub fn to_document(&self) -> BucketDocument {
        BucketDocument {
            content_id: self.content_id.clone(),
            fetched_at: self.fetched_at,
            reported_total: self.reported_total,
            records: self.records.values().cloned().collect(),
        }
    }

    #[must_use]
    pub fn meta(&self) -> BucketMeta {
        BucketMeta {
            content_id: self.content_id.clone(),
            fetched_at: self.fetched_at,
            record_count: self.records.len(),
        }
    }

    #[must_use]
    pub const fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    /// Instant of the last write.
    #[must_use]
    pub const fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Externally reported total, which may exceed [`Bucket::len`].
    #[must_use]
    pub const fn reported_total(&self) -> Option<u64> {
        self.reported_total
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ViewerId) -> Option<&ViewerRecord> {
        self.records.get(id)
    }

    /// Records in id order.
    pub fn records(&self) -> impl Iterator<Item = &ViewerRecord> {
        self.records.values()
    }

    /// Merge a chunk's records, then stamp the bucket with `now`.
    ///
    /// Repeats of an id inside the chunk are folded together first (in
    /// chunk order), so counters are per distinct id and merging the same
    /// chunk twice changes nothing the second time.
    pub fn merge(
        &mut self,
        records: impl IntoIterator<Item = ViewerRecord>,
        reported_total: Option<u64>,
        now: DateTime<Utc>,
    ) -> MergeResult {
        let mut folded: BTreeMap<ViewerId, ViewerRecord> = BTreeMap::new();
        for record in records {
            match folded.get_mut(&record.id) {
                Some(seen) => {
                    seen.absorb(&record);
                }
                None => {
                    folded.insert(record.id.clone(), record);
                }
            }
        }

        let mut result = MergeResult::default();
        for record in folded.into_values() {
            result.absorb(self.upsert(record));
        }
        self.fetched_at = self.fetched_at.max(now);
        if reported_total.is_some() {
            self.reported_total = reported_total;
        }
        result
    }

    fn upsert(&mut self, record: ViewerRecord) -> MergeResult {
        match self.records.get_mut(&record.id) {
            Some(existing) => {
                if existing.absorb(&record) {
                    MergeResult {
                        updated: 1,
                        ..MergeResult::default()
                    }
                } else {
                    MergeResult {
                        unchanged: 1,
                        ..MergeResult::default()
                    }
                }
            }
            None => {
                self.records.insert(record.id.clone(), record);
                MergeResult {
                    inserted: 1,
                    ..MergeResult::default()
                }
            }
        }
    }
}

/// Outcome of writing dirty buckets.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub written: Vec<ContentId>,
    pub failed: Vec<(ContentId, StorageError)>,
    /// Buckets held back because their stored copy is still unreadable.
    pub deferred: Vec<ContentId>,
    /// Buckets whose stored copy was folded in before writing.
    pub reconciled: Vec<ContentId>,
}

/// In-memory owner of every resident bucket.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: HashMap<ContentId, Bucket>,
    dirty: BTreeSet<ContentId>,
    /// Ids whose stored document failed to load for a transient reason.
    /// Their buckets are never written until a load succeeds.
    unloaded: BTreeSet<ContentId>,
}

impl BucketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted bucket into memory if it is not resident yet.
    ///
    /// Returns `true` if a document was loaded. A corrupt document is
    /// logged and the bucket starts empty; the next write replaces it. Any
    /// other load failure marks the id unloaded: the bucket may still be
    /// merged into, but it is not written until a later load succeeds and
    /// the stored records are folded back in.
    pub fn hydrate<S: Storage + ?Sized>(&mut self, content_id: &ContentId, storage: &S) -> bool {
        if self.buckets.contains_key(content_id) && !self.unloaded.contains(content_id) {
            return false;
        }
        match storage.load_bucket(content_id) {
            Ok(Some(doc)) => {
                self.unloaded.remove(content_id);
                match self.buckets.get_mut(content_id) {
                    Some(bucket) => {
                        bucket.reconcile(doc);
                        debug!(%content_id, records = bucket.len(), "reconciled bucket with stored copy");
                    }
                    None => {
                        let bucket = Bucket::from_document(doc);
                        debug!(%content_id, records = bucket.len(), "hydrated bucket");
                        self.buckets.insert(content_id.clone(), bucket);
                    }
                }
                true
            }
            Ok(None) => {
                self.unloaded.remove(content_id);
                false
            }
            Err(error) if error.is_corrupt() => {
                self.unloaded.remove(content_id);
                warn!(%content_id, code = %error.code(), %error, "stored bucket is corrupt; starting empty");
                false
            }
            Err(error) => {
                self.unloaded.insert(content_id.clone());
                warn!(%content_id, code = %error.code(), %error, "failed to load bucket; holding writes until it loads");
                false
            }
        }
    }

    /// Whether the stored copy of `content_id` still needs to be loaded
    /// before the bucket may be written.
    #[must_use]
    pub fn is_unloaded(&self, content_id: &ContentId) -> bool {
        self.unloaded.contains(content_id)
    }

    /// Merge normalized records into the bucket for `content_id`.
    ///
    /// A bucket is created on its first record; a chunk with no records
    /// for an unknown id creates nothing. Any merge into an existing bucket
    /// marks it dirty.
    pub fn merge(
        &mut self,
        content_id: &ContentId,
        records: Vec<ViewerRecord>,
        reported_total: Option<u64>,
        now: DateTime<Utc>,
    ) -> MergeResult {
        if records.is_empty() && !self.buckets.contains_key(content_id) {
            debug!(%content_id, "empty chunk for unknown bucket");
            return MergeResult::default();
        }

        let bucket = self
            .buckets
            .entry(content_id.clone())
            .or_insert_with(|| Bucket::new(content_id.clone(), now));
        let result = bucket.merge(records, reported_total, now);
        self.dirty.insert(content_id.clone());

        debug!(
            %content_id,
            inserted = result.inserted,
            updated = result.updated,
            unchanged = result.unchanged,
            size = bucket.len(),
            "merged chunk"
        );
        result
    }

    /// Write every dirty bucket as a full snapshot.
    ///
    /// Unloaded buckets are reloaded and reconciled first, or skipped while
    /// their stored copy stays unreadable. Failures are logged and leave the
    /// bucket dirty.
    pub fn persist_dirty<S: Storage + ?Sized>(&mut self, storage: &mut S) -> PersistReport {
        let mut report = PersistReport::default();
        let pending: Vec<ContentId> = self.dirty.iter().cloned().collect();

        for content_id in pending {
            if self.unloaded.contains(&content_id) {
                if self.hydrate(&content_id, &*storage) {
                    report.reconciled.push(content_id.clone());
                } else if self.unloaded.contains(&content_id) {
                    debug!(%content_id, "stored copy still unreadable; write deferred");
                    report.deferred.push(content_id);
                    continue;
                }
            }
            let Some(bucket) = self.buckets.get(&content_id) else {
                self.dirty.remove(&content_id);
                continue;
            };
            match storage.put_bucket(&bucket.to_document()) {
                Ok(()) => {
                    self.dirty.remove(&content_id);
                    report.written.push(content_id);
                }
                Err(error) => {
                    warn!(%content_id, code = %error.code(), %error, "bucket write failed; keeping in memory");
                    report.failed.push((content_id, error));
                }
            }
        }
        report
    }

    /// Drop buckets from memory. Returns how many were resident.
    pub fn remove(&mut self, content_ids: &[ContentId]) -> usize {
        content_ids
            .iter()
            .filter(|id| {
                self.dirty.remove(*id);
                self.unloaded.remove(*id);
                self.buckets.remove(*id).is_some()
            })
            .count()
    }

    #[must_use]
    pub fn get(&self, content_id: &ContentId) -> Option<&Bucket> {
        self.buckets.get(content_id)
    }

    #[must_use]
    pub fn is_dirty(&self, content_id: &ContentId) -> bool {
        self.dirty.contains(content_id)
    }

    /// Metadata of every resident bucket.
    #[must_use]
    pub fn metas(&self) -> Vec<BucketMeta> {
        self.buckets.values().map(Bucket::meta).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
