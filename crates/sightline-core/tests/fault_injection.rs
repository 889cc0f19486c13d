//! Fault-injection tests for the best-effort persistence paths.
//!
//! Storage failures must never surface from the engine: every scenario here
//! checks that in-memory state stays authoritative and that the next
//! successful operation reconciles storage.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use sightline_core::clock::ManualClock;
use sightline_core::engine::{Chunk, Context, Engine, EngineOptions};
use sightline_core::model::{ContentId, OwnerId};
use sightline_core::retention::RetentionPolicy;
use sightline_core::storage::{
    BucketDocument, BucketMeta, CheckpointDocument, MemoryStorage, SqliteStorage, Storage,
    StorageError,
};
use tempfile::TempDir;

const START_MS: i64 = 1_708_012_200_000;

/// Wraps any storage and fails every `period`-th bucket write.
#[derive(Debug)]
struct Flaky<S> {
    inner: S,
    period: usize,
    attempts: usize,
}

impl<S: Storage> Storage for Flaky<S> {
    fn put_bucket(&mut self, doc: &BucketDocument) -> Result<(), StorageError> {
        self.attempts += 1;
        if self.attempts % self.period == 0 {
            return Err(StorageError::Unavailable("flaky disk".to_string()));
        }
        self.inner.put_bucket(doc)
    }

    fn load_bucket(&self, content_id: &ContentId) -> Result<Option<BucketDocument>, StorageError> {
        self.inner.load_bucket(content_id)
    }

    fn list_buckets(&self) -> Result<Vec<BucketMeta>, StorageError> {
        self.inner.list_buckets()
    }

    fn delete_bucket(&mut self, content_id: &ContentId) -> Result<bool, StorageError> {
        self.inner.delete_bucket(content_id)
    }

    fn put_checkpoint(&mut self, doc: &CheckpointDocument) -> Result<(), StorageError> {
        self.inner.put_checkpoint(doc)
    }

    fn load_checkpoint(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<CheckpointDocument>, StorageError> {
        self.inner.load_checkpoint(owner_id)
    }
}

fn engine_with<S: Storage>(storage: S, policy: RetentionPolicy) -> (Engine<S>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_millis(START_MS));
    let options = EngineOptions {
        policy,
        coalesce_window: Duration::from_millis(150),
    };
    (Engine::new(storage, clock.clone(), options), clock)
}

fn ctx() -> Context {
    Context::new(OwnerId::new("owner").expect("owner id"))
}

fn cid(raw: &str) -> ContentId {
    ContentId::new(raw).expect("content id")
}

fn chunk(content: &str, records: Value) -> Chunk {
    serde_json::from_value(json!({ "contentId": content, "records": records })).expect("chunk")
}

#[test]
fn failed_bucket_write_is_reconciled_by_next_success() {
    let (mut engine, _clock) = engine_with(MemoryStorage::new(), RetentionPolicy::expanded());

    engine.storage_mut().faults.fail_bucket_writes = true;
    let report = engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 1 }, { "pk": 2 }])));
    assert_eq!(report.merge.inserted, 2);
    assert!(!report.persisted);
    assert_eq!(engine.snapshot(&ctx(), &cid("S1")).total, 2);

    engine.storage_mut().faults.fail_bucket_writes = false;
    let report = engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 3 }])));
    assert!(report.persisted);

    let stored = engine
        .storage()
        .load_bucket(&cid("S1"))
        .expect("load")
        .expect("stored bucket");
    assert_eq!(stored.records.len(), 3);
}

#[test]
fn unreadable_stored_bucket_is_merged_back_not_overwritten() {
    let mut storage = MemoryStorage::new();
    {
        let (mut seed, _clock) = engine_with(MemoryStorage::new(), RetentionPolicy::expanded());
        seed.ingest(
            &ctx(),
            chunk("S1", json!([{ "pk": 1 }, { "pk": 2 }, { "pk": 3 }])),
        );
        let doc = seed
            .storage()
            .load_bucket(&cid("S1"))
            .expect("load")
            .expect("stored bucket");
        storage.put_bucket(&doc).expect("seed");
    }

    let (mut engine, clock) = engine_with(storage, RetentionPolicy::expanded());
    engine.storage_mut().faults.fail_bucket_loads = true;
    let report = engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 4 }])));
    assert_eq!(report.merge.inserted, 1);
    assert!(!report.persisted);
    engine.storage_mut().faults.fail_bucket_loads = false;

    let stored = engine
        .storage()
        .load_bucket(&cid("S1"))
        .expect("load")
        .expect("stored bucket");
    assert_eq!(stored.records.len(), 3);

    clock.advance_millis(10);
    let published = engine.flush();
    let stored = engine
        .storage()
        .load_bucket(&cid("S1"))
        .expect("load")
        .expect("stored bucket");
    assert_eq!(stored.records.len(), 4);
    assert_eq!(engine.bucket(&cid("S1")).expect("bucket").len(), 4);
    assert_eq!(published.last().expect("rebuilt").total, 4);
}

#[test]
fn flaky_wrapper_over_sqlite_never_loses_in_memory_records() {
    let dir = TempDir::new().expect("temp dir");
    let inner = SqliteStorage::open(&dir.path().join("store.db")).expect("open");
    let flaky = Flaky {
        inner,
        period: 2,
        attempts: 0,
    };
    let (mut engine, clock) = engine_with(flaky, RetentionPolicy::expanded());

    let mut persisted = 0;
    for i in 0..10 {
        let report = engine.ingest(&ctx(), chunk("S1", json!([{ "pk": i }])));
        persisted += usize::from(report.persisted);
        clock.advance_millis(1);
    }

    assert_eq!(persisted, 5);
    assert_eq!(engine.bucket(&cid("S1")).expect("bucket").len(), 10);
    let final_report = engine.flush();
    assert_eq!(final_report.len(), 1);
    assert_eq!(final_report[0].total, 10);
}

#[test]
fn checkpoint_load_failure_fails_open() {
    let mut storage = MemoryStorage::new();
    storage
        .put_checkpoint(&CheckpointDocument {
            owner_id: ctx().owner_id,
            timestamp: chrono::DateTime::from_timestamp_millis(START_MS + 60_000)
                .expect("instant"),
        })
        .expect("seed checkpoint");
    storage.faults.fail_checkpoint_loads = true;

    let (mut engine, _clock) = engine_with(storage, RetentionPolicy::expanded());
    engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 1 }, { "pk": 2 }])));

    let snapshot = engine.snapshot(&ctx(), &cid("S1"));
    assert_eq!(snapshot.checkpoint, None);
    assert_eq!(snapshot.new_count, 2);
}

#[test]
fn checkpoint_write_failure_keeps_session_checkpoint() {
    let (mut engine, clock) = engine_with(MemoryStorage::new(), RetentionPolicy::expanded());
    engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 1 }])));
    engine.storage_mut().faults.fail_checkpoint_writes = true;

    clock.advance_millis(5);
    let checkpoint = engine.review(&ctx(), &cid("S1"));
    assert_eq!(engine.checkpoint(&ctx().owner_id), Some(checkpoint));

    clock.advance_millis(200);
    engine.tick();
    assert_eq!(engine.snapshot(&ctx(), &cid("S1")).new_count, 0);
    assert!(
        engine
            .storage()
            .load_checkpoint(&ctx().owner_id)
            .expect("load")
            .is_none()
    );
}

#[test]
fn failed_delete_is_retried_by_a_later_sweep() {
    let (mut engine, clock) = engine_with(
        MemoryStorage::new(),
        RetentionPolicy::expanded().with_max_buckets(Some(1)),
    );
    engine.storage_mut().faults.fail_deletes.insert(cid("S1"));

    engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 1 }])));
    clock.advance_millis(1);
    let report = engine.ingest(&ctx(), chunk("S2", json!([{ "pk": 1 }])));

    assert_eq!(report.evicted, vec![cid("S1")]);
    assert!(engine.bucket(&cid("S1")).is_none());
    assert!(engine.storage().contains_bucket(&cid("S1")));

    engine.storage_mut().faults.fail_deletes.clear();
    let retry = engine.sweep();
    assert_eq!(retry.evicted, vec![cid("S1")]);
    assert!(retry.failed.is_empty());
    assert!(!engine.storage().contains_bucket(&cid("S1")));
}

#[test]
fn listing_failure_still_bounds_memory() {
    let (mut engine, clock) = engine_with(MemoryStorage::new(), RetentionPolicy::constrained());
    engine.storage_mut().faults.fail_listing = true;

    for content in ["S1", "S2", "S3", "S4", "S5"] {
        engine.ingest(&ctx(), chunk(content, json!([{ "pk": 1 }])));
        clock.advance_millis(1);
    }

    assert!(engine.bucket(&cid("S1")).is_none());
    assert!(engine.bucket(&cid("S2")).is_none());
    assert!(engine.bucket(&cid("S5")).is_some());
    assert_eq!(engine.storage().bucket_count(), 3);
}

#[test]
fn corrupt_stored_bucket_starts_empty_and_is_replaced() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("store.db");
    {
        let storage = SqliteStorage::open(&path).expect("open");
        storage
            .connection()
            .execute(
                "INSERT INTO buckets (content_id, fetched_at_us, document) VALUES ('S1', 0, '{broken')",
                [],
            )
            .expect("seed corrupt row");
    }

    let storage = SqliteStorage::open(&path).expect("reopen");
    let (mut engine, _clock) = engine_with(storage, RetentionPolicy::expanded());
    let report = engine.ingest(&ctx(), chunk("S1", json!([{ "pk": 7 }])));
    assert_eq!(report.merge.inserted, 1);
    assert!(report.persisted);

    let stored = engine
        .storage()
        .load_bucket(&cid("S1"))
        .expect("document is readable again")
        .expect("stored");
    assert_eq!(stored.records.len(), 1);
}
