//! Single-writer engine wiring the components together.
//!
//! Every mutation takes `&mut Engine`, so events are processed strictly one
//! at a time. Storage I/O happens only after the in-memory mutation of an
//! event is complete, and storage failures never escape: they are logged and
//! in-memory state stays authoritative.
//!
//! Ingest flow:
//!
//! ```text
//! chunk → normalize → hydrate → merge → persist dirty buckets
//!       → sweep (after a successful write) → invalidate projection
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::bucket::{Bucket, BucketStore, MergeResult};
use crate::checkpoint::CheckpointManager;
use crate::clock::{Clock, SystemClock};
use crate::config::ProjectConfig;
use crate::model::{ContentId, OwnerId};
use crate::normalize::{Rejection, normalize_chunk};
use crate::projection::{
    DEFAULT_WINDOW, ProjectionMirror, ProjectionSnapshot, ProjectionSource, SubscriptionId,
};
use crate::retention::{self, RetentionPolicy, SweepReport};
use crate::storage::{BucketMeta, Storage};

/// Explicit per-call context; there is no ambient "current owner".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub owner_id: OwnerId,
}

impl Context {
    #[must_use]
    pub const fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }
}

/// One delivered chunk of raw records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub content_id: ContentId,
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_total: Option<u64>,
}

/// Event-stream form of the engine's inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Chunk(Chunk),
    Review {
        #[serde(rename = "contentId")]
        content_id: ContentId,
        /// Overrides the context owner.
        #[serde(rename = "ownerId", default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    Tick,
}

/// What happened while handling one [`Event`].
#[derive(Debug)]
pub enum Outcome {
    Ingested(IngestReport),
    Reviewed {
        content_id: ContentId,
        owner_id: OwnerId,
        checkpoint: DateTime<Utc>,
    },
    /// Snapshots published by due rebuilds.
    Ticked(Vec<Arc<ProjectionSnapshot>>),
}

/// Result of one [`Engine::ingest`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub content_id: ContentId,
    #[serde(flatten)]
    pub merge: MergeResult,
    /// Number of raw records that could not be normalized.
    pub rejected: usize,
    #[serde(skip)]
    pub rejections: Vec<Rejection>,
    /// Whether the bucket reached storage in this call.
    pub persisted: bool,
    /// Buckets evicted by the sweep that followed the write.
    pub evicted: Vec<ContentId>,
}

/// Tunables taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub policy: RetentionPolicy,
    pub coalesce_window: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::default(),
            coalesce_window: DEFAULT_WINDOW,
        }
    }
}

impl From<&ProjectConfig> for EngineOptions {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            policy: config.retention.policy(),
            coalesce_window: config.projection.window(),
        }
    }
}

/// Canonical state as seen by the projection mirror.
struct Canonical<'a, S: ?Sized> {
    buckets: &'a BucketStore,
    checkpoints: &'a CheckpointManager,
    storage: &'a S,
}

impl<S: Storage + ?Sized> ProjectionSource for Canonical<'_, S> {
    fn bucket(&self, content_id: &ContentId) -> Option<&Bucket> {
        self.buckets.get(content_id)
    }

    fn checkpoint(&self, owner_id: &OwnerId) -> Option<DateTime<Utc>> {
        self.checkpoints.get(owner_id, self.storage)
    }
}

#[derive(Debug)]
pub struct Engine<S: Storage> {
    storage: S,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    buckets: BucketStore,
    checkpoints: CheckpointManager,
    mirror: ProjectionMirror,
}

impl<S: Storage> Engine<S> {
    #[must_use]
    pub fn new(storage: S, clock: Arc<dyn Clock>, options: EngineOptions) -> Self {
        Self {
            storage,
            clock,
            policy: options.policy,
            buckets: BucketStore::new(),
            checkpoints: CheckpointManager::new(),
            mirror: ProjectionMirror::new(options.coalesce_window),
        }
    }

    /// Engine on the real system clock.
    #[must_use]
    pub fn with_system_clock(storage: S, options: EngineOptions) -> Self {
        Self::new(storage, Arc::new(SystemClock), options)
    }

    /// Normalize and merge one chunk, then persist, sweep and invalidate.
    pub fn ingest(&mut self, ctx: &Context, chunk: Chunk) -> IngestReport {
        let now = self.clock.now();
        let Chunk {
            content_id,
            records,
            reported_total,
        } = chunk;

        let normalized = normalize_chunk(&records, now);
        self.buckets.hydrate(&content_id, &self.storage);
        self.checkpoints.prime(&ctx.owner_id, &self.storage);
        let merge = self
            .buckets
            .merge(&content_id, normalized.records, reported_total, now);

        let written = self.persist(now);
        let persisted = written.contains(&content_id);
        let evicted = if written.is_empty() {
            Vec::new()
        } else {
            self.sweep_at(now).evicted
        };

        if self.buckets.get(&content_id).is_some() {
            self.mirror.invalidate(&content_id, &ctx.owner_id, now);
        }

        debug!(
            %content_id,
            owner_id = %ctx.owner_id,
            inserted = merge.inserted,
            updated = merge.updated,
            rejected = normalized.rejected.len(),
            persisted,
            evicted = evicted.len(),
            "ingested chunk"
        );

        IngestReport {
            content_id,
            merge,
            rejected: normalized.rejected.len(),
            rejections: normalized.rejected,
            persisted,
            evicted,
        }
    }

    /// The owner reviewed `content_id` now: advance their checkpoint and
    /// refresh their projections.
    pub fn review(&mut self, ctx: &Context, content_id: &ContentId) -> DateTime<Utc> {
        let now = self.clock.now();
        let checkpoint = self
            .checkpoints
            .advance(&ctx.owner_id, now, &mut self.storage);
        self.buckets.hydrate(content_id, &self.storage);
        self.mirror.invalidate(content_id, &ctx.owner_id, now);
        self.mirror.invalidate_owner(&ctx.owner_id, now);
        checkpoint
    }

    /// Run due projection rebuilds.
    pub fn tick(&mut self) -> Vec<Arc<ProjectionSnapshot>> {
        let now = self.clock.now();
        let source = Canonical {
            buckets: &self.buckets,
            checkpoints: &self.checkpoints,
            storage: &self.storage,
        };
        self.mirror.poll(now, &source)
    }

    /// Retry dirty bucket writes and run every pending rebuild immediately.
    pub fn flush(&mut self) -> Vec<Arc<ProjectionSnapshot>> {
        let now = self.clock.now();
        if !self.persist(now).is_empty() {
            self.sweep_at(now);
        }
        let source = Canonical {
            buckets: &self.buckets,
            checkpoints: &self.checkpoints,
            storage: &self.storage,
        };
        self.mirror.flush(now, &source)
    }

    /// Write dirty buckets. Buckets whose stored copy was folded back in
    /// get their projections rebuilt. Returns the ids written.
    fn persist(&mut self, now: DateTime<Utc>) -> Vec<ContentId> {
        let report = self.buckets.persist_dirty(&mut self.storage);
        for content_id in &report.reconciled {
            self.mirror.invalidate_content(content_id, now);
        }
        if !report.deferred.is_empty() {
            debug!(deferred = report.deferred.len(), "bucket writes held until stored copies load");
        }
        report.written
    }

    /// Current projection of `content_id` for the context owner.
    pub fn snapshot(&mut self, ctx: &Context, content_id: &ContentId) -> Arc<ProjectionSnapshot> {
        let now = self.clock.now();
        self.buckets.hydrate(content_id, &self.storage);
        self.checkpoints.prime(&ctx.owner_id, &self.storage);
        let source = Canonical {
            buckets: &self.buckets,
            checkpoints: &self.checkpoints,
            storage: &self.storage,
        };
        self.mirror.current(content_id, &ctx.owner_id, &source, now)
    }

    /// Run a retention sweep now.
    pub fn sweep(&mut self) -> SweepReport {
        let now = self.clock.now();
        self.sweep_at(now)
    }

    fn sweep_at(&mut self, now: DateTime<Utc>) -> SweepReport {
        let resident = self.buckets.metas();
        let report = retention::sweep(&mut self.storage, &self.policy, now, &resident);
        if !report.evicted.is_empty() {
            self.buckets.remove(&report.evicted);
            self.mirror.forget(&report.evicted);
        }
        report
    }

    /// Stored and resident buckets, in retention order.
    #[must_use]
    pub fn buckets(&self) -> Vec<BucketMeta> {
        let mut metas = self.storage.list_buckets().unwrap_or_else(|error| {
            tracing::warn!(code = %error.code(), %error, "bucket listing failed; showing resident buckets");
            Vec::new()
        });
        for resident in self.buckets.metas() {
            match metas.iter_mut().find(|m| m.content_id == resident.content_id) {
                Some(stored) if stored.fetched_at < resident.fetched_at => *stored = resident,
                Some(_) => {}
                None => metas.push(resident),
            }
        }
        metas.sort_by(retention::rank_order);
        metas
    }

    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&Arc<ProjectionSnapshot>) + Send + 'static,
    ) -> SubscriptionId {
        self.mirror.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.mirror.unsubscribe(id)
    }

    /// Dispatch one event.
    pub fn handle(&mut self, ctx: &Context, event: Event) -> Outcome {
        match event {
            Event::Chunk(chunk) => Outcome::Ingested(self.ingest(ctx, chunk)),
            Event::Review {
                content_id,
                owner_id,
            } => {
                let ctx = owner_id.map_or_else(|| ctx.clone(), Context::new);
                let checkpoint = self.review(&ctx, &content_id);
                Outcome::Reviewed {
                    content_id,
                    owner_id: ctx.owner_id,
                    checkpoint,
                }
            }
            Event::Tick => Outcome::Ticked(self.tick()),
        }
    }

    /// Resident bucket, if any.
    #[must_use]
    pub fn bucket(&self, content_id: &ContentId) -> Option<&Bucket> {
        self.buckets.get(content_id)
    }

    /// The owner's checkpoint.
    #[must_use]
    pub fn checkpoint(&self, owner_id: &OwnerId) -> Option<DateTime<Utc>> {
        self.checkpoints.get(owner_id, &self.storage)
    }

    #[must_use]
    pub const fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn mirror(&self) -> &ProjectionMirror {
        &self.mirror
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// How long a host may wait before the next [`Engine::tick`] has work.
    ///
    /// `None` when no rebuild is pending; zero when one is already due.
    #[must_use]
    pub fn time_until_due(&self) -> Option<Duration> {
        let deadline = self.mirror.next_deadline()?;
        Some((deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
    }
}
