//! Projection mirror: coalesced rebuilds of read-optimized snapshots.
//!
//! Writers call [`ProjectionMirror::invalidate`]. The first invalidation of
//! a `(content, owner)` pair arms a coalescing timer; later ones inside the
//! window are absorbed. When the timer fires ([`ProjectionMirror::poll`])
//! the snapshot is rebuilt once from the *current* canonical state, cached
//! and pushed to subscribers.
//!
//! The mirror never mutates canonical state; it reads it through a
//! [`ProjectionSource`].

pub mod coalesce;
pub mod observer;
pub mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::bucket::Bucket;
use crate::model::{ContentId, OwnerId};

pub use coalesce::Coalescer;
pub use observer::{SubscriptionId, Subscribers};
pub use snapshot::{ProjectionSnapshot, ViewerRow};

/// Default coalescing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(150);

/// Read access to canonical state at rebuild time.
pub trait ProjectionSource {
    fn bucket(&self, content_id: &ContentId) -> Option<&Bucket>;
    fn checkpoint(&self, owner_id: &OwnerId) -> Option<DateTime<Utc>>;
}

type Key = (ContentId, OwnerId);

#[derive(Debug)]
pub struct ProjectionMirror {
    timer: Coalescer<Key>,
    cache: HashMap<Key, Arc<ProjectionSnapshot>>,
    subscribers: Subscribers<Arc<ProjectionSnapshot>>,
    generation: u64,
    rebuilds: u64,
}

impl Default for ProjectionMirror {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ProjectionMirror {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            timer: Coalescer::new(window),
            cache: HashMap::new(),
            subscribers: Subscribers::new(),
            generation: 0,
            rebuilds: 0,
        }
    }

    /// Mark a projection stale. Returns `true` if this armed a new rebuild.
    pub fn invalidate(&mut self, content_id: &ContentId, owner_id: &OwnerId, now: DateTime<Utc>) -> bool {
        let armed = self
            .timer
            .schedule((content_id.clone(), owner_id.clone()), now);
        trace!(%content_id, %owner_id, armed, "projection invalidated");
        armed
    }

    /// Invalidate every cached projection of `owner_id`.
    pub fn invalidate_owner(&mut self, owner_id: &OwnerId, now: DateTime<Utc>) -> usize {
        let keys: Vec<Key> = self
            .cache
            .keys()
            .filter(|(_, owner)| owner == owner_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter(|key| self.timer.schedule(key.clone(), now))
            .count()
    }

    /// Invalidate every cached projection of `content_id`, whatever the owner.
    pub fn invalidate_content(&mut self, content_id: &ContentId, now: DateTime<Utc>) -> usize {
        let keys: Vec<Key> = self
            .cache
            .keys()
            .filter(|(content, _)| content == content_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter(|key| self.timer.schedule(key.clone(), now))
            .count()
    }

    /// Run every rebuild whose window has elapsed.
    pub fn poll(
        &mut self,
        now: DateTime<Utc>,
        source: &impl ProjectionSource,
    ) -> Vec<Arc<ProjectionSnapshot>> {
        let due = self.timer.take_due(now);
        self.rebuild_all(due, now, source)
    }

    /// Run every pending rebuild now.
    pub fn flush(
        &mut self,
        now: DateTime<Utc>,
        source: &impl ProjectionSource,
    ) -> Vec<Arc<ProjectionSnapshot>> {
        let pending = self.timer.take_all();
        self.rebuild_all(pending, now, source)
    }

    /// Last published snapshot, building one on the spot if none exists.
    ///
    /// An on-demand build is cached but not pushed to subscribers.
    pub fn current(
        &mut self,
        content_id: &ContentId,
        owner_id: &OwnerId,
        source: &impl ProjectionSource,
        now: DateTime<Utc>,
    ) -> Arc<ProjectionSnapshot> {
        let key = (content_id.clone(), owner_id.clone());
        if let Some(snapshot) = self.cache.get(&key) {
            return Arc::clone(snapshot);
        }
        self.build(key, now, source)
    }

    /// Cached snapshot without building.
    #[must_use]
    pub fn cached(&self, content_id: &ContentId, owner_id: &OwnerId) -> Option<Arc<ProjectionSnapshot>> {
        self.cache
            .get(&(content_id.clone(), owner_id.clone()))
            .cloned()
    }

    /// Drop cached snapshots and pending rebuilds for evicted buckets.
    pub fn forget(&mut self, content_ids: &[ContentId]) {
        if content_ids.is_empty() {
            return;
        }
        self.cache.retain(|(content, _), _| !content_ids.contains(content));
        self.timer.retain(|(content, _)| !content_ids.contains(content));
    }

    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&Arc<ProjectionSnapshot>) + Send + 'static,
    ) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Generation of the most recently built snapshot.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Total rebuilds performed.
    #[must_use]
    pub const fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.timer.len()
    }

    /// When the next coalesced rebuild is due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timer.next_deadline()
    }

    fn rebuild_all(
        &mut self,
        keys: Vec<Key>,
        now: DateTime<Utc>,
        source: &impl ProjectionSource,
    ) -> Vec<Arc<ProjectionSnapshot>> {
        keys.into_iter()
            .map(|key| {
                let snapshot = self.build(key, now, source);
                self.subscribers.notify(&snapshot);
                snapshot
            })
            .collect()
    }

    fn build(
        &mut self,
        key: Key,
        now: DateTime<Utc>,
        source: &impl ProjectionSource,
    ) -> Arc<ProjectionSnapshot> {
        self.generation += 1;
        self.rebuilds += 1;

        let (content_id, owner_id) = key.clone();
        let checkpoint = source.checkpoint(&owner_id);
        let snapshot = Arc::new(ProjectionSnapshot::build(
            content_id,
            owner_id,
            source.bucket(&key.0),
            checkpoint,
            self.generation,
            now,
        ));
        debug!(
            content_id = %snapshot.content_id,
            owner_id = %snapshot.owner_id,
            generation = snapshot.generation,
            total = snapshot.total,
            new_count = snapshot.new_count,
            "rebuilt projection"
        );
        self.cache.insert(key, Arc::clone(&snapshot));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ViewerId, ViewerRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Fixture {
        buckets: HashMap<ContentId, Bucket>,
        checkpoints: HashMap<OwnerId, DateTime<Utc>>,
    }

    impl ProjectionSource for Fixture {
        fn bucket(&self, content_id: &ContentId) -> Option<&Bucket> {
            self.buckets.get(content_id)
        }

        fn checkpoint(&self, owner_id: &OwnerId) -> Option<DateTime<Utc>> {
            self.checkpoints.get(owner_id).copied()
        }
    }

    impl Fixture {
        fn add(&mut self, content: &str, viewer: &str, at: DateTime<Utc>) {
            let id = ContentId::new(content).unwrap();
            self.buckets
                .entry(id.clone())
                .or_insert_with(|| Bucket::new(id, at))
                .merge(vec![ViewerRecord::new(ViewerId::new(viewer).unwrap(), at)], None, at);
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    fn s1() -> ContentId {
        ContentId::new("S1").unwrap()
    }

    fn me() -> OwnerId {
        OwnerId::new("me").unwrap()
    }

    #[test]
    fn burst_of_invalidations_rebuilds_once() {
        let mut fixture = Fixture::default();
        let mut mirror = ProjectionMirror::new(Duration::from_millis(150));
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notified);
        mirror.subscribe(move |snap| sink.lock().unwrap().push(snap.generation));

        for i in 0..10 {
            fixture.add("S1", &format!("v{i}"), at(i * 10));
            mirror.invalidate(&s1(), &me(), at(i * 10));
        }
        assert!(mirror.poll(at(149), &fixture).is_empty());

        let published = mirror.poll(at(150), &fixture);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].total, 10);
        assert_eq!(mirror.generation(), 1);
        assert_eq!(mirror.rebuilds(), 1);
        assert_eq!(*notified.lock().unwrap(), vec![1]);
    }

    #[test]
    fn rebuild_reads_latest_state_not_state_at_invalidation() {
        let mut fixture = Fixture::default();
        let mut mirror = ProjectionMirror::new(Duration::from_millis(100));
        fixture.add("S1", "a", at(0));
        mirror.invalidate(&s1(), &me(), at(0));
        fixture.add("S1", "b", at(50));
        fixture.checkpoints.insert(me(), at(10));

        let snap = mirror.poll(at(100), &fixture).remove(0);
        assert_eq!(snap.total, 2);
        assert_eq!(snap.new_count, 1);
    }

    #[test]
    fn current_builds_on_demand_without_notifying() {
        let mut fixture = Fixture::default();
        fixture.add("S1", "a", at(0));
        let mut mirror = ProjectionMirror::default();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        mirror.subscribe(move |_| *sink.lock().unwrap() += 1);

        let first = mirror.current(&s1(), &me(), &fixture, at(0));
        let again = mirror.current(&s1(), &me(), &fixture, at(5));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.generation, 1);
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn current_serves_last_published_while_rebuild_pending() {
        let mut fixture = Fixture::default();
        fixture.add("S1", "a", at(0));
        let mut mirror = ProjectionMirror::new(Duration::from_millis(100));
        let published = mirror.current(&s1(), &me(), &fixture, at(0));

        fixture.add("S1", "b", at(10));
        mirror.invalidate(&s1(), &me(), at(10));
        assert_eq!(mirror.current(&s1(), &me(), &fixture, at(20)).total, 1);
        assert!(Arc::ptr_eq(&published, &mirror.current(&s1(), &me(), &fixture, at(20))));

        mirror.poll(at(110), &fixture);
        assert_eq!(mirror.current(&s1(), &me(), &fixture, at(120)).total, 2);
    }

    #[test]
    fn flush_forces_pending_and_forget_cancels() {
        let mut fixture = Fixture::default();
        fixture.add("S1", "a", at(0));
        fixture.add("S2", "a", at(0));
        let s2 = ContentId::new("S2").unwrap();
        let mut mirror = ProjectionMirror::default();

        mirror.invalidate(&s1(), &me(), at(0));
        mirror.invalidate(&s2, &me(), at(0));
        mirror.forget(std::slice::from_ref(&s2));
        assert_eq!(mirror.pending(), 1);

        let flushed = mirror.flush(at(1), &fixture);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].content_id, s1());
        assert_eq!(mirror.pending(), 0);

        mirror.forget(&[s1()]);
        assert!(mirror.cached(&s1(), &me()).is_none());
    }

    #[test]
    fn invalidate_owner_rearms_cached_projections() {
        let mut fixture = Fixture::default();
        fixture.add("S1", "a", at(0));
        let mut mirror = ProjectionMirror::new(Duration::from_millis(100));
        mirror.current(&s1(), &me(), &fixture, at(0));

        fixture.checkpoints.insert(me(), at(5));
        assert_eq!(mirror.invalidate_owner(&me(), at(5)), 1);
        let snap = mirror.poll(at(105), &fixture).remove(0);
        assert_eq!(snap.new_count, 0);
        assert_eq!(snap.generation, 2);
    }

    #[test]
    fn unsubscribed_callbacks_stop_receiving() {
        let mut fixture = Fixture::default();
        fixture.add("S1", "a", at(0));
        let mut mirror = ProjectionMirror::new(Duration::from_millis(10));
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let id = mirror.subscribe(move |_| *sink.lock().unwrap() += 1);

        mirror.invalidate(&s1(), &me(), at(0));
        mirror.poll(at(10), &fixture);
        assert!(mirror.unsubscribe(id));
        mirror.invalidate(&s1(), &me(), at(20));
        mirror.poll(at(30), &fixture);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(mirror.generation(), 2);
    }
}
