//! sightline-core library.
//!
//! Reconciles bursts of untrusted viewer records into deduplicated
//! per-content buckets, tracks novelty against per-owner checkpoints,
//! enforces bounded retention and publishes read-optimized projections.
//!
//! Components, leaves first:
//!
//! 1. [`normalize`]: raw payload shapes → canonical [`model::ViewerRecord`].
//! 2. [`bucket`]: per-content deduplicated record sets and the merge rule.
//! 3. [`checkpoint`]: per-owner last-review instants.
//! 4. [`retention`]: TTL and capacity eviction.
//! 5. [`projection`]: coalesced, immutable snapshots plus change fan-out.
//!
//! [`engine::Engine`] wires them together as the single writer.
//!
//! # Conventions
//!
//! - **Errors**: Module errors are `thiserror` enums; application plumbing uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod bucket;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod normalize;
pub mod projection;
pub mod retention;
pub mod storage;
