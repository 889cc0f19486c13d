//! SQLite schema for the local document store.
//!
//! - `buckets` holds one full bucket document per content id, with the
//!   columns retention needs (`fetched_at_us`, `record_count`) lifted out
//!   so a sweep never has to decode documents
//! - `checkpoints` holds one review checkpoint per owner
//! - `store_meta` records the applied schema version

/// Migration v1: bucket and checkpoint documents, the retention ordering
/// index and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS buckets (
    content_id TEXT PRIMARY KEY CHECK (length(trim(content_id)) > 0),
    fetched_at_us INTEGER NOT NULL,
    reported_total INTEGER CHECK (reported_total IS NULL OR reported_total >= 0),
    record_count INTEGER NOT NULL DEFAULT 0 CHECK (record_count >= 0),
    document TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_buckets_fetched
    ON buckets(fetched_at_us DESC, content_id ASC);

CREATE TABLE IF NOT EXISTS checkpoints (
    owner_id TEXT PRIMARY KEY CHECK (length(trim(owner_id)) > 0),
    timestamp_us INTEGER NOT NULL,
    document TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);
";

/// Indexes expected after all migrations.
pub const REQUIRED_INDEXES: &[&str] = &["idx_buckets_fetched"];
