//! SQLite-backed [`Storage`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{
    BucketDocument, BucketMeta, CheckpointDocument, DeleteOutcome, Storage, StorageError,
    migrations,
};
use crate::model::{ContentId, OwnerId};

/// Busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Document store on a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (creating if needed) the store at `path` and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be opened or
    /// configured, and [`StorageError::SchemaTooNew`] if it was written by a
    /// newer binary.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let open_err = |detail: String| StorageError::Open {
            path: path.to_path_buf(),
            detail,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| open_err(format!("create {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path).map_err(|e| open_err(e.to_string()))?;
        let mut storage = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        storage.prepare(path)?;
        Ok(storage)
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Open {
            path: PathBuf::from(":memory:"),
            detail: e.to_string(),
        })?;
        let mut storage = Self { conn, path: None };
        storage.prepare(Path::new(":memory:"))?;
        Ok(storage)
    }

    /// Database file path, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Underlying connection, for diagnostics and tests.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn prepare(&mut self, path: &Path) -> Result<(), StorageError> {
        let open_err = |detail: String| StorageError::Open {
            path: path.to_path_buf(),
            detail,
        };

        configure_connection(&self.conn).map_err(|e| open_err(format!("configure: {e}")))?;

        let found = migrations::current_schema_version(&self.conn)
            .map_err(|e| open_err(format!("read schema version: {e}")))?;
        if found > migrations::LATEST_SCHEMA_VERSION {
            return Err(StorageError::SchemaTooNew {
                found,
                supported: migrations::LATEST_SCHEMA_VERSION,
            });
        }

        let version = migrations::migrate(&mut self.conn)
            .map_err(|e| open_err(format!("migrate: {e}")))?;
        debug!(path = %path.display(), version, "opened sqlite store");
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn micros_to_datetime(micros: i64, what: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StorageError::Corrupt {
        what: what.to_string(),
        detail: format!("timestamp {micros}us out of range"),
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Storage for SqliteStorage {
    fn put_bucket(&mut self, doc: &BucketDocument) -> Result<(), StorageError> {
        let what = format!("bucket {}", doc.content_id);
        let document = serde_json::to_string(doc).map_err(|source| StorageError::Encode {
            what: what.clone(),
            source,
        })?;
        let reported_total = doc.reported_total.map(|t| i64::try_from(t).unwrap_or(i64::MAX));

        self.conn
            .execute(
                "INSERT INTO buckets (content_id, fetched_at_us, reported_total, record_count, document)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(content_id) DO UPDATE SET
                    fetched_at_us = excluded.fetched_at_us,
                    reported_total = excluded.reported_total,
                    record_count = excluded.record_count,
                    document = excluded.document",
                params![
                    doc.content_id.as_str(),
                    doc.fetched_at.timestamp_micros(),
                    reported_total,
                    to_i64(doc.records.len()),
                    document,
                ],
            )
            .map_err(|source| StorageError::Write { what, source })?;
        Ok(())
    }

    fn load_bucket(&self, content_id: &ContentId) -> Result<Option<BucketDocument>, StorageError> {
        let what = format!("bucket {content_id}");
        let document: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM buckets WHERE content_id = ?1",
                [content_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StorageError::Read {
                what: what.clone(),
                source,
            })?;

        document
            .map(|text| {
                serde_json::from_str::<BucketDocument>(&text).map_err(|e| StorageError::Corrupt {
                    what: what.clone(),
                    detail: e.to_string(),
                })
            })
            .transpose()
    }

    fn list_buckets(&self) -> Result<Vec<BucketMeta>, StorageError> {
        let read_err = |source| StorageError::Read {
            what: "bucket listing".to_string(),
            source,
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT content_id, fetched_at_us, record_count
                 FROM buckets
                 ORDER BY fetched_at_us DESC, content_id ASC",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(read_err)?;

        let mut metas = Vec::new();
        for row in rows {
            let (content_id, fetched_at_us, record_count) = row.map_err(read_err)?;
            let content_id = ContentId::new(content_id).map_err(|e| StorageError::Corrupt {
                what: "bucket listing".to_string(),
                detail: e.to_string(),
            })?;
            metas.push(BucketMeta {
                fetched_at: micros_to_datetime(fetched_at_us, content_id.as_str())?,
                content_id,
                record_count: usize::try_from(record_count).unwrap_or(0),
            });
        }
        Ok(metas)
    }

    fn delete_bucket(&mut self, content_id: &ContentId) -> Result<bool, StorageError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM buckets WHERE content_id = ?1",
                [content_id.as_str()],
            )
            .map_err(|source| StorageError::Write {
                what: format!("delete bucket {content_id}"),
                source,
            })?;
        Ok(removed > 0)
    }

    fn delete_buckets(&mut self, content_ids: &[ContentId]) -> Vec<DeleteOutcome> {
        let tx = match self.conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                return content_ids
                    .iter()
                    .map(|id| {
                        (
                            id.clone(),
                            Err(StorageError::BatchAborted(format!("begin: {e}"))),
                        )
                    })
                    .collect();
            }
        };

        let mut outcomes: Vec<DeleteOutcome> = content_ids
            .iter()
            .map(|id| {
                let result = tx
                    .execute("DELETE FROM buckets WHERE content_id = ?1", [id.as_str()])
                    .map(|n| n > 0)
                    .map_err(|source| StorageError::Write {
                        what: format!("delete bucket {id}"),
                        source,
                    });
                (id.clone(), result)
            })
            .collect();

        if let Err(e) = tx.commit() {
            for (_, result) in &mut outcomes {
                if result.is_ok() {
                    *result = Err(StorageError::BatchAborted(format!("commit: {e}")));
                }
            }
        }
        outcomes
    }

    fn put_checkpoint(&mut self, doc: &CheckpointDocument) -> Result<(), StorageError> {
        let what = format!("checkpoint {}", doc.owner_id);
        let document = serde_json::to_string(doc).map_err(|source| StorageError::Encode {
            what: what.clone(),
            source,
        })?;

        // The stored timestamp never moves backwards, even across processes.
        self.conn
            .execute(
                "INSERT INTO checkpoints (owner_id, timestamp_us, document)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(owner_id) DO UPDATE SET
                    timestamp_us = excluded.timestamp_us,
                    document = excluded.document
                 WHERE excluded.timestamp_us >= checkpoints.timestamp_us",
                params![doc.owner_id.as_str(), doc.timestamp.timestamp_micros(), document],
            )
            .map_err(|source| StorageError::Write { what, source })?;
        Ok(())
    }

    fn load_checkpoint(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<CheckpointDocument>, StorageError> {
        let what = format!("checkpoint {owner_id}");
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM checkpoints WHERE owner_id = ?1",
                [owner_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StorageError::Read {
                what: what.clone(),
                source,
            })?;

        let Some(text) = row else {
            return Ok(None);
        };
        // `timestamp_us` only orders upserts; the document keeps full precision.
        let doc: CheckpointDocument =
            serde_json::from_str(&text).map_err(|e| StorageError::Corrupt { what, detail: e.to_string() })?;
        Ok(Some(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ViewerId, ViewerRecord};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn cid(s: &str) -> ContentId {
        ContentId::new(s).unwrap()
    }

    fn bucket(id: &str, secs: i64, viewers: &[&str]) -> BucketDocument {
        BucketDocument {
            content_id: cid(id),
            fetched_at: at(secs),
            reported_total: Some(10),
            records: viewers
                .iter()
                .map(|v| ViewerRecord::new(ViewerId::new(*v).unwrap(), at(secs)))
                .collect(),
        }
    }

    #[test]
    fn open_sets_wal_busy_timeout_and_migrates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".sightline").join("sightline.db");
        let storage = SqliteStorage::open(&path).unwrap();
        assert!(path.exists());

        let conn = storage.connection();
        let journal: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(journal.to_ascii_lowercase(), "wal");
        let busy: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(u128::from(busy), DEFAULT_BUSY_TIMEOUT.as_millis());
        assert_eq!(
            migrations::current_schema_version(conn).unwrap(),
            migrations::LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn refuses_newer_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99_i64).unwrap();
        }
        let err = SqliteStorage::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::SchemaTooNew { found: 99, .. }));
    }

    #[test]
    fn bucket_roundtrip_and_replace() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let first = bucket("S1", 0, &["1", "2"]);
        storage.put_bucket(&first).unwrap();
        assert_eq!(storage.load_bucket(&cid("S1")).unwrap(), Some(first));

        let second = bucket("S1", 5, &["1", "2", "3"]);
        storage.put_bucket(&second).unwrap();
        assert_eq!(storage.load_bucket(&cid("S1")).unwrap(), Some(second));
        assert_eq!(storage.load_bucket(&cid("missing")).unwrap(), None);
    }

    #[test]
    fn list_orders_newest_first_then_by_id() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.put_bucket(&bucket("B", 10, &["1"])).unwrap();
        storage.put_bucket(&bucket("A", 10, &[])).unwrap();
        storage.put_bucket(&bucket("C", 20, &["1", "2"])).unwrap();

        let metas = storage.list_buckets().unwrap();
        let ids: Vec<_> = metas.iter().map(|m| m.content_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert_eq!(metas[0].record_count, 2);
        assert_eq!(metas[0].fetched_at, at(20));
    }

    #[test]
    fn batch_delete_reports_each_id() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.put_bucket(&bucket("S1", 0, &[])).unwrap();
        storage.put_bucket(&bucket("S2", 1, &[])).unwrap();

        let outcomes = storage.delete_buckets(&[cid("S1"), cid("nope")]);
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].1, Ok(true)));
        assert!(matches!(outcomes[1].1, Ok(false)));
        assert_eq!(storage.list_buckets().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_document_is_reported() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .connection()
            .execute(
                "INSERT INTO buckets (content_id, fetched_at_us, document) VALUES ('S1', 0, 'nope')",
                [],
            )
            .unwrap();
        let err = storage.load_bucket(&cid("S1")).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn checkpoint_never_regresses_in_storage() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let owner = OwnerId::new("me").unwrap();
        assert_eq!(storage.load_checkpoint(&owner).unwrap(), None);

        storage
            .put_checkpoint(&CheckpointDocument {
                owner_id: owner.clone(),
                timestamp: at(100),
            })
            .unwrap();
        storage
            .put_checkpoint(&CheckpointDocument {
                owner_id: owner.clone(),
                timestamp: at(50),
            })
            .unwrap();

        let loaded = storage.load_checkpoint(&owner).unwrap().unwrap();
        assert_eq!(loaded.timestamp, at(100));
    }

    #[test]
    fn checkpoint_keeps_sub_microsecond_precision() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let owner = OwnerId::new("me").unwrap();
        let reviewed = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        storage
            .put_checkpoint(&CheckpointDocument {
                owner_id: owner.clone(),
                timestamp: reviewed,
            })
            .unwrap();

        let loaded = storage.load_checkpoint(&owner).unwrap().unwrap();
        assert_eq!(loaded.timestamp, reviewed);

        let captured = Utc.timestamp_opt(1_700_000_000, 123_456_500).unwrap();
        assert!(captured <= loaded.timestamp);
    }
}
