//! Record normalizer: raw external payloads → canonical [`ViewerRecord`]s.
//!
//! Each raw record is decoded independently through the [`RawUser`] sum type.
//! A record without a usable identifier is rejected on its own; the rest of
//! the chunk is unaffected.

mod lenient;
pub mod raw;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::ErrorCode;
use crate::model::ViewerRecord;

pub use lenient::{RawId, RawInstant};
pub use raw::{RawUser, Shape};

/// Why a single raw record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("record has no identifier field")]
    MissingId,
    #[error("identifier {raw} is not usable")]
    InvalidId { raw: String },
    #[error("record does not match a known shape: {0}")]
    Malformed(String),
}

impl NormalizeError {
    /// Machine-readable code for this rejection.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingId | Self::InvalidId { .. } => ErrorCode::InvalidIdentifier,
            Self::NotAnObject { .. } | Self::Malformed(_) => {
                ErrorCode::MalformedRecord
            }
        }
    }
}

/// A raw record that could not be normalized, with its position in the chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub index: usize,
    pub error: NormalizeError,
}

/// Output of [`normalize_chunk`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedChunk {
    /// Successfully normalized records, in input order.
    pub records: Vec<ViewerRecord>,
    /// Records that were skipped.
    pub rejected: Vec<Rejection>,
}

/// Normalize one raw record.
///
/// `now` becomes `captured_at` unless the payload carries its own instant.
///
/// # Errors
///
/// Returns a [`NormalizeError`] describing why the record is unusable.
pub fn normalize(raw: &Value, now: DateTime<Utc>) -> Result<ViewerRecord, NormalizeError> {
    RawUser::decode(raw)?.into_record(now)
}

/// Normalize every record of a chunk, skipping the ones that fail.
#[must_use]
pub fn normalize_chunk(raws: &[Value], now: DateTime<Utc>) -> NormalizedChunk {
    let mut chunk = NormalizedChunk {
        records: Vec::with_capacity(raws.len()),
        rejected: Vec::new(),
    };

    for (index, raw) in raws.iter().enumerate() {
        match normalize(raw, now) {
            Ok(record) => chunk.records.push(record),
            Err(error) => {
                debug!(index, code = %error.code(), %error, "skipping raw viewer record");
                chunk.rejected.push(Rejection { index, error });
            }
        }
    }

    debug!(
        accepted = chunk.records.len(),
        rejected = chunk.rejected.len(),
        "normalized chunk"
    );
    chunk
}
