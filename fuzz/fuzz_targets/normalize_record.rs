#![no_main]

use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use sightline_core::normalize::normalize_chunk;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let raws = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();

    let chunk = normalize_chunk(&raws, now);
    assert_eq!(chunk.records.len() + chunk.rejected.len(), raws.len());
    for record in &chunk.records {
        assert!(!record.id.as_str().trim().is_empty());
    }
});
