#![no_main]

use std::collections::BTreeSet;

use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use sightline_core::bucket::BucketStore;
use sightline_core::model::ContentId;
use sightline_core::normalize::normalize_chunk;

fuzz_target!(|data: &[u8]| {
    let Ok(Value::Array(raws)) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let Ok(content_id) = ContentId::new("fuzz") else {
        return;
    };
    let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    let records = normalize_chunk(&raws, now).records;
    let distinct: BTreeSet<_> = records.iter().map(|r| r.id.clone()).collect();

    let mut store = BucketStore::new();
    store.merge(&content_id, records.clone(), None, now);
    let again = store.merge(&content_id, records, None, now);

    assert_eq!(again.inserted + again.updated, 0);
    assert_eq!(store.get(&content_id).map_or(0, |b| b.len()), distinct.len());
});
