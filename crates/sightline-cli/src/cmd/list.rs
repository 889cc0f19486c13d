use std::io::Write;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use sightline_core::config::EffectiveConfig;
use sightline_core::lock::LockMode;
use sightline_core::storage::BucketMeta;

use crate::output::{OutputMode, local_time, pretty_rule, render_mode};
use crate::session::Session;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRow {
    #[serde(flatten)]
    meta: BucketMeta,
    /// Past the TTL; the next sweep evicts it.
    expired: bool,
}

/// Execute `sight list`: stored buckets, newest first.
///
/// # Errors
///
/// Fails if the store cannot be opened or output cannot be written.
pub fn run_list(
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let session = Session::open(project_root, config, None, LockMode::Shared, output)?;
    let now = session.engine.now();
    let policy = *session.engine.policy();
    let rows: Vec<ListRow> = session
        .engine
        .buckets()
        .into_iter()
        .map(|meta| ListRow {
            expired: policy.is_expired(meta.fetched_at, now),
            meta,
        })
        .collect();

    render_mode(
        output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}{}",
                    row.meta.content_id,
                    row.meta.fetched_at.to_rfc3339(),
                    row.meta.record_count,
                    if row.expired { "\texpired" } else { "" }
                )?;
            }
            Ok(())
        },
        |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No buckets stored.");
            }
            writeln!(w, "{:<24} {:<20} {:>8}", "CONTENT", "FETCHED", "VIEWERS")?;
            pretty_rule(w)?;
            for row in rows {
                writeln!(
                    w,
                    "{:<24} {:<20} {:>8}{}",
                    row.meta.content_id.as_str(),
                    local_time(row.meta.fetched_at),
                    row.meta.record_count,
                    if row.expired { "  (expired)" } else { "" }
                )?;
            }
            Ok(())
        },
    )
}
