use std::io::Write;
use std::path::Path;

use anyhow::Result;
use sightline_core::config::EffectiveConfig;
use sightline_core::lock::LockMode;
use sightline_core::retention::SweepReport;

use crate::output::{OutputMode, render_mode};
use crate::session::Session;

fn joined(report: &SweepReport) -> String {
    report
        .evicted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Execute `sight sweep`: apply the retention policy now.
///
/// # Errors
///
/// Fails if the store cannot be opened. Individual delete failures are
/// reported in the output and retried by the next sweep.
pub fn run_sweep(
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let mut session = Session::open(project_root, config, None, LockMode::Exclusive, output)?;
    let report = session.engine.sweep();

    render_mode(
        output,
        &report,
        |r, w| {
            if !r.evicted.is_empty() {
                writeln!(w, "evicted {}", joined(r))?;
            }
            Ok(())
        },
        |r, w| {
            if r.evicted.is_empty() {
                writeln!(w, "Nothing to evict.")?;
            } else {
                writeln!(w, "✓ Evicted {} bucket(s): {}", r.evicted.len(), joined(r))?;
            }
            if !r.failed.is_empty() {
                let failed: Vec<String> = r.failed.iter().map(ToString::to_string).collect();
                writeln!(w, "  delete failed for {}; will retry on the next sweep", failed.join(" "))?;
            }
            if r.listing_failed {
                writeln!(w, "  storage listing failed; only resident buckets were checked")?;
            }
            Ok(())
        },
    )
}
