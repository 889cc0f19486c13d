//! `sight ingest`: merge one chunk message into the store.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use sightline_core::config::EffectiveConfig;
use sightline_core::engine::{Chunk, IngestReport};
use sightline_core::error::ErrorCode;
use sightline_core::lock::LockMode;
use sightline_core::normalize::Rejection;

use crate::cmd::read_input;
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render_error, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Chunk file (`{"contentId": ..., "records": [...]}`); stdin when omitted.
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Owner whose projection is refreshed.
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RejectionView {
    index: usize,
    code: String,
    message: String,
}

impl From<&Rejection> for RejectionView {
    fn from(rejection: &Rejection) -> Self {
        Self {
            index: rejection.index,
            code: rejection.error.code().code().to_string(),
            message: rejection.error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestOutput<'a> {
    #[serde(flatten)]
    report: &'a IngestReport,
    rejections: Vec<RejectionView>,
    total: usize,
    new_count: usize,
}

/// Parse a chunk message, reporting a coded error when it is not one.
pub(crate) fn parse_chunk(raw: &str, output: OutputMode) -> Result<Chunk> {
    match serde_json::from_str::<Chunk>(raw) {
        Ok(chunk) => Ok(chunk),
        Err(error) => {
            render_error(
                output,
                &CliError::coded(ErrorCode::InvalidChunk, format!("invalid chunk: {error}")),
            )?;
            anyhow::bail!("invalid chunk: {error}");
        }
    }
}

/// Execute `sight ingest`.
///
/// # Errors
///
/// Fails if the input is unreadable, is not a chunk message, or the store
/// cannot be opened. Rejected records and storage write failures are
/// reported, not fatal.
pub fn run_ingest(
    args: &IngestArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let raw = read_input(args.input.as_deref())?;
    let chunk = parse_chunk(&raw, output)?;

    let mut session = Session::open(
        project_root,
        config,
        args.owner.as_deref(),
        LockMode::Exclusive,
        output,
    )?;
    let report = session.engine.ingest(&session.ctx, chunk);
    session.engine.flush();
    let snapshot = session.engine.snapshot(&session.ctx, &report.content_id);

    let view = IngestOutput {
        report: &report,
        rejections: report.rejections.iter().map(RejectionView::from).collect(),
        total: snapshot.total,
        new_count: snapshot.new_count,
    };

    render_mode(
        output,
        &view,
        |v, w| {
            writeln!(
                w,
                "{} inserted={} updated={} unchanged={} rejected={} total={} new={}",
                v.report.content_id,
                v.report.merge.inserted,
                v.report.merge.updated,
                v.report.merge.unchanged,
                v.report.rejected,
                v.total,
                v.new_count
            )?;
            for rejection in &v.rejections {
                writeln!(w, "rejected[{}] {} {}", rejection.index, rejection.code, rejection.message)?;
            }
            Ok(())
        },
        |v, w| {
            pretty_section(w, &format!("Ingested {}", v.report.content_id))?;
            pretty_kv(w, "Inserted", v.report.merge.inserted.to_string())?;
            pretty_kv(w, "Updated", v.report.merge.updated.to_string())?;
            pretty_kv(w, "Unchanged", v.report.merge.unchanged.to_string())?;
            pretty_kv(w, "Total", v.total.to_string())?;
            pretty_kv(w, "New", v.new_count.to_string())?;
            if !v.report.persisted {
                pretty_kv(w, "Persisted", "no (kept in memory; see logs)")?;
            }
            if !v.report.evicted.is_empty() {
                let evicted: Vec<String> = v.report.evicted.iter().map(ToString::to_string).collect();
                pretty_kv(w, "Evicted", evicted.join(", "))?;
            }
            for rejection in &v.rejections {
                writeln!(
                    w,
                    "  skipped record #{} [{}]: {}",
                    rejection.index, rejection.code, rejection.message
                )?;
            }
            Ok(())
        },
    )
}
