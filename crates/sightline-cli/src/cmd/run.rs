//! `sight run`: host the engine over a JSONL event stream.
//!
//! Each non-empty line is one event:
//!
//! ```text
//! {"type":"chunk","contentId":"S1","records":[...],"reportedTotal":40}
//! {"type":"review","contentId":"S1"}
//! {"type":"tick"}
//! ```
//!
//! Input is read on its own thread. While the stream is idle the host
//! sleeps until the next coalesced rebuild is due and publishes it then;
//! pending rebuilds are flushed at end of input. Every published snapshot
//! is printed as it arrives.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;

use anyhow::{Context as _, Result};
use clap::Args;
use serde_json::json;
use sightline_core::config::EffectiveConfig;
use sightline_core::engine::{Event, Outcome};
use sightline_core::lock::LockMode;
use sightline_core::projection::ProjectionSnapshot;
use tracing::{info, warn};

use crate::cmd::show::summary_line;
use crate::output::{OutputMode, json_line};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSONL event file; stdin when omitted.
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Default owner for chunk and review events.
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunStats {
    events: usize,
    invalid: usize,
    published: usize,
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead + Send>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Forward input lines to the host loop until EOF or the loop goes away.
fn spawn_reader(input: Box<dyn BufRead + Send>) -> Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in input.lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn drain(
    rx: &Receiver<Arc<ProjectionSnapshot>>,
    stats: &mut RunStats,
    output: OutputMode,
) -> Result<()> {
    for snapshot in rx.try_iter() {
        stats.published += 1;
        emit_published(&snapshot, output)?;
    }
    Ok(())
}

fn emit_published(snapshot: &ProjectionSnapshot, output: OutputMode) -> Result<()> {
    if output.is_json() {
        json_line(&json!({
            "type": "published",
            "contentId": snapshot.content_id,
            "ownerId": snapshot.owner_id,
            "total": snapshot.total,
            "newCount": snapshot.new_count,
            "reportedTotal": snapshot.reported_total,
            "generation": snapshot.generation,
        }))
    } else {
        writeln!(io::stdout(), "published {}", summary_line(snapshot))?;
        Ok(())
    }
}

fn emit_outcome(outcome: &Outcome, output: OutputMode) -> Result<()> {
    let mut out = io::stdout();
    match outcome {
        Outcome::Ingested(report) if output.is_json() => {
            let mut value = serde_json::to_value(report)?;
            value["type"] = json!("ingested");
            json_line(&value)
        }
        Outcome::Ingested(report) => {
            writeln!(
                out,
                "ingested {} inserted={} updated={} unchanged={} rejected={}",
                report.content_id,
                report.merge.inserted,
                report.merge.updated,
                report.merge.unchanged,
                report.rejected
            )?;
            Ok(())
        }
        Outcome::Reviewed {
            content_id,
            owner_id,
            checkpoint,
        } if output.is_json() => json_line(&json!({
            "type": "reviewed",
            "contentId": content_id,
            "ownerId": owner_id,
            "checkpoint": checkpoint,
        })),
        Outcome::Reviewed {
            content_id,
            owner_id,
            checkpoint,
        } => {
            writeln!(out, "reviewed {content_id} owner={owner_id} at={}", checkpoint.to_rfc3339())?;
            Ok(())
        }
        // Published snapshots arrive through the subscription.
        Outcome::Ticked(_) => Ok(()),
    }
}

/// Execute `sight run`.
///
/// Lines that are not valid events are logged and skipped.
///
/// # Errors
///
/// Fails if the input cannot be read or the store cannot be opened.
pub fn run_stream(
    args: &RunArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let input = open_input(args.input.as_deref())?;
    let mut session = Session::open(
        project_root,
        config,
        args.owner.as_deref(),
        LockMode::Exclusive,
        output,
    )?;

    let (tx, rx) = mpsc::channel::<Arc<ProjectionSnapshot>>();
    session.engine.subscribe(move |snapshot| {
        // The receiver outlives the engine for the whole command.
        let _ = tx.send(Arc::clone(snapshot));
    });

    let lines = spawn_reader(input);
    let mut stats = RunStats::default();
    let mut line_no = 0_usize;
    loop {
        let next = match session.engine.time_until_due() {
            Some(wait) => match lines.recv_timeout(wait) {
                Ok(line) => Some(line),
                Err(RecvTimeoutError::Timeout) => {
                    session.engine.tick();
                    drain(&rx, &mut stats, output)?;
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => lines.recv().ok(),
        };
        let Some(line) = next else {
            break;
        };
        let line = line.context("Failed to read event stream")?;
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let event = match serde_json::from_str::<Event>(trimmed) {
            Ok(event) => event,
            Err(error) => {
                warn!(line = line_no, %error, "skipping invalid event");
                stats.invalid += 1;
                continue;
            }
        };
        stats.events += 1;

        let outcome = session.engine.handle(&session.ctx, event);
        emit_outcome(&outcome, output)?;
        session.engine.tick();
        drain(&rx, &mut stats, output)?;
    }

    session.engine.flush();
    drain(&rx, &mut stats, output)?;

    info!(
        events = stats.events,
        invalid = stats.invalid,
        published = stats.published,
        "event stream finished"
    );
    if output.is_json() {
        json_line(&json!({
            "type": "finished",
            "events": stats.events,
            "invalid": stats.invalid,
            "published": stats.published,
        }))
    } else {
        writeln!(
            io::stdout(),
            "finished events={} invalid={} published={}",
            stats.events,
            stats.invalid,
            stats.published
        )?;
        Ok(())
    }
}
