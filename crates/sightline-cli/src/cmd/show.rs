//! `sight show`: print the projection of one bucket for one owner.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use sightline_core::config::EffectiveConfig;
use sightline_core::error::ErrorCode;
use sightline_core::lock::LockMode;
use sightline_core::model::ContentId;
use sightline_core::projection::{ProjectionSnapshot, ViewerRow};

use crate::output::{
    CliError, OutputMode, local_time, pretty_kv, pretty_rule, pretty_section, render_error,
    render_mode,
};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub content_id: String,

    #[arg(long)]
    pub owner: Option<String>,

    /// Only rows captured after the owner's checkpoint.
    #[arg(long)]
    pub new_only: bool,

    /// Maximum number of rows to print.
    #[arg(long)]
    pub limit: Option<usize>,
}

pub(crate) fn parse_content_id(raw: &str, output: OutputMode) -> Result<ContentId> {
    match ContentId::new(raw) {
        Ok(id) => Ok(id),
        Err(error) => {
            render_error(
                output,
                &CliError::coded(ErrorCode::InvalidIdentifier, error.to_string()),
            )?;
            anyhow::bail!("{error}");
        }
    }
}

/// One-line summary shared by the streaming commands.
pub(crate) fn summary_line(snapshot: &ProjectionSnapshot) -> String {
    let reported = snapshot
        .reported_total
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    format!(
        "{} owner={} total={} new={} reported={} followers={} reactions={} gen={}",
        snapshot.content_id,
        snapshot.owner_id,
        snapshot.total,
        snapshot.new_count,
        reported,
        snapshot.follower_count,
        snapshot.reaction_count,
        snapshot.generation
    )
}

fn row_line(row: &ViewerRow) -> String {
    let record = &row.record;
    let mut flags = String::new();
    if row.is_new {
        flags.push('*');
    }
    if record.verified {
        flags.push('✓');
    }
    if record.follows_subject {
        flags.push('F');
    }
    let handle = if record.handle.is_empty() {
        "-"
    } else {
        record.handle.as_str()
    };
    format!(
        "{:<4} {:<20} {:<24} {}",
        flags,
        record.id.as_str(),
        handle,
        record.reaction.as_deref().unwrap_or("")
    )
}

/// Execute `sight show <CONTENT_ID>`.
///
/// # Errors
///
/// Fails on an empty content id, if the store cannot be opened, or if
/// writing output fails.
pub fn run_show(
    args: &ShowArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let content_id = parse_content_id(&args.content_id, output)?;
    let mut session = Session::open(
        project_root,
        config,
        args.owner.as_deref(),
        LockMode::Shared,
        output,
    )?;
    let mut snapshot = (*session.engine.snapshot(&session.ctx, &content_id)).clone();
    if args.new_only {
        snapshot.records.retain(|row| row.is_new);
    }
    if let Some(limit) = args.limit {
        snapshot.records.truncate(limit);
    }

    render_mode(
        output,
        &snapshot,
        |s, w| {
            writeln!(w, "{}", summary_line(s))?;
            for row in &s.records {
                writeln!(w, "{}", row_line(row))?;
            }
            Ok(())
        },
        |s, w| {
            pretty_section(w, &format!("{} for {}", s.content_id, s.owner_id))?;
            pretty_kv(w, "Viewers", s.total.to_string())?;
            if let Some(reported) = s.reported_total {
                pretty_kv(w, "Reported", reported.to_string())?;
            }
            pretty_kv(w, "New", s.new_count.to_string())?;
            pretty_kv(w, "Followers", s.follower_count.to_string())?;
            pretty_kv(w, "Reactions", s.reaction_count.to_string())?;
            pretty_kv(
                w,
                "Checkpoint",
                s.checkpoint.map_or_else(|| "never".to_string(), local_time),
            )?;
            pretty_rule(w)?;
            if s.records.is_empty() {
                writeln!(w, "(no viewers)")?;
            }
            for row in &s.records {
                writeln!(w, "{}", row_line(row))?;
            }
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use sightline_core::model::{ViewerId, ViewerRecord};

    #[test]
    fn row_line_marks_new_verified_followers() {
        let mut record = ViewerRecord::new(
            ViewerId::new("42").unwrap(),
            DateTime::from_timestamp(0, 0).unwrap(),
        );
        record.handle = "ada".to_string();
        record.verified = true;
        record.follows_subject = true;
        record.reaction = Some("🔥".to_string());
        let line = row_line(&ViewerRow {
            record,
            is_new: true,
        });
        assert!(line.starts_with("*✓F"));
        assert!(line.contains("ada"));
        assert!(line.ends_with("🔥"));
    }

    #[test]
    fn row_line_uses_dash_for_missing_handle() {
        let record = ViewerRecord::new(
            ViewerId::new("7").unwrap(),
            DateTime::from_timestamp(0, 0).unwrap(),
        );
        let line = row_line(&ViewerRow {
            record,
            is_new: false,
        });
        assert!(line.contains(" - "));
        assert!(!line.starts_with('*'));
    }
}
