use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use sightline_core::config::EffectiveConfig;
use sightline_core::lock::LockMode;
use sightline_core::model::{ContentId, OwnerId};

use crate::cmd::show::parse_content_id;
use crate::output::{OutputMode, local_time, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Content the owner just looked at.
    pub content_id: String,

    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewOutput {
    content_id: ContentId,
    owner_id: OwnerId,
    checkpoint: DateTime<Utc>,
    new_count: usize,
}

/// Execute `sight review <CONTENT_ID>`: advance the owner's checkpoint.
///
/// # Errors
///
/// Fails on an empty content id or if the store cannot be opened. A failed
/// checkpoint write is logged and does not fail the command.
pub fn run_review(
    args: &ReviewArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let content_id = parse_content_id(&args.content_id, output)?;
    let mut session = Session::open(
        project_root,
        config,
        args.owner.as_deref(),
        LockMode::Exclusive,
        output,
    )?;

    let checkpoint = session.engine.review(&session.ctx, &content_id);
    let published = session.engine.flush();
    let new_count = published
        .iter()
        .find(|snapshot| snapshot.content_id == content_id)
        .map_or(0, |snapshot| snapshot.new_count);

    let view = ReviewOutput {
        content_id,
        owner_id: session.ctx.owner_id.clone(),
        checkpoint,
        new_count,
    };
    render_mode(
        output,
        &view,
        |v, w| writeln!(w, "{} {} {}", v.content_id, v.owner_id, v.checkpoint.to_rfc3339()),
        |v, w| {
            writeln!(
                w,
                "✓ {} reviewed {} at {}",
                v.owner_id,
                v.content_id,
                local_time(v.checkpoint)
            )
        },
    )
}
