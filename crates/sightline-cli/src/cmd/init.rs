use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use sightline_core::config::{self, ProjectConfig, Tier};
use sightline_core::storage::SqliteStorage;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TierArg {
    Constrained,
    Expanded,
}

impl From<TierArg> for Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Constrained => Self::Constrained,
            TierArg::Expanded => Self::Expanded,
        }
    }
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.sightline/config.toml`.
    #[arg(long)]
    pub force: bool,

    /// Storage tier, which sets the default bucket capacity.
    #[arg(long, value_enum, default_value = "constrained")]
    pub tier: TierArg,

    /// Default owner recorded in the project config.
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitReport {
    store: String,
    config: String,
    database: String,
    tier: Tier,
    max_buckets: Option<usize>,
}

/// Execute `sight init`:
///
/// ```text
/// .sightline/
///   config.toml
///   sightline.db
/// ```
///
/// # Errors
///
/// Fails if the store already exists without `--force`, or on any
/// filesystem or database error.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let store = config::store_dir(project_root);
    if store.join(config::CONFIG_FILE).exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use `sight init --force` to reinitialize.",
            store.display()
        );
    }

    let mut project = ProjectConfig::default();
    project.retention.tier = args.tier.into();
    project.session.owner = args
        .owner
        .as_deref()
        .map(str::trim)
        .filter(|owner| !owner.is_empty())
        .map(str::to_string);
    let config_path = config::write_project_config(project_root, &project)?;

    let db_path = store.join(config::DB_FILE);
    SqliteStorage::open(&db_path)
        .with_context(|| format!("Failed to create {}", db_path.display()))?;

    let report = InitReport {
        store: store.display().to_string(),
        config: config_path.display().to_string(),
        database: db_path.display().to_string(),
        tier: project.retention.tier,
        max_buckets: project.retention.policy().max_buckets,
    };

    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "initialized {}", r.store),
        |r, w| {
            pretty_section(w, "Initialized .sightline/")?;
            pretty_kv(w, "Config", &r.config)?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(
                w,
                "Capacity",
                r.max_buckets
                    .map_or_else(|| "unbounded".to_string(), |max| format!("{max} buckets")),
            )?;
            writeln!(w)?;
            writeln!(w, "Next: pipe a chunk into `sight ingest`.")
        },
    )
}
