#![forbid(unsafe_code)]

mod cmd;
mod output;
mod session;

use std::env;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use sightline_core::config;
use sightline_core::error::ErrorCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "sight: viewer-record reconciliation with novelty tracking",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a sightline store",
        long_about = "Create .sightline/ with a default config and an empty database.",
        after_help = "EXAMPLES:\n    # Constrained tier (3 buckets)\n    sight init\n\n    # Unbounded capacity, default owner\n    sight init --tier expanded --owner me"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Write",
        about = "Ingest one chunk of raw viewer records",
        long_about = "Normalize a chunk message, merge it into its bucket and persist the result.",
        after_help = "EXAMPLES:\n    # From a file\n    sight ingest --input chunk.json\n\n    # From stdin\n    echo '{\"contentId\":\"S1\",\"records\":[{\"pk\":1}]}' | sight ingest"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        next_help_heading = "Write",
        about = "Process a JSONL event stream",
        long_about = "Host the engine over chunk, review and tick events, printing every published snapshot.",
        after_help = "EXAMPLES:\n    sight run --input events.jsonl\n    tail -f events.jsonl | sight run --json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        next_help_heading = "Write",
        about = "Mark content as reviewed",
        long_about = "Advance the owner's checkpoint to now; later captures count as new.",
        after_help = "EXAMPLES:\n    sight review S1\n    sight review S1 --owner alice"
    )]
    Review(cmd::review::ReviewArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show the projection for one content id",
        after_help = "EXAMPLES:\n    sight show S1\n    sight show S1 --new-only --limit 20\n    sight show S1 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(next_help_heading = "Read", about = "List stored buckets, newest first")]
    List,

    #[command(
        next_help_heading = "Maintenance",
        about = "Apply the retention policy now"
    )]
    Sweep,

    #[command(
        next_help_heading = "Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    sight completions bash\n    sight completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env("SIGHT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() || verbose {
            "sightline=debug,info"
        } else if quiet {
            "error"
        } else {
            "sightline=info,warn"
        })
    });

    let format = env::var("SIGHT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let project_root = env::current_dir()?;
    let effective = match config::resolve_config(&project_root, cli.json) {
        Ok(effective) => effective,
        Err(error) => {
            let mode = if cli.json {
                OutputMode::Json
            } else {
                OutputMode::Text
            };
            output::render_error(
                mode,
                &output::CliError::coded(ErrorCode::ConfigParseError, format!("{error:#}")),
            )?;
            return Err(error);
        }
    };
    let output = OutputMode::from_resolved(&effective.resolved_output);
    debug!(?output, root = %project_root.display(), "resolved configuration");
    if cli.verbose {
        info!("verbose mode enabled");
    }

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, &project_root),
        Commands::Ingest(ref args) => {
            cmd::ingest::run_ingest(args, &effective, output, &project_root)
        }
        Commands::Run(ref args) => cmd::run::run_stream(args, &effective, output, &project_root),
        Commands::Review(ref args) => {
            cmd::review::run_review(args, &effective, output, &project_root)
        }
        Commands::Show(ref args) => cmd::show::run_show(args, &effective, output, &project_root),
        Commands::List => cmd::list::run_list(&effective, output, &project_root),
        Commands::Sweep => cmd::sweep::run_sweep(&effective, output, &project_root),
        Commands::Completions(ref args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}
