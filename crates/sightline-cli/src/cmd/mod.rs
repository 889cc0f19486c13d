pub mod completions;
pub mod ingest;
pub mod init;
pub mod list;
pub mod review;
pub mod run;
pub mod show;
pub mod sweep;

use std::io::Read;
use std::path::Path;

use anyhow::{Context as _, Result};

/// Read a whole input file, or stdin when `path` is absent or `-`.
pub(crate) fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}
