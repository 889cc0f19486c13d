//! Opening a project store for one command.
//!
//! A [`Session`] holds the advisory lock for its whole lifetime, so two
//! `sight` processes never write the same store at once.

use std::path::Path;

use anyhow::{Context as _, Result};
use sightline_core::config::{self, EffectiveConfig};
use sightline_core::engine::{Context, Engine, EngineOptions};
use sightline_core::error::ErrorCode;
use sightline_core::lock::{DEFAULT_LOCK_TIMEOUT, LockMode, StoreLock};
use sightline_core::model::OwnerId;
use sightline_core::storage::SqliteStorage;
use tracing::debug;

use crate::output::{CliError, OutputMode, render_error};

/// Owner used when neither `--owner` nor any config names one.
pub const DEFAULT_OWNER: &str = "local";

pub struct Session {
    pub engine: Engine<SqliteStorage>,
    pub ctx: Context,
    _lock: StoreLock,
}

impl Session {
    /// Open the store under `project_root`.
    ///
    /// # Errors
    ///
    /// Fails if the project is not initialized, the lock cannot be taken
    /// within [`DEFAULT_LOCK_TIMEOUT`], the owner id is empty, or the
    /// database cannot be opened.
    pub fn open(
        project_root: &Path,
        config: &EffectiveConfig,
        owner_flag: Option<&str>,
        mode: LockMode,
        output: OutputMode,
    ) -> Result<Self> {
        let store = config::store_dir(project_root);
        if !store.is_dir() {
            render_error(output, &CliError::from(ErrorCode::NotInitialized))?;
            anyhow::bail!("{} not found", store.display());
        }

        let lock = match StoreLock::acquire(&store.join(config::LOCK_FILE), DEFAULT_LOCK_TIMEOUT, mode) {
            Ok(lock) => lock,
            Err(error) => {
                render_error(output, &CliError::coded(error.code(), error.to_string()))?;
                return Err(error).context("failed to lock store");
            }
        };

        let storage = match SqliteStorage::open(&store.join(config::DB_FILE)) {
            Ok(storage) => storage,
            Err(error) => {
                render_error(output, &CliError::coded(error.code(), error.to_string()))?;
                return Err(error).context("failed to open store");
            }
        };

        let owner = resolve_owner(owner_flag, config);
        let owner_id = match OwnerId::new(owner) {
            Ok(id) => id,
            Err(error) => {
                render_error(
                    output,
                    &CliError::coded(ErrorCode::InvalidIdentifier, format!("owner: {error}")),
                )?;
                anyhow::bail!("invalid owner id");
            }
        };
        debug!(owner_id = %owner_id, ?mode, "opened session");

        let engine = Engine::with_system_clock(storage, EngineOptions::from(&config.project));
        Ok(Self {
            engine,
            ctx: Context::new(owner_id),
            _lock: lock,
        })
    }
}

/// `--owner`, then project/user config, then [`DEFAULT_OWNER`].
pub fn resolve_owner<'a>(owner_flag: Option<&'a str>, config: &'a EffectiveConfig) -> &'a str {
    owner_flag
        .or_else(|| config.default_owner())
        .unwrap_or(DEFAULT_OWNER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::config::{ProjectConfig, UserConfig};

    fn config(project_owner: Option<&str>, user_owner: Option<&str>) -> EffectiveConfig {
        let mut project = ProjectConfig::default();
        project.session.owner = project_owner.map(str::to_string);
        EffectiveConfig {
            project,
            user: UserConfig {
                output: None,
                owner: user_owner.map(str::to_string),
            },
            resolved_output: "text".to_string(),
        }
    }

    #[test]
    fn flag_beats_config() {
        let cfg = config(Some("proj"), Some("user"));
        assert_eq!(resolve_owner(Some("flag"), &cfg), "flag");
    }

    #[test]
    fn project_config_beats_user_config() {
        let cfg = config(Some("proj"), Some("user"));
        assert_eq!(resolve_owner(None, &cfg), "proj");
        let cfg = config(None, Some("user"));
        assert_eq!(resolve_owner(None, &cfg), "user");
    }

    #[test]
    fn falls_back_to_default_owner() {
        assert_eq!(resolve_owner(None, &config(None, None)), DEFAULT_OWNER);
    }
}
