use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retention::{CONSTRAINED_MAX_BUCKETS, RetentionPolicy};

/// Directory holding the store, lock and project config.
pub const STORE_DIR: &str = ".sightline";
/// Project config file name inside [`STORE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";
/// Database file name inside [`STORE_DIR`].
pub const DB_FILE: &str = "sightline.db";
/// Lock file name inside [`STORE_DIR`].
pub const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Storage tier; decides the default capacity bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Constrained,
    Expanded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub tier: Tier,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Explicit capacity bound, overriding the tier default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_buckets: Option<usize>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            tier: Tier::default(),
            ttl_ms: default_ttl_ms(),
            max_buckets: None,
        }
    }
}

impl RetentionConfig {
    /// Effective eviction policy.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        let tier_cap = match self.tier {
            Tier::Constrained => Some(CONSTRAINED_MAX_BUCKETS),
            Tier::Expanded => None,
        };
        RetentionPolicy {
            max_buckets: self.max_buckets.or(tier_cap),
            ttl: Duration::from_millis(self.ttl_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            coalesce_ms: default_coalesce_ms(),
        }
    }
}

impl ProjectionConfig {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Default owner for commands that take `--owner`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

impl EffectiveConfig {
    /// Owner from the project session, then the user config.
    #[must_use]
    pub fn default_owner(&self) -> Option<&str> {
        self.project
            .session
            .owner
            .as_deref()
            .or(self.user.owner.as_deref())
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
    }
}

/// `.sightline/` under `project_root`.
#[must_use]
pub fn store_dir(project_root: &Path) -> PathBuf {
    project_root.join(STORE_DIR)
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = store_dir(project_root).join(CONFIG_FILE);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write `config` to `.sightline/config.toml`, creating the directory.
pub fn write_project_config(project_root: &Path, config: &ProjectConfig) -> Result<PathBuf> {
    let dir = store_dir(project_root);
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(CONFIG_FILE);
    let content = toml::to_string_pretty(config).context("Failed to serialize project config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("sightline").join(CONFIG_FILE);
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        project,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    env_format
        .and_then(normalize_output_mode)
        .or_else(|| user_output.and_then(normalize_output_mode))
        .map_or_else(
            || {
                if std::io::stdout().is_terminal() {
                    "pretty".to_string()
                } else {
                    "text".to_string()
                }
            },
            str::to_string,
        )
}

const fn default_ttl_ms() -> u64 {
    24 * 60 * 60 * 1_000
}

const fn default_coalesce_ms() -> u64 {
    150
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = TempDir::new().expect("temp dir");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert_eq!(cfg.retention.tier, Tier::Constrained);
        assert_eq!(cfg.retention.ttl_ms, 86_400_000);
        assert_eq!(cfg.projection.coalesce_ms, 150);
        assert_eq!(cfg.session.owner, None);

        let policy = cfg.retention.policy();
        assert_eq!(policy.max_buckets, Some(3));
        assert_eq!(policy.ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn expanded_tier_is_unbounded_unless_overridden() {
        let cfg: ProjectConfig = toml::from_str("[retention]\ntier = \"expanded\"\n").expect("parse");
        assert_eq!(cfg.retention.policy().max_buckets, None);

        let cfg: ProjectConfig =
            toml::from_str("[retention]\ntier = \"expanded\"\nmax_buckets = 10\nttl_ms = 1000\n")
                .expect("parse");
        let policy = cfg.retention.policy();
        assert_eq!(policy.max_buckets, Some(10));
        assert_eq!(policy.ttl, Duration::from_millis(1_000));
    }

    #[test]
    fn write_then_load_project_config() {
        let root = TempDir::new().expect("temp dir");
        let mut cfg = ProjectConfig::default();
        cfg.session.owner = Some("me".to_string());
        cfg.projection.coalesce_ms = 25;

        let path = write_project_config(root.path(), &cfg).expect("write");
        assert!(path.ends_with(".sightline/config.toml"));
        assert_eq!(load_project_config(root.path()).expect("load"), cfg);
    }

    #[test]
    fn malformed_project_config_is_an_error() {
        let root = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(store_dir(root.path())).expect("mkdir");
        std::fs::write(store_dir(root.path()).join(CONFIG_FILE), "[retention\n").expect("write");

        let err = load_project_config(root.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        assert_eq!(resolve_output(true, Some("pretty"), Some("text")), "json");
    }

    #[test]
    fn env_beats_user_config_and_aliases_normalize() {
        assert_eq!(resolve_output(false, Some("plain"), Some("human")), "pretty");
        assert_eq!(resolve_output(false, Some("plain"), Some("bogus")), "text");
    }

    #[test]
    fn default_owner_prefers_project_session() {
        let mut effective = EffectiveConfig {
            project: ProjectConfig::default(),
            user: UserConfig {
                output: None,
                owner: Some("user-owner".to_string()),
            },
            resolved_output: "text".to_string(),
        };
        assert_eq!(effective.default_owner(), Some("user-owner"));

        effective.project.session.owner = Some("project-owner".to_string());
        assert_eq!(effective.default_owner(), Some("project-owner"));
    }
}
