use crate::dedup::score::ScoreRule;
use crate::metadata::AmbiguousPolicy;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backup_path: String,
    pub working_path: String,
    pub master_enabled: bool,
    pub master_dir: String,
    pub content_root_name: String,
    pub fix_ambiguous_metadata: AmbiguousPolicy,
    pub min_secure_prefix: usize,
    pub ignore_patterns: Vec<String>,
    pub delete_archives: bool,
    pub score_rules: Vec<ScoreRule>,
    /// Default tracing filter for the CLI.
    pub log_level: String,
    pub log_file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup_path: "./backup".to_string(),
            working_path: ".".to_string(),
            master_enabled: true,
            master_dir: "master".to_string(),
            content_root_name: "Google Photos".to_string(),
            fix_ambiguous_metadata: AmbiguousPolicy::No,
            min_secure_prefix: crate::metadata::DEFAULT_MIN_SECURE_PREFIX,
            ignore_patterns: Vec::new(),
            delete_archives: false,
            score_rules: crate::dedup::score::default_rules(),
            log_level: "info".to_string(),
            log_file: "./logs/snapvault.log".to_string(),
        }
    }
}

impl AppConfig {
    pub fn backup_root(&self) -> PathBuf {
        expand_path(&self.backup_path)
    }

    /// Where completed exports land: `<working_path>/downloads`.
    pub fn downloads_root(&self) -> PathBuf {
        expand_path(&self.working_path).join("downloads")
    }

    pub fn history_path(&self) -> PathBuf {
        expand_path(&self.working_path).join("history.json")
    }

    pub fn master_root(&self) -> PathBuf {
        self.backup_root().join(&self.master_dir)
    }

    pub fn log_file_path(&self) -> PathBuf {
        expand_path(&self.log_file)
    }
}

/// Load `Config.toml` (optional) layered with `SNAPVAULT_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("SNAPVAULT"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
