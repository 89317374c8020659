//! Organization-wide settings consumed via `settings.get()`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize settings at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create settings parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Defaults to `<HOME>/cmux` when absent; the Workspace Planner expands
    /// a leading `~`.
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default)]
    pub ai_naming_enabled: bool,
    #[serde(default = "default_max_running")]
    pub max_running: usize,
    #[serde(default = "default_review_window_secs")]
    pub review_window_secs: u64,
    #[serde(default = "default_true")]
    pub auto_cleanup_enabled: bool,
    #[serde(default = "default_warm_retention_ms")]
    pub warm_retention_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worktree_root: None,
            branch_prefix: default_branch_prefix(),
            ai_naming_enabled: false,
            max_running: default_max_running(),
            review_window_secs: default_review_window_secs(),
            auto_cleanup_enabled: true,
            warm_retention_ms: default_warm_retention_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

fn default_branch_prefix() -> String {
    "cmux".to_string()
}

fn default_max_running() -> usize {
    8
}

fn default_review_window_secs() -> u64 {
    600
}

fn default_warm_retention_ms() -> u64 {
    30 * 60 * 1000
}

fn default_idle_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_true() -> bool {
    true
}

pub fn parse_settings(contents: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_settings(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

pub fn save_settings(path: impl AsRef<Path>, settings: &Settings) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent().map(Path::to_path_buf) {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(settings).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}
