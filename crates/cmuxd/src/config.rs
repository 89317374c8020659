//! Process-level configuration for the `cmuxd` binary: external binaries,
//! the worker image, and the reconciler poll cadence. Distinct from
//! `cmux_core::Settings`, which the control plane owns and the engine reads
//! per-operation via `settings_get`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read cmuxd config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse cmuxd config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmuxdConfig {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
    #[serde(default = "default_gh_binary")]
    pub gh_binary: String,
    #[serde(default = "default_worker_image")]
    pub worker_image: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for CmuxdConfig {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            git_binary: default_git_binary(),
            gh_binary: default_gh_binary(),
            worker_image: default_worker_image(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl CmuxdConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        toml::from_str(&body).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_gh_binary() -> String {
    "gh".to_string()
}

fn default_worker_image() -> String {
    std::env::var("WORKER_IMAGE_NAME").unwrap_or_else(|_| "cmux-worker:latest".to_string())
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Resolves the home directory the Workspace Planner expands `~` against
///, falling back to the current directory when unset.
pub fn resolve_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_bare_binary_names() {
        let config = CmuxdConfig::default();
        assert_eq!(config.docker_binary, "docker");
        assert_eq!(config.git_binary, "git");
        assert_eq!(config.gh_binary, "gh");
        assert_eq!(config.poll_interval_secs, 60);
    }

    #[test]
    fn load_parses_partial_overrides_with_defaults_filled_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cmuxd.toml");
        fs::write(&path, "poll_interval_secs = 15\n").expect("write config");
        let config = CmuxdConfig::load(&path).expect("load config");
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.docker_binary, "docker");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CmuxdConfig::load("/nonexistent/cmuxd.toml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
