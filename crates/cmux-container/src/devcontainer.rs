//! Devcontainer bootstrap: fire-and-forget bring-up of
//! `.devcontainer/devcontainer.json` inside the container, tee'd to a
//! workspace-relative log the (external) UI can read back later via
//! `tail_devcontainer_log`.

use std::path::Path;

use crate::docker::DockerRuntime;
use crate::error::ContainerError;

pub const DEVCONTAINER_LOG_RELATIVE_PATH: &str = ".cmux/devcontainer.log";

/// True if the worktree carries a devcontainer definition worth bootstrapping.
pub fn has_devcontainer(worktree_path: &Path) -> bool {
    worktree_path.join(".devcontainer").join("devcontainer.json").is_file()
}

/// Spawns the bring-up command detached inside the container; never
/// awaited by callers beyond this call returning (spec: "This must not
/// block `start()`").
pub async fn bootstrap_devcontainer(
    docker: &dyn DockerRuntime,
    container_id: &str,
) -> Result<(), ContainerError> {
    let command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mkdir -p /root/workspace/.cmux && devcontainer up --workspace-folder /root/workspace >> /root/workspace/{DEVCONTAINER_LOG_RELATIVE_PATH} 2>&1"
        ),
    ];
    docker.exec_detached(container_id, command).await
}

/// Reads back the devcontainer log via the host bind mount
/// (`<worktree>/.cmux/devcontainer.log`), since `/root/workspace` in the
/// container is the same inode as the host worktree path.
pub async fn tail_devcontainer_log(
    worktree_path: &Path,
    max_bytes: usize,
) -> Result<String, ContainerError> {
    let log_path = worktree_path.join(DEVCONTAINER_LOG_RELATIVE_PATH);
    match tokio::fs::read(&log_path).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(max_bytes);
            Ok(String::from_utf8_lossy(&bytes[start..]).into_owned())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(ContainerError::Filesystem(err)),
    }
}
