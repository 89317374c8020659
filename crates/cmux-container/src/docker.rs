//! Container runtime capability.
//! The only implementation here drives the `docker` CLI, matching the
//! CLI-driven container patterns used elsewhere in the retrieved pack
//! (`tftio-gator`'s `ContainerIsolation`) rather than linking a Docker
//! Engine API client crate.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use cmux_core::PortTriple;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::ContainerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

impl BindMount {
    pub fn rw(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn ro(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    fn to_arg(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path.display(),
            mode
        )
    }
}

/// Container ports exposed dynamically (`0:<container_port>`), keyed by
/// logical role so `inspect_ports` can map them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposedPorts {
    pub ide: u16,
    pub worker: u16,
    pub extension: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub privileged: bool,
    pub env: BTreeMap<String, String>,
    pub binds: Vec<BindMount>,
    pub ports: ExposedPorts,
}

#[async_trait]
pub trait DockerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;
    async fn pull_image(&self, image: &str) -> Result<(), ContainerError>;
    /// Creates the volume if absent. Returns whether it already existed,
    /// so callers can tell a fresh session from a resumed one.
    async fn volume_ensure(&self, name: &str) -> Result<bool, ContainerError>;
    async fn volume_remove(&self, name: &str) -> Result<(), ContainerError>;
    /// Stop + remove any existing container of this name, ignoring "not
    /// found".
    async fn remove_stale_container(&self, name: &str) -> Result<(), ContainerError>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;
    async fn start_container(&self, container_id: &str) -> Result<(), ContainerError>;
    async fn inspect_ports(
        &self,
        container_id: &str,
        container_ports: ExposedPorts,
    ) -> Result<PortTriple, ContainerError>;
    async fn is_running(&self, container_id: &str) -> Result<bool, ContainerError>;
    /// Names of containers whose name starts with `name_prefix`, used by the reconciler to find
    /// containers the registry doesn't know about.
    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<String>, ContainerError>;
    /// Tolerates "already stopped" as success.
    async fn stop_container(&self, container_id: &str) -> Result<(), ContainerError>;
    async fn logs_tail(&self, container_id: &str, lines: usize) -> Result<String, ContainerError>;
    /// Blocks until the container exits, returning its exit code.
    async fn wait_exit(&self, container_id: &str) -> Result<Option<i32>, ContainerError>;
    /// Fire-and-forget exec used for the devcontainer bootstrap: must not block the caller.
    async fn exec_detached(
        &self,
        container_id: &str,
        command: Vec<String>,
    ) -> Result<(), ContainerError>;
}

/// Drives the `docker` binary on `PATH`.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    pub binary: PathBuf,
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
        }
    }
}

impl DockerCliRuntime {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(String, String, bool), ContainerError> {
        let rendered = render_command(&self.binary, args);
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ContainerError::Io {
                command: rendered.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok((stdout, stderr, output.status.success()))
    }

    async fn run_ok(&self, args: &[&str]) -> Result<String, ContainerError> {
        let rendered = render_command(&self.binary, args);
        let (stdout, stderr, ok) = self.run(args).await?;
        if !ok {
            return Err(ContainerError::CommandFailed {
                command: rendered,
                status: None,
                stderr,
            });
        }
        Ok(stdout)
    }
}

#[derive(Debug, Deserialize)]
struct InspectPortBinding {
    #[serde(rename = "HostPort")]
    host_port: String,
}

#[async_trait]
impl DockerRuntime for DockerCliRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        let (_, _, ok) = self.run(&["image", "inspect", image]).await?;
        Ok(ok)
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        self.run_ok(&["pull", image]).await.map(|_| ())
    }

    async fn volume_ensure(&self, name: &str) -> Result<bool, ContainerError> {
        let (_, _, exists) = self.run(&["volume", "inspect", name]).await?;
        if exists {
            return Ok(true);
        }
        self.run_ok(&["volume", "create", name]).await?;
        Ok(false)
    }

    async fn volume_remove(&self, name: &str) -> Result<(), ContainerError> {
        let (_, stderr, ok) = self.run(&["volume", "rm", name]).await?;
        if ok || stderr.contains("No such volume") {
            return Ok(());
        }
        Err(ContainerError::CommandFailed {
            command: render_command(&self.binary, &["volume", "rm", name]),
            status: None,
            stderr,
        })
    }

    async fn remove_stale_container(&self, name: &str) -> Result<(), ContainerError> {
        let _ = self.run(&["stop", name]).await;
        let (_, stderr, ok) = self.run(&["rm", "-f", name]).await?;
        if ok || stderr.contains("No such container") {
            return Ok(());
        }
        Err(ContainerError::CommandFailed {
            command: render_command(&self.binary, &["rm", "-f", name]),
            status: None,
            stderr,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let mut args: Vec<String> = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        if spec.privileged {
            args.push("--privileged".to_string());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for bind in &spec.binds {
            args.push("-v".to_string());
            args.push(bind.to_arg());
        }
        for container_port in [spec.ports.ide, spec.ports.worker, spec.ports.extension] {
            args.push("-p".to_string());
            args.push(format!("0:{container_port}"));
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run_ok(&arg_refs).await?;
        Ok(stdout.trim().to_string())
    }

    async fn start_container(&self, container_id: &str) -> Result<(), ContainerError> {
        self.run_ok(&["start", container_id]).await.map(|_| ())
    }

    async fn inspect_ports(
        &self,
        container_id: &str,
        container_ports: ExposedPorts,
    ) -> Result<PortTriple, ContainerError> {
        let stdout = self
            .run_ok(&["inspect", "--format", "{{json .NetworkSettings.Ports}}", container_id])
            .await?;
        let trimmed = stdout.trim();
        Ok(PortTriple {
            ide: parse_host_port(trimmed, container_ports.ide, "tcp"),
            worker: parse_host_port(trimmed, container_ports.worker, "tcp"),
            extension: parse_host_port(trimmed, container_ports.extension, "tcp"),
        })
    }

    async fn is_running(&self, container_id: &str) -> Result<bool, ContainerError> {
        let stdout = self
            .run_ok(&["inspect", "--format", "{{.State.Running}}", container_id])
            .await?;
        Ok(stdout.trim() == "true")
    }

    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<String>, ContainerError> {
        let filter = format!("name={name_prefix}");
        let stdout = self
            .run_ok(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), ContainerError> {
        let (_, stderr, ok) = self.run(&["stop", container_id]).await?;
        if ok
            || stderr.contains("is not running")
            || stderr.contains("No such container")
        {
            return Ok(());
        }
        Err(ContainerError::CommandFailed {
            command: render_command(&self.binary, &["stop", container_id]),
            status: None,
            stderr,
        })
    }

    async fn logs_tail(&self, container_id: &str, lines: usize) -> Result<String, ContainerError> {
        let tail_arg = lines.to_string();
        self.run_ok(&["logs", "--tail", &tail_arg, container_id]).await
    }

    async fn wait_exit(&self, container_id: &str) -> Result<Option<i32>, ContainerError> {
        let stdout = self.run_ok(&["wait", container_id]).await?;
        Ok(stdout.trim().parse().ok())
    }

    async fn exec_detached(
        &self,
        container_id: &str,
        command: Vec<String>,
    ) -> Result<(), ContainerError> {
        let mut args = vec!["exec".to_string(), "-d".to_string(), container_id.to_string()];
        args.extend(command);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_ok(&arg_refs).await.map(|_| ())
    }
}

/// Looks up the host port bound to a specific container-side port from a
/// `docker inspect --format '{{json .NetworkSettings.Ports}}'` payload.
/// Separated from `inspect_ports` so it can be unit-tested against fixed
/// JSON without a real daemon.
pub fn parse_host_port(ports_json: &str, container_port: u16, proto: &str) -> Option<u16> {
    let raw: std::collections::HashMap<String, Option<Vec<InspectPortBinding>>> =
        serde_json::from_str(ports_json).ok()?;
    let key = format!("{container_port}/{proto}");
    raw.get(&key)?
        .as_ref()?
        .first()?
        .host_port
        .parse()
        .ok()
}

fn render_command(binary: &PathBuf, args: &[&str]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}
