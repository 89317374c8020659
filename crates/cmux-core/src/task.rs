//! Durable task/run data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ids::{RepoId, TaskId, TaskRunId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub repo_id: RepoId,
    pub description: String,
    #[serde(default)]
    pub pull_request_title: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl TaskRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskRunStatus::Stopped | TaskRunStatus::Failed)
    }
}

impl std::fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            TaskRunStatus::Pending => "pending",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Stopped => "stopped",
            TaskRunStatus::Failed => "failed",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Warm,
    Terminated,
}

impl ContainerStatus {
    /// States the Reconciler (§4.5) treats as "live" for a TaskRun.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ContainerStatus::Starting | ContainerStatus::Running | ContainerStatus::Warm
        )
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Warm => "warm",
            ContainerStatus::Terminated => "terminated",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerProvider {
    Docker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    None,
    Draft,
    Open,
    Merged,
}

impl Default for PullRequestState {
    fn default() -> Self {
        PullRequestState::None
    }
}

/// Host port triple exposed by a running container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTriple {
    pub ide: Option<u16>,
    pub worker: Option<u16>,
    pub extension: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub provider: ContainerProvider,
    pub status: ContainerStatus,
    pub container_name: String,
    #[serde(default)]
    pub ports: PortTriple,
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub warm_expires_at: Option<DateTime<Utc>>,
}

impl ContainerDescriptor {
    pub fn new(container_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            provider: ContainerProvider::Docker,
            status: ContainerStatus::Starting,
            container_name: container_name.into(),
            ports: PortTriple::default(),
            volumes: BTreeMap::new(),
            last_activity_at: now,
            warm_expires_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub task_id: TaskId,
    pub agent_name: String,
    pub worktree_path: PathBuf,
    pub head_branch: String,
    pub base_branch: String,
    pub status: TaskRunStatus,
    #[serde(default)]
    pub crowned: bool,
    #[serde(default)]
    pub pull_request_url: Option<String>,
    #[serde(default)]
    pub pull_request_state: PullRequestState,
    #[serde(default)]
    pub pull_request_is_draft: bool,
    pub container: ContainerDescriptor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRun {
    /// A TaskRun is terminal once it is stopped and its container has fully
    /// torn down.
    pub fn is_terminal(&self) -> bool {
        self.status == TaskRunStatus::Stopped
            && self.container.status == ContainerStatus::Terminated
    }
}
