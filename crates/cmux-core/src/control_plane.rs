//! The control-plane contract. The control plane itself — the
//! durable document store backing these operations — is an external
//! collaborator; this crate only defines the shape the rest of the engine
//! depends on, so that `cmuxd` can wire in whatever store implements it.

use async_trait::async_trait;

use crate::diff::DiffFileRecord;
use crate::ids::{RepoId, TaskId, TaskRunId};
use crate::settings::Settings;
use crate::task::{PortTriple, Task, TaskRun, TaskRunStatus};

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("task run not found: {0}")]
    TaskRunNotFound(TaskRunId),
    #[error("control plane request failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRepo {
    pub id: RepoId,
    pub clone_url: String,
    pub default_branch: String,
}

/// Async methods only; semantics, not wire format, are the contract (spec
/// §6). Implementations live outside this crate — a document store, a
/// thin RPC client, or (for tests) an in-memory fake.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn tasks_set_pull_request_title(
        &self,
        task_id: &TaskId,
        title: &str,
    ) -> Result<(), ControlPlaneError>;
    async fn tasks_get(&self, task_id: &TaskId) -> Result<Task, ControlPlaneError>;

    async fn task_runs_get(&self, run_id: &TaskRunId) -> Result<TaskRun, ControlPlaneError>;
    async fn task_runs_update_container_ports(
        &self,
        run_id: &TaskRunId,
        ports: PortTriple,
    ) -> Result<(), ControlPlaneError>;
    async fn task_runs_update_container_status(
        &self,
        run_id: &TaskRunId,
        status: TaskRunStatus,
        stopped_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), ControlPlaneError>;
    async fn task_runs_update_pull_request_url(
        &self,
        run_id: &TaskRunId,
        url: &str,
        is_draft: bool,
    ) -> Result<(), ControlPlaneError>;
    /// TaskRuns whose durable descriptor says provider=this-runtime and
    /// status ∈ {starting, running, warm}.
    async fn task_runs_active_instances(&self) -> Result<Vec<TaskRun>, ControlPlaneError>;
    /// TaskRuns eligible for TTL-based termination.
    async fn task_runs_containers_to_stop(&self) -> Result<Vec<TaskRun>, ControlPlaneError>;
    /// Oldest-idle-first, respecting the review window.
    async fn task_runs_by_cleanup_priority(&self) -> Result<Vec<TaskRun>, ControlPlaneError>;

    async fn diffs_replace_for_task_run(
        &self,
        run_id: &TaskRunId,
        diffs: Vec<DiffFileRecord>,
    ) -> Result<(), ControlPlaneError>;
    async fn diffs_update_timestamp(&self, run_id: &TaskRunId) -> Result<(), ControlPlaneError>;
    async fn diffs_get_by_task_run(
        &self,
        run_id: &TaskRunId,
    ) -> Result<Vec<DiffFileRecord>, ControlPlaneError>;

    async fn settings_get(&self) -> Result<Settings, ControlPlaneError>;

    async fn github_upsert_repo(&self, repo: GithubRepo) -> Result<(), ControlPlaneError>;
    async fn github_get_branches(
        &self,
        repo_id: &RepoId,
    ) -> Result<Vec<Branch>, ControlPlaneError>;
    async fn github_get_all_repos(&self) -> Result<Vec<GithubRepo>, ControlPlaneError>;
}
