//! Engine construction: wires the Repository
//! Manager, Workspace Planner, Container Registry, a CLI-driven Docker
//! runtime, and the State Reconciler into one process, and exposes the
//! per-run operations `cmuxd`'s CLI entry points drive.
//!
//! The control-plane document store is an external collaborator; absent
//! a real one to wire in, `cmuxd` runs against the in-memory
//! fake `cmux_core` ships for tests, seeding it directly from the CLI.
//! Swapping in a real store means replacing `InMemoryControlPlane` here
//! with whatever implements `ControlPlane`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use cmux_container::{
    ContainerInstance, ContainerInstanceConfig, ContainerPortSpec, DockerCliRuntime, DockerRuntime,
    HttpWorkerClient, InstanceInfo, SshKeyMaterial, WorkerClient,
};
use cmux_core::testing::InMemoryControlPlane;
use cmux_core::{
    ContainerDescriptor, ControlPlane, PullRequestState, RepoId, StagedError, Task, TaskId, TaskRun,
    TaskRunId, TaskRunStatus, TimestampedEvent,
};
use cmux_diff::{parse_diff, DiffCapture, DiffStoreAdapter};
use cmux_git::{discover_repo, GitCli, GitError, RepositoryManager};
use cmux_pr::{GhCli, PrDriver};
use cmux_reconciler::{Reconciler, ReconcilerConfig};
use cmux_registry::ContainerRegistry;
use cmux_workspace::{disambiguate, NoopBranchNamer, PlannerInput, WorktreeInfo, WorkspacePlanner};
use tokio::sync::mpsc;

use crate::config::CmuxdConfig;

/// Branch naming collisions are resolved by appending a short disambiguator
/// and retrying; this bounds how many times we'll do that before giving up.
const MAX_BRANCH_DISAMBIGUATION_ATTEMPTS: u32 = 5;

const DEFAULT_CONTAINER_PORTS: ContainerPortSpec = ContainerPortSpec {
    ide: 39378,
    worker: 39377,
    extension: 39379,
};

pub struct Engine {
    pub control_plane: Arc<InMemoryControlPlane>,
    pub registry: Arc<ContainerRegistry>,
    pub docker: Arc<dyn DockerRuntime>,
    pub repos: Arc<RepositoryManager>,
    pub reconciler: Arc<Reconciler>,
    planner: WorkspacePlanner<NoopBranchNamer>,
    pr_driver: PrDriver,
    config: CmuxdConfig,
    ssh_dir: PathBuf,
}

impl Engine {
    /// Builds the engine and returns the event receiver alongside it —
    /// `cmuxd`'s main loop drains it into structured log lines.
    pub fn new(config: CmuxdConfig, home: PathBuf) -> (Self, mpsc::UnboundedReceiver<TimestampedEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let docker: Arc<dyn DockerRuntime> = Arc::new(DockerCliRuntime::new(config.docker_binary.clone()));
        let registry = Arc::new(ContainerRegistry::new());
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let repos = Arc::new(RepositoryManager::new(GitCli::new(config.git_binary.clone())));
        let ssh_dir = home.join(".ssh");
        let planner = WorkspacePlanner::new(NoopBranchNamer, home);
        let pr_driver = PrDriver::new(
            GitCli::new(config.git_binary.clone()),
            GhCli::new(config.gh_binary.clone()),
        );

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&docker),
            Arc::clone(&registry),
            Arc::clone(&control_plane) as Arc<dyn ControlPlane>,
            Some(events_tx),
            ReconcilerConfig {
                poll_interval: config.poll_interval(),
                container_ports: DEFAULT_CONTAINER_PORTS,
                auto_cleanup_enabled: true,
            },
        ));

        (
            Self {
                control_plane,
                registry,
                docker,
                repos,
                reconciler,
                planner,
                pr_driver,
                config,
                ssh_dir,
            },
            events_rx,
        )
    }

    pub fn control_plane(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.control_plane) as Arc<dyn ControlPlane>
    }

    /// Registers a new `Task` document directly in the control plane (spec
    /// §3: tasks are "created once per submission" by an external caller;
    /// standing in for that caller here since no real store is wired in).
    pub fn seed_task(&self, repo_id: impl Into<String>, description: impl Into<String>) -> TaskId {
        let now = Utc::now();
        let task_id = TaskId::new(format!("task-{}", now.timestamp_millis()));
        self.control_plane.seed_task(Task {
            id: task_id.clone(),
            repo_id: RepoId(repo_id.into()),
            description: description.into(),
            pull_request_title: None,
            base_branch: None,
            worktree_path: None,
            created_at: now,
            updated_at: now,
        });
        task_id
    }

    /// Reads an operator's SSH identity off disk (first of `id_ed25519` /
    /// `id_rsa` found, plus its `.pub` and `known_hosts`) so the worker can
    /// push over SSH. Returns `None` if no private key is present — pushing
    /// then falls back to whatever `github_token` `configure_git` carries.
    async fn load_ssh_key_material(&self) -> Option<SshKeyMaterial> {
        let mut private_key_path = None;
        for name in ["id_ed25519", "id_rsa"] {
            let candidate = self.ssh_dir.join(name);
            if tokio::fs::metadata(&candidate).await.is_ok() {
                private_key_path = Some(candidate);
                break;
            }
        }
        let private_key_path = private_key_path?;
        let private_key_pem = tokio::fs::read(&private_key_path).await.ok()?;
        let public_key = tokio::fs::read_to_string(format!("{}.pub", private_key_path.display()))
            .await
            .unwrap_or_default();
        let known_hosts = tokio::fs::read_to_string(self.ssh_dir.join("known_hosts"))
            .await
            .unwrap_or_default();
        Some(SshKeyMaterial::from_raw(&private_key_pem, public_key, known_hosts))
    }

    /// Plans the workspace, materializes the origin clone and worktree,
    /// registers the `TaskRun`, and starts its container.
    pub async fn provision_task_run(
        &self,
        task_id: TaskId,
        agent_name: String,
        repo_url: String,
        branch_hint: Option<String>,
        task_description: Option<String>,
    ) -> Result<InstanceInfo, StagedError> {
        let settings = self
            .control_plane
            .settings_get()
            .await
            .map_err(|err| StagedError::upstream("Read settings", err.to_string()))?;

        let mut plan = self
            .planner
            .plan(
                PlannerInput {
                    repo_url: repo_url.clone(),
                    branch_hint,
                    task_description,
                    user_prefix: None,
                },
                &settings,
            )
            .await?;

        self.repos
            .ensure_repository(&repo_url, &plan.origin_path, None)
            .await
            .map_err(|err| StagedError::upstream("Ensure repository", err.to_string()))?;
        let base_branch = self
            .repos
            .default_branch(&plan.origin_path)
            .await
            .map_err(|err| StagedError::upstream("Resolve default branch", err.to_string()))?;

        // Branch naming collisions (same slug picked for a concurrent run)
        // are resolved by appending a short disambiguator and retrying
        // against a recomputed worktree path, rather than failing the
        // provision outright.
        let base_branch_name = plan.branch_name.clone();
        let base_folder_name = plan.folder_name.clone();
        let mut attempt = 0u32;
        loop {
            match self
                .repos
                .create_worktree(&plan.origin_path, &plan.worktree_path, &plan.branch_name, &base_branch)
                .await
            {
                Ok(()) => break,
                Err(GitError::AlreadyExists { .. }) if attempt < MAX_BRANCH_DISAMBIGUATION_ATTEMPTS => {
                    attempt += 1;
                    let branch_name = disambiguate(&base_branch_name, attempt);
                    let folder_name = disambiguate(&base_folder_name, attempt);
                    tracing::warn!(
                        attempt,
                        branch_name = %branch_name,
                        "provision_task_run: branch/worktree name collision, retrying with disambiguator"
                    );
                    plan = WorktreeInfo::new(
                        plan.projects_root.clone(),
                        plan.repo_name.clone(),
                        branch_name,
                        folder_name,
                    );
                }
                Err(err) => return Err(StagedError::upstream("Create worktree", err.to_string())),
            }
        }

        let now = Utc::now();
        let run_id = TaskRunId::new(format!("run-{}", now.timestamp_millis()));
        let run = TaskRun {
            id: run_id.clone(),
            task_id,
            agent_name,
            worktree_path: plan.worktree_path.clone(),
            head_branch: plan.branch_name.clone(),
            base_branch,
            status: TaskRunStatus::Pending,
            crowned: false,
            pull_request_url: None,
            pull_request_state: PullRequestState::None,
            pull_request_is_draft: false,
            container: ContainerDescriptor::new(run_id.container_name(), now),
            created_at: now,
            updated_at: now,
        };
        self.control_plane.seed_task_run(run.clone());

        let ssh_keys = self.load_ssh_key_material().await;
        let instance = Arc::new(ContainerInstance::new(
            run_id,
            plan.worktree_path,
            plan.origin_path,
            ContainerInstanceConfig {
                image: self.config.worker_image.clone(),
                idle_timeout_ms: settings.idle_timeout_ms,
                warm_retention_ms: settings.warm_retention_ms,
                ssh_dir: Some(self.ssh_dir.clone()),
                ssh_keys,
                ..ContainerInstanceConfig::default()
            },
            Arc::clone(&self.docker),
            Arc::new(HttpWorkerClient::new()) as Arc<dyn WorkerClient>,
            Arc::clone(&self.registry),
            self.control_plane(),
            None,
        ));
        instance.start().await
    }

    /// Stops a run's container, clears its registry entry, and marks it
    /// stopped in the control plane — the manual-trigger counterpart to
    /// Capacity & Retention's automatic eviction.
    pub async fn stop_task_run(&self, run_id: &TaskRunId) -> Result<(), StagedError> {
        let container_name = run_id.container_name();
        self.docker
            .stop_container(&container_name)
            .await
            .map_err(|err| StagedError::upstream("Stop container", err.to_string()))?;
        self.registry.remove(&container_name).await;
        self.control_plane
            .task_runs_update_container_status(run_id, TaskRunStatus::Stopped, Some(Utc::now()))
            .await
            .map_err(|err| StagedError::upstream("Mark run stopped", err.to_string()))?;
        Ok(())
    }

    /// Runs Diff Capture + Diff Store Adapter against a run's worker, then
    /// — when `open_pull_request` is set — drives the PR/Commit Driver to
    /// push the branch and open a draft PR.
    pub async fn complete_task_run(
        &self,
        run_id: &TaskRunId,
        open_pull_request: bool,
    ) -> Result<Option<String>, StagedError> {
        let run = self
            .control_plane
            .task_runs_get(run_id)
            .await
            .map_err(|err| StagedError::upstream("Load task run", err.to_string()))?;

        let worker_port = run.container.ports.worker.ok_or_else(|| {
            StagedError::precondition_failed("Capture diff", "container has no worker port assigned")
        })?;
        let worker = HttpWorkerClient::new();
        let capture = DiffCapture::new(
            &worker,
            format!("http://localhost:{worker_port}"),
            run.worktree_path.display().to_string(),
            run.id.0.clone(),
        );
        let parsed = parse_diff(&capture.capture().await);
        let store = DiffStoreAdapter::new(GitCli::new(self.config.git_binary.clone()));
        let records = store.materialize(&parsed, &run.worktree_path);
        self.control_plane
            .diffs_replace_for_task_run(run_id, records.clone())
            .await
            .map_err(|err| StagedError::upstream("Store diffs", err.to_string()))?;

        if !open_pull_request {
            return Ok(None);
        }

        let task = self
            .control_plane
            .tasks_get(&run.task_id)
            .await
            .map_err(|err| StagedError::upstream("Load task", err.to_string()))?;
        let fallback_title = task
            .pull_request_title
            .clone()
            .unwrap_or_else(|| task.description.clone());
        let commit_message = cmux_pr::generate_commit_message(&records, &fallback_title, &run.id.0);

        let repo = discover_repo(&run.worktree_path, &GitCli::new(self.config.git_binary.clone()))
            .map_err(|err| StagedError::upstream("Discover worktree repo", err.to_string()))?;
        self.pr_driver.ensure_branch_checked_out(&repo, &run.head_branch)?;
        self.pr_driver.commit_all(&repo, &commit_message)?;
        self.pr_driver.push_with_rebase_retry(&repo, &run.head_branch)?;
        let url = self.pr_driver.open_draft_pr(
            &repo.root,
            &fallback_title,
            "Opened by cmuxd",
            &run.head_branch,
            &run.base_branch,
        )?;
        self.control_plane
            .task_runs_update_pull_request_url(run_id, &url, true)
            .await
            .map_err(|err| StagedError::upstream("Record pull request url", err.to_string()))?;
        Ok(Some(url))
    }
}
