//! In-memory `ControlPlane` fake shared across the workspace's test
//! suites (feature-gated so it never ships in a production binary).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::control_plane::{Branch, ControlPlane, ControlPlaneError, GithubRepo};
use crate::diff::DiffFileRecord;
use crate::ids::{RepoId, TaskId, TaskRunId};
use crate::settings::Settings;
use crate::task::{PortTriple, Task, TaskRun, TaskRunStatus};

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    task_runs: HashMap<TaskRunId, TaskRun>,
    diffs: HashMap<TaskRunId, Vec<DiffFileRecord>>,
    repos: HashMap<RepoId, GithubRepo>,
    branches: HashMap<RepoId, Vec<Branch>>,
    settings: Settings,
}

/// A fully in-memory `ControlPlane`, seeded by the test and inspected
/// afterwards via the `*_snapshot` helpers. Not meant to model every real
/// control-plane query (`task_runs_active_instances` etc. simply filter the
/// seeded set in memory) — just enough to exercise the engine end to end.
#[derive(Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            state: Mutex::new(State {
                settings,
                ..State::default()
            }),
        }
    }

    pub fn seed_task(&self, task: Task) {
        self.state.lock().unwrap().tasks.insert(task.id.clone(), task);
    }

    pub fn seed_task_run(&self, run: TaskRun) {
        self.state
            .lock()
            .unwrap()
            .task_runs
            .insert(run.id.clone(), run);
    }

    pub fn task_run_snapshot(&self, id: &TaskRunId) -> Option<TaskRun> {
        self.state.lock().unwrap().task_runs.get(id).cloned()
    }

    pub fn diffs_snapshot(&self, id: &TaskRunId) -> Vec<DiffFileRecord> {
        self.state
            .lock()
            .unwrap()
            .diffs
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_task_runs(&self) -> Vec<TaskRun> {
        self.state.lock().unwrap().task_runs.values().cloned().collect()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn tasks_set_pull_request_title(
        &self,
        task_id: &TaskId,
        title: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ControlPlaneError::TaskNotFound(task_id.clone()))?;
        task.pull_request_title = Some(title.to_string());
        Ok(())
    }

    async fn tasks_get(&self, task_id: &TaskId) -> Result<Task, ControlPlaneError> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::TaskNotFound(task_id.clone()))
    }

    async fn task_runs_get(&self, run_id: &TaskRunId) -> Result<TaskRun, ControlPlaneError> {
        self.state
            .lock()
            .unwrap()
            .task_runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::TaskRunNotFound(run_id.clone()))
    }

    async fn task_runs_update_container_ports(
        &self,
        run_id: &TaskRunId,
        ports: PortTriple,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        let run = state
            .task_runs
            .get_mut(run_id)
            .ok_or_else(|| ControlPlaneError::TaskRunNotFound(run_id.clone()))?;
        run.container.ports = ports;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn task_runs_update_container_status(
        &self,
        run_id: &TaskRunId,
        status: TaskRunStatus,
        stopped_at: Option<DateTime<Utc>>,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        let run = state
            .task_runs
            .get_mut(run_id)
            .ok_or_else(|| ControlPlaneError::TaskRunNotFound(run_id.clone()))?;
        run.status = status;
        if status == TaskRunStatus::Stopped {
            run.container.status = crate::task::ContainerStatus::Stopped;
        }
        if let Some(stopped_at) = stopped_at {
            run.updated_at = stopped_at;
        }
        Ok(())
    }

    async fn task_runs_update_pull_request_url(
        &self,
        run_id: &TaskRunId,
        url: &str,
        is_draft: bool,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        let run = state
            .task_runs
            .get_mut(run_id)
            .ok_or_else(|| ControlPlaneError::TaskRunNotFound(run_id.clone()))?;
        run.pull_request_url = Some(url.to_string());
        run.pull_request_is_draft = is_draft;
        Ok(())
    }

    async fn task_runs_active_instances(&self) -> Result<Vec<TaskRun>, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .task_runs
            .values()
            .filter(|run| run.container.status.is_live())
            .cloned()
            .collect())
    }

    async fn task_runs_containers_to_stop(&self) -> Result<Vec<TaskRun>, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        let now = Utc::now();
        Ok(state
            .task_runs
            .values()
            .filter(|run| {
                run.container
                    .warm_expires_at
                    .map(|expires| expires <= now)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn task_runs_by_cleanup_priority(&self) -> Result<Vec<TaskRun>, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        let mut running: Vec<TaskRun> = state
            .task_runs
            .values()
            .filter(|run| run.container.status == crate::task::ContainerStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(|run| run.container.last_activity_at);
        Ok(running)
    }

    async fn diffs_replace_for_task_run(
        &self,
        run_id: &TaskRunId,
        diffs: Vec<DiffFileRecord>,
    ) -> Result<(), ControlPlaneError> {
        self.state.lock().unwrap().diffs.insert(run_id.clone(), diffs);
        Ok(())
    }

    async fn diffs_update_timestamp(&self, _run_id: &TaskRunId) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn diffs_get_by_task_run(
        &self,
        run_id: &TaskRunId,
    ) -> Result<Vec<DiffFileRecord>, ControlPlaneError> {
        Ok(self.diffs_snapshot(run_id))
    }

    async fn settings_get(&self) -> Result<Settings, ControlPlaneError> {
        Ok(self.state.lock().unwrap().settings.clone())
    }

    async fn github_upsert_repo(&self, repo: GithubRepo) -> Result<(), ControlPlaneError> {
        self.state.lock().unwrap().repos.insert(repo.id.clone(), repo);
        Ok(())
    }

    async fn github_get_branches(&self, repo_id: &RepoId) -> Result<Vec<Branch>, ControlPlaneError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .branches
            .get(repo_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn github_get_all_repos(&self) -> Result<Vec<GithubRepo>, ControlPlaneError> {
        Ok(self.state.lock().unwrap().repos.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ContainerDescriptor, PullRequestState};
    use std::path::PathBuf;

    fn mk_run(id: &str) -> TaskRun {
        let now = Utc::now();
        TaskRun {
            id: TaskRunId::new(id),
            task_id: TaskId::new("task-1"),
            agent_name: "claude".to_string(),
            worktree_path: PathBuf::from("/tmp/wt"),
            head_branch: "cmux-1".to_string(),
            base_branch: "main".to_string(),
            status: TaskRunStatus::Running,
            crowned: false,
            pull_request_url: None,
            pull_request_state: PullRequestState::None,
            pull_request_is_draft: false,
            container: ContainerDescriptor::new("cmux-abc", now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn update_container_ports_persists_onto_the_seeded_run() {
        let cp = InMemoryControlPlane::new();
        let run_id = TaskRunId::new("run-1");
        cp.seed_task_run(mk_run("run-1"));

        cp.task_runs_update_container_ports(
            &run_id,
            PortTriple {
                ide: Some(1),
                worker: Some(2),
                extension: Some(3),
            },
        )
        .await
        .expect("update ports");

        let run = cp.task_run_snapshot(&run_id).expect("run present");
        assert_eq!(run.container.ports.worker, Some(2));
    }

    #[tokio::test]
    async fn update_on_missing_run_returns_not_found() {
        let cp = InMemoryControlPlane::new();
        let err = cp
            .task_runs_update_container_status(
                &TaskRunId::new("missing"),
                TaskRunStatus::Stopped,
                None,
            )
            .await
            .expect_err("missing run should error");
        assert!(matches!(err, ControlPlaneError::TaskRunNotFound(_)));
    }

    #[tokio::test]
    async fn diffs_replace_then_get_round_trips() {
        let cp = InMemoryControlPlane::new();
        let run_id = TaskRunId::new("run-1");
        let record = DiffFileRecord {
            path: "a.rs".to_string(),
            old_path: None,
            status: crate::diff::FileChangeStatus::Modified,
            additions: 1,
            deletions: 0,
            binary: false,
            patch: None,
            old_content: None,
            new_content: None,
            content_omitted: false,
        };
        cp.diffs_replace_for_task_run(&run_id, vec![record.clone()])
            .await
            .expect("replace diffs");
        let fetched = cp.diffs_get_by_task_run(&run_id).await.expect("get diffs");
        assert_eq!(fetched, vec![record]);
    }
}
