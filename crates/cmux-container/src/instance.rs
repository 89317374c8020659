//! Container Instance: owns the entire lifecycle of one
//! agent's container and brokers all traffic to its in-container worker.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cmux_core::{
    ContainerStatus, ControlPlane, EngineEvent, PortTriple, StagedError, TaskRunId,
    TimestampedEvent,
};
use cmux_registry::{ContainerMapping, ContainerRegistry};
use tokio::sync::{mpsc, Mutex};

use crate::config_filter::filter_git_config;
use crate::devcontainer::{bootstrap_devcontainer, has_devcontainer};
use crate::docker::{BindMount, ContainerSpec, DockerRuntime, ExposedPorts};
use crate::ports::PortCache;
use crate::worker::{poll_until_alive, ConfigureGitRequest, SshKeyMaterial, WorkerClient};

const STAGE_START: &str = "Start container";
const WORKER_LIVENESS_ATTEMPTS: u32 = 30;
const WORKER_LIVENESS_INTERVAL: Duration = Duration::from_millis(500);
const QUICK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_LOG_TAIL_LINES: usize = 300;

/// Container-side ports the worker image listens on. Fixed per image
/// build, unlike the host-side ports docker assigns dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerPortSpec {
    pub ide: u16,
    pub worker: u16,
    pub extension: u16,
}

impl From<ContainerPortSpec> for ExposedPorts {
    fn from(spec: ContainerPortSpec) -> Self {
        ExposedPorts {
            ide: spec.ide,
            worker: spec.worker,
            extension: spec.extension,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInstanceConfig {
    pub image: String,
    pub container_ports: ContainerPortSpec,
    pub privileged: bool,
    pub theme: String,
    pub idle_timeout_ms: u64,
    pub warm_retention_ms: u64,
    pub ssh_dir: Option<PathBuf>,
    pub code_host_cli_config_dir: Option<PathBuf>,
    pub user_gitconfig: Option<PathBuf>,
    pub git_configs_tmp_dir: PathBuf,
    pub code_host_token: Option<String>,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
    pub ssh_keys: Option<SshKeyMaterial>,
}

impl Default for ContainerInstanceConfig {
    fn default() -> Self {
        Self {
            image: "cmux-worker:latest".to_string(),
            container_ports: ContainerPortSpec {
                ide: 39378,
                worker: 39377,
                extension: 39379,
            },
            privileged: true,
            theme: "dark".to_string(),
            idle_timeout_ms: 10 * 60 * 1000,
            warm_retention_ms: 30 * 60 * 1000,
            ssh_dir: None,
            code_host_cli_config_dir: None,
            user_gitconfig: None,
            git_configs_tmp_dir: std::env::temp_dir().join("cmux-git-configs"),
            code_host_token: None,
            git_user_name: None,
            git_user_email: None,
            ssh_keys: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub base_url: String,
    pub workspace_url: String,
    pub instance_id: String,
    pub task_run_id: TaskRunId,
    pub provider: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatusSnapshot {
    pub running: bool,
    pub info: Option<InstanceInfo>,
}

struct StartedState {
    container_id: String,
    temp_config_path: Option<PathBuf>,
    injected_credential_path: Option<PathBuf>,
}

pub struct ContainerInstance {
    task_run_id: TaskRunId,
    worktree_path: PathBuf,
    origin_path: PathBuf,
    config: ContainerInstanceConfig,
    docker: Arc<dyn DockerRuntime>,
    worker: Arc<dyn WorkerClient>,
    registry: Arc<ContainerRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    events: Option<mpsc::UnboundedSender<TimestampedEvent>>,
    port_cache: Mutex<PortCache>,
    started: Mutex<Option<StartedState>>,
    worker_connected: AtomicBool,
}

impl ContainerInstance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_run_id: TaskRunId,
        worktree_path: PathBuf,
        origin_path: PathBuf,
        config: ContainerInstanceConfig,
        docker: Arc<dyn DockerRuntime>,
        worker: Arc<dyn WorkerClient>,
        registry: Arc<ContainerRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        events: Option<mpsc::UnboundedSender<TimestampedEvent>>,
    ) -> Self {
        Self {
            task_run_id,
            worktree_path,
            origin_path,
            config,
            docker,
            worker,
            registry,
            control_plane,
            events,
            port_cache: Mutex::new(PortCache::new()),
            started: Mutex::new(None),
            worker_connected: AtomicBool::new(false),
        }
    }

    fn container_name(&self) -> String {
        self.task_run_id.container_name()
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(TimestampedEvent::now(event));
        }
    }

    pub fn is_worker_connected(&self) -> bool {
        self.worker_connected.load(Ordering::SeqCst)
    }

    /// Reads the cached port triple, refreshing it from docker on a cache
    /// miss rather than reporting no port at all once the 2-second
    /// `PortCache` TTL lapses on an otherwise-healthy container. Returns
    /// `None` only once the container itself is no longer running (and
    /// invalidates the cache so the next call doesn't retry a dead
    /// container's inspect).
    pub async fn actual_port(&self, role: PortRole) -> Option<u16> {
        if let Some(ports) = self.port_cache.lock().await.get() {
            return select_port(ports, role);
        }

        let container_id = self.started.lock().await.as_ref()?.container_id.clone();
        match self.docker.is_running(&container_id).await {
            Ok(true) => {}
            _ => {
                self.port_cache.lock().await.invalidate();
                return None;
            }
        }

        let ports = self
            .docker
            .inspect_ports(&container_id, self.config.container_ports.into())
            .await
            .ok()?;
        self.port_cache.lock().await.set(ports);
        select_port(ports, role)
    }

    pub async fn status(&self) -> Result<InstanceStatusSnapshot, StagedError> {
        let name = self.container_name();
        let Some(mapping) = self.registry.snapshot(&name).await else {
            return Ok(InstanceStatusSnapshot {
                running: false,
                info: None,
            });
        };
        let running = mapping.session_status == ContainerStatus::Running;
        let info = mapping.ports.worker.map(|worker_port| InstanceInfo {
            base_url: format!("http://localhost:{worker_port}"),
            workspace_url: mapping
                .ports
                .ide
                .map(|ide_port| format!("http://localhost:{ide_port}/?folder=/root/workspace"))
                .unwrap_or_default(),
            instance_id: mapping.instance_id.clone(),
            task_run_id: self.task_run_id.clone(),
            provider: "docker",
        });
        Ok(InstanceStatusSnapshot { running, info })
    }

    pub async fn logs(&self, tail: usize) -> Result<String, StagedError> {
        let started = self.started.lock().await;
        let Some(state) = started.as_ref() else {
            return Ok(String::new());
        };
        self.docker
            .logs_tail(&state.container_id, tail)
            .await
            .map_err(|err| StagedError::upstream("Read container logs", err.to_string()))
    }

    pub async fn start(self: &Arc<Self>) -> Result<InstanceInfo, StagedError> {
        let name = self.container_name();
        self.emit(EngineEvent::ContainerStarting {
            run_id: self.task_run_id.clone(),
        });

        if !self
            .docker
            .image_exists(&self.config.image)
            .await
            .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?
        {
            self.docker
                .pull_image(&self.config.image)
                .await
                .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;
        }

        let workspace_volume = self.task_run_id.workspace_volume_name();
        let ide_volume = self.task_run_id.ide_volume_name();
        let workspace_existed = self
            .docker
            .volume_ensure(&workspace_volume)
            .await
            .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;
        let ide_existed = self
            .docker
            .volume_ensure(&ide_volume)
            .await
            .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;
        let is_resume = workspace_existed && ide_existed;

        self.docker
            .remove_stale_container(&name)
            .await
            .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;

        let (temp_config_path, binds) = self.prepare_binds().await?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            privileged: self.config.privileged,
            env: self.build_env(is_resume),
            binds,
            ports: self.config.container_ports.into(),
        };

        let create_result = self.docker.create_container(&spec).await;
        let container_id = match create_result {
            Ok(id) => id,
            Err(err) => {
                self.cleanup_temp_files(&temp_config_path, &None).await;
                return Err(StagedError::fatal(STAGE_START, err.to_string()));
            }
        };

        if let Err(err) = self.docker.start_container(&container_id).await {
            self.cleanup_temp_files(&temp_config_path, &None).await;
            return Err(StagedError::fatal(STAGE_START, err.to_string()));
        }

        let ports = self
            .docker
            .inspect_ports(&container_id, self.config.container_ports.into())
            .await
            .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;
        self.port_cache.lock().await.set(ports);

        self.control_plane
            .task_runs_update_container_ports(&self.task_run_id, ports)
            .await
            .map_err(|err| StagedError::upstream(STAGE_START, err.to_string()))?;
        self.control_plane
            .task_runs_update_container_status(&self.task_run_id, cmux_core::TaskRunStatus::Running, None)
            .await
            .map_err(|err| StagedError::upstream(STAGE_START, err.to_string()))?;
        self.emit(EngineEvent::ContainerPortsAssigned {
            run_id: self.task_run_id.clone(),
            ide: ports.ide,
            worker: ports.worker,
            extension: ports.extension,
        });

        let now = Utc::now();
        let mut mapping = ContainerMapping::new(
            name.clone(),
            self.task_run_id.clone(),
            container_id.clone(),
            now,
            self.config.idle_timeout_ms,
            self.config.warm_retention_ms,
        );
        mapping.ports = ports;
        mapping.session_status = ContainerStatus::Running;
        mapping.volumes.insert("workspace".to_string(), workspace_volume);
        mapping.volumes.insert("ide".to_string(), ide_volume);
        self.registry.insert(mapping).await;

        let worker_base_url = self
            .actual_port(PortRole::Worker)
            .await
            .map(|port| format!("http://localhost:{port}"));
        let mut worker_alive = false;
        if let Some(base_url) = &worker_base_url {
            worker_alive = poll_until_alive(
                self.worker.as_ref(),
                base_url,
                WORKER_LIVENESS_ATTEMPTS,
                WORKER_LIVENESS_INTERVAL,
                QUICK_PROBE_TIMEOUT,
            )
            .await;
        }

        if worker_alive {
            self.worker_connected.store(true, Ordering::SeqCst);
            self.emit(EngineEvent::WorkerConnected {
                run_id: self.task_run_id.clone(),
            });
            if let Some(base_url) = &worker_base_url {
                let configure = ConfigureGitRequest {
                    github_token: self.config.code_host_token.clone(),
                    git_user_name: self.config.git_user_name.clone(),
                    git_user_email: self.config.git_user_email.clone(),
                    ssh_keys: self.config.ssh_keys.clone(),
                };
                if let Err(err) = self
                    .worker
                    .configure_git(base_url, configure, Duration::from_secs(10))
                    .await
                {
                    tracing::warn!(run_id = %self.task_run_id, error = %err, "configure-git RPC failed");
                }
            }
        } else {
            tracing::warn!(run_id = %self.task_run_id, "worker liveness timed out; continuing without a confirmed connection");
            self.emit(EngineEvent::WorkerDisconnected {
                run_id: self.task_run_id.clone(),
            });
        }

        if has_devcontainer(&self.worktree_path) {
            let docker = Arc::clone(&self.docker);
            let container_id_for_bootstrap = container_id.clone();
            tokio::spawn(async move {
                if let Err(err) = bootstrap_devcontainer(docker.as_ref(), &container_id_for_bootstrap).await {
                    tracing::warn!(error = %err, "devcontainer bootstrap failed to launch");
                }
            });
        }

        *self.started.lock().await = Some(StartedState {
            container_id: container_id.clone(),
            temp_config_path,
            injected_credential_path: None,
        });

        self.spawn_exit_monitor(container_id.clone());

        let base_url = worker_base_url.unwrap_or_default();
        let workspace_url = self
            .actual_port(PortRole::Ide)
            .await
            .map(|port| format!("http://localhost:{port}/?folder=/root/workspace"))
            .unwrap_or_default();

        Ok(InstanceInfo {
            base_url,
            workspace_url,
            instance_id: container_id,
            task_run_id: self.task_run_id.clone(),
            provider: "docker",
        })
    }

    fn spawn_exit_monitor(self: &Arc<Self>, container_id: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let exit_code = this.docker.wait_exit(&container_id).await.unwrap_or(None);
            let _ = this.docker.logs_tail(&container_id, EXIT_LOG_TAIL_LINES).await;

            let name = this.container_name();
            let claim = this.registry.claim(&name).await;
            {
                let mut guard = claim.lock().await;
                if let Some(mapping) = guard.as_mut() {
                    mapping.session_status = ContainerStatus::Stopped;
                }
            }
            this.port_cache.lock().await.invalidate();

            let _ = this
                .control_plane
                .task_runs_update_container_status(
                    &this.task_run_id,
                    cmux_core::TaskRunStatus::Stopped,
                    Some(Utc::now()),
                )
                .await;

            this.worker_connected.store(false, Ordering::SeqCst);
            this.emit(EngineEvent::ContainerExited {
                run_id: this.task_run_id.clone(),
                exit_code,
            });
        });
    }

    /// Stop semantics: graceful stop tolerates "already
    /// stopped"; `preserve_volumes=false` also removes both named volumes.
    /// Temp files are always cleaned up.
    pub async fn stop(&self, preserve_volumes: bool) -> Result<(), StagedError> {
        let stage = "Stop container";
        let mut started = self.started.lock().await;
        let Some(state) = started.take() else {
            return Ok(());
        };

        self.docker
            .stop_container(&state.container_id)
            .await
            .map_err(|err| StagedError::upstream(stage, err.to_string()))?;

        let name = self.container_name();
        if !preserve_volumes {
            let workspace_volume = self.task_run_id.workspace_volume_name();
            let ide_volume = self.task_run_id.ide_volume_name();
            self.docker
                .volume_remove(&workspace_volume)
                .await
                .map_err(|err| StagedError::upstream(stage, err.to_string()))?;
            self.docker
                .volume_remove(&ide_volume)
                .await
                .map_err(|err| StagedError::upstream(stage, err.to_string()))?;
            self.registry.remove(&name).await;
        } else if let Some(claim_mapping) = self.registry.snapshot(&name).await {
            let claim = self.registry.claim(&name).await;
            let mut guard = claim.lock().await;
            if let Some(mapping) = guard.as_mut() {
                mapping.session_status = ContainerStatus::Warm;
                mapping.warm_expires_at =
                    Some(Utc::now() + chrono::Duration::milliseconds(claim_mapping.warm_retention_ms as i64));
            }
        }

        self.cleanup_temp_files(&state.temp_config_path, &state.injected_credential_path)
            .await;
        self.worker_connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup_temp_files(&self, config_path: &Option<PathBuf>, credential_path: &Option<PathBuf>) {
        if let Some(path) = config_path {
            let _ = tokio::fs::remove_file(path).await;
        }
        if let Some(path) = credential_path {
            let _ = tokio::fs::remove_file(path).await;
        }
    }

    fn build_env(&self, is_resume: bool) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        env.insert("PORT".to_string(), self.config.container_ports.worker.to_string());
        env.insert("CMUX_THEME".to_string(), self.config.theme.clone());
        env.insert("CMUX_RESUME".to_string(), is_resume.to_string());
        if let Some(token) = &self.config.code_host_token {
            env.insert("CMUX_CODE_HOST_TOKEN".to_string(), token.clone());
        }
        env
    }

    async fn prepare_binds(&self) -> Result<(Option<PathBuf>, Vec<BindMount>), StagedError> {
        let mut binds = vec![
            BindMount::rw(self.worktree_path.clone(), "/root/workspace"),
            BindMount::rw(self.origin_path.clone(), self.origin_path.clone()),
        ];

        if let Some(ssh_dir) = &self.config.ssh_dir {
            if ssh_dir.is_dir() {
                binds.push(BindMount::ro(ssh_dir.clone(), "/root/.ssh"));
            }
        }
        if let Some(cli_dir) = &self.config.code_host_cli_config_dir {
            if cli_dir.is_dir() {
                binds.push(BindMount::ro(cli_dir.clone(), "/root/.config/gh"));
            }
        }

        let temp_config_path = match &self.config.user_gitconfig {
            Some(source_path) => {
                let source = tokio::fs::read_to_string(source_path)
                    .await
                    .unwrap_or_default();
                let filtered = filter_git_config(&source);
                tokio::fs::create_dir_all(&self.config.git_configs_tmp_dir)
                    .await
                    .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;
                let dest = self
                    .config
                    .git_configs_tmp_dir
                    .join(format!("gitconfig-{}", self.task_run_id));
                tokio::fs::write(&dest, filtered)
                    .await
                    .map_err(|err| StagedError::fatal(STAGE_START, err.to_string()))?;
                binds.push(BindMount::ro(dest.clone(), "/root/.gitconfig"));
                Some(dest)
            }
            None => None,
        };

        Ok((temp_config_path, binds))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Ide,
    Worker,
    Extension,
}

fn select_port(ports: PortTriple, role: PortRole) -> Option<u16> {
    match role {
        PortRole::Ide => ports.ide,
        PortRole::Worker => ports.worker,
        PortRole::Extension => ports.extension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::AtomicU32;

    use cmux_core::testing::InMemoryControlPlane;
    use cmux_core::{ContainerDescriptor, PullRequestState, TaskId, TaskRunStatus};

    #[derive(Default)]
    struct FakeDocker {
        containers_created: AtomicU32,
        ports: PortTriple,
        exit_signal: tokio::sync::Notify,
        existing_volumes: Mutex<std::collections::HashSet<String>>,
        last_env: Mutex<Option<BTreeMap<String, String>>>,
        running: std::sync::atomic::AtomicBool,
        inspect_ports_calls: AtomicU32,
    }

    impl FakeDocker {
        fn with_ports(ports: PortTriple) -> Self {
            Self {
                ports,
                running: std::sync::atomic::AtomicBool::new(true),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl DockerRuntime for FakeDocker {
        async fn image_exists(&self, _image: &str) -> Result<bool, ContainerError> {
            Ok(true)
        }

        async fn pull_image(&self, _image: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn volume_ensure(&self, name: &str) -> Result<bool, ContainerError> {
            let mut existing = self.existing_volumes.lock().await;
            let existed = !existing.insert(name.to_string());
            Ok(existed)
        }

        async fn volume_remove(&self, _name: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn remove_stale_container(&self, _name: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
            self.containers_created.fetch_add(1, Ordering::SeqCst);
            *self.last_env.lock().await = Some(spec.env.clone());
            Ok(format!("container-for-{}", spec.name))
        }

        async fn start_container(&self, _container_id: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn inspect_ports(
            &self,
            _container_id: &str,
            _container_ports: ExposedPorts,
        ) -> Result<PortTriple, ContainerError> {
            self.inspect_ports_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.ports)
        }

        async fn is_running(&self, _container_id: &str) -> Result<bool, ContainerError> {
            Ok(self.running.load(Ordering::SeqCst))
        }

        async fn list_containers(&self, _name_prefix: &str) -> Result<Vec<String>, ContainerError> {
            Ok(Vec::new())
        }

        async fn stop_container(&self, _container_id: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn logs_tail(&self, _container_id: &str, _lines: usize) -> Result<String, ContainerError> {
            Ok(String::new())
        }

        async fn wait_exit(&self, _container_id: &str) -> Result<Option<i32>, ContainerError> {
            self.exit_signal.notified().await;
            Ok(Some(0))
        }

        async fn exec_detached(
            &self,
            _container_id: &str,
            _command: Vec<String>,
        ) -> Result<(), ContainerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct AlwaysAliveWorker;

    #[async_trait::async_trait]
    impl WorkerClient for AlwaysAliveWorker {
        async fn is_alive(&self, _base_url: &str, _timeout: Duration) -> bool {
            true
        }

        async fn exec(
            &self,
            _base_url: &str,
            _request: crate::worker::WorkerExecRequest,
            _timeout: Duration,
        ) -> Result<crate::worker::WorkerExecResponse, ContainerError> {
            unimplemented!("not exercised by these tests")
        }

        async fn configure_git(
            &self,
            _base_url: &str,
            _request: ConfigureGitRequest,
            _timeout: Duration,
        ) -> Result<(), ContainerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NeverAliveWorker;

    #[async_trait::async_trait]
    impl WorkerClient for NeverAliveWorker {
        async fn is_alive(&self, _base_url: &str, _timeout: Duration) -> bool {
            false
        }

        async fn exec(
            &self,
            _base_url: &str,
            _request: crate::worker::WorkerExecRequest,
            _timeout: Duration,
        ) -> Result<crate::worker::WorkerExecResponse, ContainerError> {
            unimplemented!("not exercised by these tests")
        }

        async fn configure_git(
            &self,
            _base_url: &str,
            _request: ConfigureGitRequest,
            _timeout: Duration,
        ) -> Result<(), ContainerError> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn task_run_fixture(run_id: &TaskRunId) -> TaskRun {
        let now = Utc::now();
        TaskRun {
            id: run_id.clone(),
            task_id: TaskId::new("task-1"),
            agent_name: "claude".to_string(),
            worktree_path: PathBuf::from("/tmp/wt"),
            head_branch: "cmux-1".to_string(),
            base_branch: "main".to_string(),
            status: TaskRunStatus::Pending,
            crowned: false,
            pull_request_url: None,
            pull_request_state: PullRequestState::None,
            pull_request_is_draft: false,
            container: ContainerDescriptor::new(run_id.container_name(), now),
            created_at: now,
            updated_at: now,
        }
    }

    fn test_config() -> ContainerInstanceConfig {
        ContainerInstanceConfig {
            idle_timeout_ms: 1_000,
            warm_retention_ms: 2_000,
            ..ContainerInstanceConfig::default()
        }
    }

    #[tokio::test]
    async fn start_assigns_ports_and_marks_worker_connected() {
        let run_id = TaskRunId::new("run-start-1");
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.seed_task_run(task_run_fixture(&run_id));

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::with_ports(PortTriple {
            ide: Some(10001),
            worker: Some(10002),
            extension: Some(10003),
        }));
        let worker: Arc<dyn WorkerClient> = Arc::new(AlwaysAliveWorker::default());
        let registry = Arc::new(ContainerRegistry::new());

        let instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            test_config(),
            docker,
            worker,
            registry.clone(),
            control_plane.clone(),
            None,
        ));

        let info = instance.start().await.expect("start succeeds");
        assert_eq!(info.base_url, "http://localhost:10002");
        assert!(instance.is_worker_connected());

        let mapping = registry
            .snapshot(&run_id.container_name())
            .await
            .expect("mapping present after start");
        assert_eq!(mapping.ports.worker, Some(10002));
        assert_eq!(mapping.session_status, ContainerStatus::Running);

        let persisted = control_plane
            .task_run_snapshot(&run_id)
            .expect("task run persisted");
        assert_eq!(persisted.container.ports.worker, Some(10002));
    }

    #[tokio::test]
    async fn start_continues_without_connection_when_worker_never_answers() {
        let run_id = TaskRunId::new("run-start-2");
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.seed_task_run(task_run_fixture(&run_id));

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::with_ports(PortTriple {
            ide: Some(20001),
            worker: Some(20002),
            extension: Some(20003),
        }));
        let worker: Arc<dyn WorkerClient> = Arc::new(NeverAliveWorker);
        let registry = Arc::new(ContainerRegistry::new());

        let mut config = test_config();
        config.image = "cmux-worker:latest".to_string();
        let instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            config,
            docker,
            worker,
            registry,
            control_plane,
            None,
        ));

        let info = instance.start().await.expect("start still succeeds");
        assert_eq!(info.base_url, "http://localhost:20002");
        assert!(!instance.is_worker_connected());
    }

    #[tokio::test]
    async fn actual_port_refreshes_from_docker_once_the_cache_is_invalidated() {
        let run_id = TaskRunId::new("run-actual-port-1");
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.seed_task_run(task_run_fixture(&run_id));

        let fake_docker = Arc::new(FakeDocker::with_ports(PortTriple {
            ide: Some(60001),
            worker: Some(60002),
            extension: Some(60003),
        }));
        let docker: Arc<dyn DockerRuntime> = fake_docker.clone();
        let worker: Arc<dyn WorkerClient> = Arc::new(AlwaysAliveWorker::default());
        let registry = Arc::new(ContainerRegistry::new());

        let instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            test_config(),
            docker,
            worker,
            registry,
            control_plane,
            None,
        ));

        instance.start().await.expect("start succeeds");
        let calls_after_start = fake_docker.inspect_ports_calls.load(Ordering::SeqCst);

        // Simulate the 2-second `PortCache` TTL lapsing on an otherwise
        // still-running container: the cache misses but docker is re-queried
        // rather than the port silently disappearing.
        instance.port_cache.lock().await.invalidate();
        let port = instance.actual_port(PortRole::Worker).await;
        assert_eq!(port, Some(60002));
        assert_eq!(
            fake_docker.inspect_ports_calls.load(Ordering::SeqCst),
            calls_after_start + 1
        );

        // Once the container is actually gone, a cache miss reports no port.
        instance.port_cache.lock().await.invalidate();
        fake_docker.running.store(false, Ordering::SeqCst);
        assert_eq!(instance.actual_port(PortRole::Worker).await, None);
    }

    #[tokio::test]
    async fn stop_preserving_volumes_marks_the_mapping_warm_and_keeps_it_in_the_registry() {
        let run_id = TaskRunId::new("run-stop-1");
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.seed_task_run(task_run_fixture(&run_id));

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::with_ports(PortTriple {
            ide: Some(30001),
            worker: Some(30002),
            extension: Some(30003),
        }));
        let worker: Arc<dyn WorkerClient> = Arc::new(AlwaysAliveWorker::default());
        let registry = Arc::new(ContainerRegistry::new());

        let instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            test_config(),
            docker,
            worker,
            registry.clone(),
            control_plane,
            None,
        ));

        instance.start().await.expect("start succeeds");
        instance.stop(true).await.expect("stop succeeds");

        let mapping = registry
            .snapshot(&run_id.container_name())
            .await
            .expect("mapping still present when volumes are preserved");
        assert_eq!(mapping.session_status, ContainerStatus::Warm);
        assert!(mapping.warm_expires_at.is_some());
        assert!(!instance.is_worker_connected());
    }

    #[tokio::test]
    async fn stop_without_preserving_volumes_removes_the_registry_entry() {
        let run_id = TaskRunId::new("run-stop-2");
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.seed_task_run(task_run_fixture(&run_id));

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::with_ports(PortTriple {
            ide: Some(40001),
            worker: Some(40002),
            extension: Some(40003),
        }));
        let worker: Arc<dyn WorkerClient> = Arc::new(AlwaysAliveWorker::default());
        let registry = Arc::new(ContainerRegistry::new());

        let instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            test_config(),
            docker,
            worker,
            registry.clone(),
            control_plane,
            None,
        ));

        instance.start().await.expect("start succeeds");
        instance.stop(false).await.expect("stop succeeds");

        assert!(registry.snapshot(&run_id.container_name()).await.is_none());
    }

    #[tokio::test]
    async fn warm_resume_attaches_the_same_named_volumes_across_start_stop_start() {
        let run_id = TaskRunId::new("run-warm-1");
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.seed_task_run(task_run_fixture(&run_id));

        let fake_docker = Arc::new(FakeDocker::with_ports(PortTriple {
            ide: Some(50001),
            worker: Some(50002),
            extension: Some(50003),
        }));
        let docker: Arc<dyn DockerRuntime> = fake_docker.clone();
        let worker: Arc<dyn WorkerClient> = Arc::new(AlwaysAliveWorker::default());
        let registry = Arc::new(ContainerRegistry::new());

        let instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            test_config(),
            Arc::clone(&docker),
            Arc::clone(&worker),
            Arc::clone(&registry),
            Arc::clone(&control_plane) as Arc<dyn ControlPlane>,
            None,
        ));

        instance.start().await.expect("first start succeeds");
        let first_mapping = registry
            .snapshot(&run_id.container_name())
            .await
            .expect("mapping present");
        let first_volumes: StdHashMap<String, String> = first_mapping.volumes.clone().into_iter().collect();
        assert_eq!(
            fake_docker.last_env.lock().await.as_ref().unwrap().get("CMUX_RESUME"),
            Some(&"false".to_string())
        );

        instance.stop(true).await.expect("warm stop succeeds");

        let second_instance = Arc::new(ContainerInstance::new(
            run_id.clone(),
            PathBuf::from("/tmp/wt"),
            PathBuf::from("/tmp/origin"),
            test_config(),
            docker,
            worker,
            Arc::clone(&registry),
            control_plane,
            None,
        ));
        second_instance.start().await.expect("second start succeeds");

        let second_mapping = registry
            .snapshot(&run_id.container_name())
            .await
            .expect("mapping present after resume");
        let second_volumes: StdHashMap<String, String> = second_mapping.volumes.clone().into_iter().collect();

        assert_eq!(first_volumes, second_volumes);
        assert_eq!(
            first_volumes.get("workspace"),
            Some(&run_id.workspace_volume_name())
        );
        assert_eq!(
            fake_docker.last_env.lock().await.as_ref().unwrap().get("CMUX_RESUME"),
            Some(&"true".to_string())
        );
    }
}
