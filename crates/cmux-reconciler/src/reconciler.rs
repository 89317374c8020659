//! State Reconciler: a periodic sweep between live containers
//! and the control plane. Each of the four passes is independent — one
//! failing must never abort the others.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cmux_container::{ContainerPortSpec, DockerRuntime};
use cmux_core::{ContainerStatus, ControlPlane, EngineEvent, TaskRunStatus, TimestampedEvent};
use cmux_registry::ContainerRegistry;
use tokio::sync::{mpsc, Notify};

use crate::retention::{enforce_capacity_and_retention, RetentionSummary};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const CONTAINER_NAME_PREFIX: &str = "cmux-";

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    pub container_ports: ContainerPortSpec,
    pub auto_cleanup_enabled: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            container_ports: ContainerPortSpec {
                ide: 39378,
                worker: 39377,
                extension: 39379,
            },
            auto_cleanup_enabled: true,
        }
    }
}

/// Summary of one sweep, returned for tests and logging; not part of the
/// spec's external contract.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub live_containers_seen: usize,
    pub registry_entries_updated: usize,
    pub registry_entries_marked_stopped: usize,
    pub orphans_stopped: usize,
    pub retention: RetentionSummary,
}

pub struct Reconciler {
    docker: Arc<dyn DockerRuntime>,
    registry: Arc<ContainerRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    events: Option<mpsc::UnboundedSender<TimestampedEvent>>,
    config: ReconcilerConfig,
    shutting_down: AtomicBool,
    shutdown: Notify,
}

impl Reconciler {
    pub fn new(
        docker: Arc<dyn DockerRuntime>,
        registry: Arc<ContainerRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        events: Option<mpsc::UnboundedSender<TimestampedEvent>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            docker,
            registry,
            control_plane,
            events,
            config,
            shutting_down: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Signals `run_forever` to stop after its current (or next) pass
    /// completes, rather than cancelling mid-sweep.
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(TimestampedEvent::now(event));
        }
    }

    /// Runs every pass once, accumulating a summary. Called once
    /// immediately at process start and then on `config.poll_interval`
    ///.
    pub async fn run_once(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let live_names = match self.docker.list_containers(CONTAINER_NAME_PREFIX).await {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = %err, "reconciler: failed to list live containers");
                Vec::new()
            }
        };
        let live_set: HashSet<&str> = live_names.iter().map(String::as_str).collect();
        summary.live_containers_seen = live_names.len();

        // Pass 3: live containers matching a registry entry get their
        // ports/status refreshed and pushed to the control plane.
        for mapping in self.registry.all().await {
            if !live_set.contains(mapping.container_name.as_str()) {
                continue;
            }
            if let Err(err) = self.refresh_live_entry(&mapping.container_name).await {
                tracing::warn!(
                    container = %mapping.container_name,
                    error = %err,
                    "reconciler: failed to refresh live container"
                );
                continue;
            }
            summary.registry_entries_updated += 1;
        }

        // Pass 4: registry entries whose container has disappeared.
        for mapping in self.registry.all().await {
            if live_set.contains(mapping.container_name.as_str()) {
                continue;
            }
            if !mapping.session_status.is_live() {
                continue;
            }
            let claim = self.registry.claim(&mapping.container_name).await;
            let mut guard = claim.lock().await;
            if let Some(entry) = guard.as_mut() {
                entry.session_status = ContainerStatus::Stopped;
            }
            drop(guard);
            summary.registry_entries_marked_stopped += 1;
        }

        // Pass 2 + 5: control-plane TaskRuns in a live state whose
        // expected container is absent from the runtime (orphan sweep).
        match self.control_plane.task_runs_active_instances().await {
            Ok(active_runs) => {
                for run in active_runs {
                    let expected_name = run.id.container_name();
                    if live_set.contains(expected_name.as_str()) {
                        continue;
                    }
                    if let Err(err) = self
                        .control_plane
                        .task_runs_update_container_status(
                            &run.id,
                            TaskRunStatus::Stopped,
                            Some(Utc::now()),
                        )
                        .await
                    {
                        tracing::warn!(
                            run_id = %run.id,
                            error = %err,
                            "reconciler: failed to mark orphaned run stopped"
                        );
                        continue;
                    }
                    self.emit(EngineEvent::OrphanStopped {
                        run_id: run.id.clone(),
                    });
                    summary.orphans_stopped += 1;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "reconciler: failed to list active instances");
            }
        }

        // Pass 6: Capacity & Retention, if auto-cleanup is enabled.
        if self.config.auto_cleanup_enabled {
            summary.retention = enforce_capacity_and_retention(
                self.docker.as_ref(),
                self.registry.as_ref(),
                self.control_plane.as_ref(),
                self.events.as_ref(),
            )
            .await;
        }

        summary
    }

    async fn refresh_live_entry(&self, container_name: &str) -> Result<(), cmux_container::ContainerError> {
        let claim = self.registry.claim(container_name).await;
        let mut guard = claim.lock().await;
        let Some(mapping) = guard.as_mut() else {
            return Ok(());
        };

        let running = self.docker.is_running(&mapping.instance_id).await?;
        let ports = self
            .docker
            .inspect_ports(&mapping.instance_id, self.config.container_ports.into())
            .await?;
        mapping.ports = ports;
        mapping.session_status = if running {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        };

        let run_id = mapping.task_run_id.clone();
        let status = mapping.session_status;
        drop(guard);

        let _ = self
            .control_plane
            .task_runs_update_container_ports(&run_id, ports)
            .await;
        let _ = self
            .control_plane
            .task_runs_update_container_status(
                &run_id,
                if running {
                    TaskRunStatus::Running
                } else {
                    TaskRunStatus::Stopped
                },
                None,
            )
            .await;
        self.emit(EngineEvent::ContainerStatusChanged { run_id, status });
        Ok(())
    }

    /// Runs `run_once` immediately, then every `poll_interval` until
    /// `request_shutdown` is called. Shutdown is checked between passes
    /// only — a sweep already in flight always runs to completion.
    pub async fn run_forever(self: Arc<Self>) {
        self.run_once().await;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.tick().await; // first tick fires immediately; already ran above
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if self.shutting_down.load(Ordering::SeqCst) {
                        return;
                    }
                    self.run_once().await;
                }
                _ = self.shutdown.notified() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmux_core::testing::InMemoryControlPlane;
    use cmux_core::{ContainerDescriptor, PortTriple, PullRequestState, TaskId, TaskRun, TaskRunId};
    use cmux_registry::ContainerMapping;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeDocker {
        live: Vec<String>,
        running: StdMutex<std::collections::HashMap<String, bool>>,
    }

    #[async_trait::async_trait]
    impl DockerRuntime for FakeDocker {
        async fn image_exists(&self, _image: &str) -> Result<bool, cmux_container::ContainerError> {
            Ok(true)
        }
        async fn pull_image(&self, _image: &str) -> Result<(), cmux_container::ContainerError> {
            Ok(())
        }
        async fn volume_ensure(&self, _name: &str) -> Result<bool, cmux_container::ContainerError> {
            Ok(false)
        }
        async fn volume_remove(&self, _name: &str) -> Result<(), cmux_container::ContainerError> {
            Ok(())
        }
        async fn remove_stale_container(&self, _name: &str) -> Result<(), cmux_container::ContainerError> {
            Ok(())
        }
        async fn create_container(
            &self,
            _spec: &cmux_container::ContainerSpec,
        ) -> Result<String, cmux_container::ContainerError> {
            unimplemented!()
        }
        async fn start_container(&self, _container_id: &str) -> Result<(), cmux_container::ContainerError> {
            Ok(())
        }
        async fn inspect_ports(
            &self,
            _container_id: &str,
            _container_ports: cmux_container::ExposedPorts,
        ) -> Result<PortTriple, cmux_container::ContainerError> {
            Ok(PortTriple {
                ide: Some(1),
                worker: Some(2),
                extension: Some(3),
            })
        }
        async fn is_running(&self, container_id: &str) -> Result<bool, cmux_container::ContainerError> {
            Ok(*self
                .running
                .lock()
                .unwrap()
                .get(container_id)
                .unwrap_or(&true))
        }
        async fn list_containers(&self, _name_prefix: &str) -> Result<Vec<String>, cmux_container::ContainerError> {
            Ok(self.live.clone())
        }
        async fn stop_container(&self, _container_id: &str) -> Result<(), cmux_container::ContainerError> {
            Ok(())
        }
        async fn logs_tail(
            &self,
            _container_id: &str,
            _lines: usize,
        ) -> Result<String, cmux_container::ContainerError> {
            Ok(String::new())
        }
        async fn wait_exit(&self, _container_id: &str) -> Result<Option<i32>, cmux_container::ContainerError> {
            Ok(None)
        }
        async fn exec_detached(
            &self,
            _container_id: &str,
            _command: Vec<String>,
        ) -> Result<(), cmux_container::ContainerError> {
            Ok(())
        }
    }

    fn mk_run(id: &str, status: TaskRunStatus, container_status: ContainerStatus) -> TaskRun {
        let now = Utc::now();
        let run_id = TaskRunId::new(id);
        let mut container = ContainerDescriptor::new(run_id.container_name(), now);
        container.status = container_status;
        TaskRun {
            id: run_id,
            task_id: TaskId::new("task-1"),
            agent_name: "claude".to_string(),
            worktree_path: PathBuf::from("/tmp/wt"),
            head_branch: "cmux-1".to_string(),
            base_branch: "main".to_string(),
            status,
            crowned: false,
            pull_request_url: None,
            pull_request_state: PullRequestState::None,
            pull_request_is_draft: false,
            container,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn orphan_sweep_marks_missing_containers_stopped() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let run = mk_run("run-orphan", TaskRunStatus::Running, ContainerStatus::Running);
        control_plane.seed_task_run(run.clone());

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::default()); // no live containers
        let registry = Arc::new(ContainerRegistry::new());
        let reconciler = Reconciler::new(
            docker,
            registry,
            control_plane.clone(),
            None,
            ReconcilerConfig::default(),
        );

        let summary = reconciler.run_once().await;
        assert_eq!(summary.orphans_stopped, 1);

        let updated = control_plane.task_run_snapshot(&run.id).expect("run present");
        assert_eq!(updated.status, TaskRunStatus::Stopped);
    }

    #[tokio::test]
    async fn live_container_matching_registry_entry_gets_refreshed() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let run_id = TaskRunId::new("run-live");
        control_plane.seed_task_run(mk_run("run-live", TaskRunStatus::Running, ContainerStatus::Running));

        let name = run_id.container_name();
        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker {
            live: vec![name.clone()],
            ..Default::default()
        });
        let registry = Arc::new(ContainerRegistry::new());
        registry
            .insert(ContainerMapping::new(
                name.clone(),
                run_id.clone(),
                "inst-1",
                Utc::now(),
                600_000,
                1_800_000,
            ))
            .await;

        let reconciler = Reconciler::new(
            docker,
            Arc::clone(&registry),
            control_plane.clone(),
            None,
            ReconcilerConfig::default(),
        );
        let summary = reconciler.run_once().await;
        assert_eq!(summary.registry_entries_updated, 1);
        assert_eq!(summary.retention.ttl_evicted, 0);

        let mapping = registry.snapshot(&name).await.expect("mapping present");
        assert_eq!(mapping.ports.worker, Some(2));
    }

    #[tokio::test]
    async fn registry_entry_with_no_live_container_is_marked_stopped() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let run_id = TaskRunId::new("run-stale");
        let name = run_id.container_name();

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::default());
        let registry = Arc::new(ContainerRegistry::new());
        registry
            .insert(ContainerMapping::new(name.clone(), run_id, "inst-1", Utc::now(), 600_000, 1_800_000))
            .await;

        let reconciler = Reconciler::new(docker, Arc::clone(&registry), control_plane, None, ReconcilerConfig::default());
        let summary = reconciler.run_once().await;
        assert_eq!(summary.registry_entries_marked_stopped, 1);

        let mapping = registry.snapshot(&name).await.expect("mapping present");
        assert_eq!(mapping.session_status, ContainerStatus::Stopped);
    }

    #[tokio::test]
    async fn idle_running_container_past_idle_timeout_is_evicted() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let run_id = TaskRunId::new("run-idle");
        control_plane.seed_task_run(mk_run("run-idle", TaskRunStatus::Running, ContainerStatus::Running));

        let name = run_id.container_name();
        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker {
            live: vec![name.clone()],
            ..Default::default()
        });
        let registry = Arc::new(ContainerRegistry::new());
        let mut mapping = ContainerMapping::new(
            name.clone(),
            run_id.clone(),
            "inst-1",
            Utc::now() - chrono::Duration::minutes(20),
            600_000, // 10 minute idle timeout, already well past
            1_800_000,
        );
        mapping.session_status = ContainerStatus::Running;
        registry.insert(mapping).await;

        let reconciler = Reconciler::new(docker, Arc::clone(&registry), control_plane.clone(), None, ReconcilerConfig::default());
        let summary = reconciler.run_once().await;
        assert_eq!(summary.retention.ttl_evicted, 1);

        assert!(registry.snapshot(&name).await.is_none());
        let updated = control_plane.task_run_snapshot(&run_id).expect("run present");
        assert_eq!(updated.status, TaskRunStatus::Stopped);
    }

    #[tokio::test]
    async fn request_shutdown_stops_run_forever_between_passes() {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::default());
        let registry = Arc::new(ContainerRegistry::new());
        let reconciler = Arc::new(Reconciler::new(
            docker,
            registry,
            control_plane,
            None,
            ReconcilerConfig {
                poll_interval: Duration::from_millis(5),
                ..ReconcilerConfig::default()
            },
        ));

        let handle = tokio::spawn(Arc::clone(&reconciler).run_forever());
        // Let at least the immediate pass (and likely a tick or two) run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        reconciler.request_shutdown();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run_forever should exit promptly after request_shutdown")
            .expect("run_forever task should not panic");
    }

    #[tokio::test]
    async fn passes_are_independent_a_failing_docker_list_does_not_abort_the_sweep() {
        // An empty live list (simulating a docker listing failure path
        // where we fall back to an empty set) must still let the orphan
        // sweep run to completion.
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let run = mk_run("run-a", TaskRunStatus::Running, ContainerStatus::Running);
        control_plane.seed_task_run(run.clone());

        let docker: Arc<dyn DockerRuntime> = Arc::new(FakeDocker::default());
        let registry = Arc::new(ContainerRegistry::new());
        let reconciler = Reconciler::new(docker, registry, control_plane.clone(), None, ReconcilerConfig::default());

        let summary = reconciler.run_once().await;
        assert_eq!(summary.orphans_stopped, 1);
    }
}
