//! Capacity & Retention: TTL-based eviction of idle/warm
//! containers and a hard cap on concurrently running containers, both
//! gated by `settings.auto_cleanup_enabled` and run as the final step of
//! each reconciler sweep.

use cmux_container::DockerRuntime;
use cmux_core::{
    ContainerStatus, ControlPlane, EngineEvent, RetentionReason, TaskRun, TaskRunStatus, TimestampedEvent,
};
use cmux_registry::ContainerRegistry;
use tokio::sync::mpsc;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSummary {
    pub ttl_evicted: usize,
    pub max_running_evicted: usize,
}

pub async fn enforce_capacity_and_retention(
    docker: &dyn DockerRuntime,
    registry: &ContainerRegistry,
    control_plane: &dyn ControlPlane,
    events: Option<&mpsc::UnboundedSender<TimestampedEvent>>,
) -> RetentionSummary {
    let mut summary = RetentionSummary::default();

    let settings = match control_plane.settings_get().await {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!(error = %err, "reconciler: failed to read settings for retention");
            return summary;
        }
    };
    if !settings.auto_cleanup_enabled {
        return summary;
    }

    // Step 1: TTL expiry.
    match control_plane.task_runs_containers_to_stop().await {
        Ok(expired) => {
            for run in expired {
                if evict_run(docker, registry, control_plane, events, &run, RetentionReason::TtlExpired).await {
                    summary.ttl_evicted += 1;
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "reconciler: failed to list TTL-expired runs");
        }
    }

    // Step 1b: idle-running TTL. `ContainerDescriptor` (the control-plane
    // side `task_runs_containers_to_stop` reads) carries no per-run
    // `idle_timeout_ms`, only `warm_expires_at` — so a `Running` session
    // idle past its `idle_timeout_ms` is invisible to step 1. The registry's
    // `ContainerMapping` does carry it; scan that instead and bridge back
    // to the control plane's `TaskRun` to evict.
    for mapping in registry.all().await {
        if mapping.session_status != ContainerStatus::Running || !mapping.is_ttl_expired(chrono::Utc::now()) {
            continue;
        }
        let run = match control_plane.task_runs_get(&mapping.task_run_id).await {
            Ok(run) => run,
            Err(err) => {
                tracing::warn!(
                    task_run_id = %mapping.task_run_id,
                    error = %err,
                    "reconciler: failed to load idle-running task run for eviction"
                );
                continue;
            }
        };
        if run.status != TaskRunStatus::Running {
            continue;
        }
        if evict_run(docker, registry, control_plane, events, &run, RetentionReason::TtlExpired).await {
            summary.ttl_evicted += 1;
        }
    }

    // Step 2: hard cap on concurrently running containers, oldest-idle-first
    //.
    match control_plane.task_runs_by_cleanup_priority().await {
        Ok(mut by_priority) => {
            while by_priority.len() > settings.max_running {
                let run = by_priority.remove(0);
                if evict_run(
                    docker,
                    registry,
                    control_plane,
                    events,
                    &run,
                    RetentionReason::MaxRunningExceeded,
                )
                .await
                {
                    summary.max_running_evicted += 1;
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "reconciler: failed to list runs by cleanup priority");
        }
    }

    summary
}

/// Stops the container, removes its named volumes, clears the registry
/// entry, and marks the run stopped in the control plane. Returns whether
/// the eviction completed (a stop/volume-removal failure aborts this one
/// run's eviction without touching the others).
async fn evict_run(
    docker: &dyn DockerRuntime,
    registry: &ContainerRegistry,
    control_plane: &dyn ControlPlane,
    events: Option<&mpsc::UnboundedSender<TimestampedEvent>>,
    run: &TaskRun,
    reason: RetentionReason,
) -> bool {
    let container_name = run.id.container_name();

    if let Err(err) = docker.stop_container(&container_name).await {
        tracing::warn!(run_id = %run.id, error = %err, "retention: failed to stop container");
        return false;
    }

    for volume_name in run.container.volumes.values() {
        if let Err(err) = docker.volume_remove(volume_name).await {
            tracing::warn!(
                run_id = %run.id,
                volume = %volume_name,
                error = %err,
                "retention: failed to remove volume"
            );
            return false;
        }
    }

    registry.remove(&container_name).await;

    if let Err(err) = control_plane
        .task_runs_update_container_status(&run.id, TaskRunStatus::Stopped, Some(chrono::Utc::now()))
        .await
    {
        tracing::warn!(run_id = %run.id, error = %err, "retention: failed to mark run stopped");
        return false;
    }

    if let Some(tx) = events {
        let _ = tx.send(TimestampedEvent::now(EngineEvent::RetentionEvicted {
            run_id: run.id.clone(),
            reason,
        }));
    }
    true
}
