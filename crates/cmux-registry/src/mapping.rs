//! In-process `ContainerMapping` value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cmux_core::{ContainerStatus, PortTriple, TaskRunId};

/// Everything the registry knows about one live (or recently-live)
/// container, keyed by container name in `ContainerRegistry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMapping {
    pub container_name: String,
    pub task_run_id: TaskRunId,
    pub instance_id: String,
    pub team_id: Option<String>,
    pub auth_token: Option<String>,
    pub ports: PortTriple,
    pub session_status: ContainerStatus,
    /// Named volume name by logical role (`"workspace"`, `"ide"`).
    pub volumes: BTreeMap<String, String>,
    pub last_activity_at: DateTime<Utc>,
    pub idle_timeout_ms: u64,
    pub warm_expires_at: Option<DateTime<Utc>>,
    pub warm_retention_ms: u64,
}

impl ContainerMapping {
    pub fn new(
        container_name: impl Into<String>,
        task_run_id: TaskRunId,
        instance_id: impl Into<String>,
        now: DateTime<Utc>,
        idle_timeout_ms: u64,
        warm_retention_ms: u64,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            task_run_id,
            instance_id: instance_id.into(),
            team_id: None,
            auth_token: None,
            ports: PortTriple::default(),
            session_status: ContainerStatus::Starting,
            volumes: BTreeMap::new(),
            last_activity_at: now,
            idle_timeout_ms,
            warm_expires_at: None,
            warm_retention_ms,
        }
    }

    /// The retention window in effect for this mapping's current session
    /// status: `idle_timeout_ms` while running, `warm_retention_ms`
    /// once stopped/warm.
    pub fn active_retention_ms(&self) -> u64 {
        match self.session_status {
            ContainerStatus::Running | ContainerStatus::Starting => self.idle_timeout_ms,
            ContainerStatus::Warm | ContainerStatus::Stopped | ContainerStatus::Terminated => {
                self.warm_retention_ms
            }
        }
    }

    /// Whether `active_retention_ms` has elapsed since `last_activity_at`.
    pub fn is_ttl_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_activity_at);
        match chrono::Duration::milliseconds(self.active_retention_ms() as i64).to_std() {
            Ok(budget) => elapsed.to_std().map(|e| e >= budget).unwrap_or(true),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(now: DateTime<Utc>) -> ContainerMapping {
        ContainerMapping::new("cmux-abc123456789", TaskRunId::new("run-1"), "inst-1", now, 1_000, 2_000)
    }

    #[test]
    fn active_retention_switches_on_session_status() {
        let now = Utc::now();
        let mut mapping = mk(now);
        mapping.session_status = ContainerStatus::Running;
        assert_eq!(mapping.active_retention_ms(), 1_000);
        mapping.session_status = ContainerStatus::Warm;
        assert_eq!(mapping.active_retention_ms(), 2_000);
    }

    #[test]
    fn ttl_expired_once_retention_window_elapses() {
        let now = Utc::now();
        let mut mapping = mk(now - chrono::Duration::milliseconds(5_000));
        mapping.session_status = ContainerStatus::Warm;
        assert!(mapping.is_ttl_expired(now));

        mapping.last_activity_at = now;
        assert!(!mapping.is_ttl_expired(now));
    }
}
