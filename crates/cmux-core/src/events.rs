//! Lifecycle events emitted by the engine for external observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskRunId;
use crate::task::{ContainerStatus, TaskRunStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EngineEvent {
    ContainerStarting {
        run_id: TaskRunId,
    },
    ContainerPortsAssigned {
        run_id: TaskRunId,
        ide: Option<u16>,
        worker: Option<u16>,
        extension: Option<u16>,
    },
    WorkerConnected {
        run_id: TaskRunId,
    },
    WorkerDisconnected {
        run_id: TaskRunId,
    },
    ContainerExited {
        run_id: TaskRunId,
        exit_code: Option<i32>,
    },
    TaskRunStatusChanged {
        run_id: TaskRunId,
        status: TaskRunStatus,
    },
    ContainerStatusChanged {
        run_id: TaskRunId,
        status: ContainerStatus,
    },
    DiffsReplaced {
        run_id: TaskRunId,
        file_count: usize,
    },
    OrphanStopped {
        run_id: TaskRunId,
    },
    RetentionEvicted {
        run_id: TaskRunId,
        reason: RetentionReason,
    },
    PullRequestOpened {
        run_id: TaskRunId,
        url: String,
        is_draft: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionReason {
    TtlExpired,
    MaxRunningExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub at: DateTime<Utc>,
    pub event: EngineEvent,
}

impl TimestampedEvent {
    pub fn now(event: EngineEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}
