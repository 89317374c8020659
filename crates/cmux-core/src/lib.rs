//! Core types for the workspace provisioning and container lifecycle engine.

pub mod control_plane;
pub mod diff;
pub mod error;
pub mod events;
pub mod ids;
pub mod settings;
pub mod task;
#[cfg(feature = "testing")]
pub mod testing;

pub use control_plane::{Branch, ControlPlane, ControlPlaneError, GithubRepo};
pub use diff::{DiffFileRecord, FileChangeStatus, DIFF_CONTENT_SIZE_CAP_BYTES};
pub use error::{ErrorKind, OperationOutcome, StagedError};
pub use events::{EngineEvent, RetentionReason, TimestampedEvent};
pub use ids::{RepoId, TaskId, TaskRunId};
pub use settings::{load_settings, parse_settings, save_settings, ConfigError, Settings};
pub use task::{
    ContainerDescriptor, ContainerProvider, ContainerStatus, PortTriple, PullRequestState, Task,
    TaskRun, TaskRunStatus,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<TaskId>();
        let _ = TypeId::of::<TaskRunStatus>();
        let _ = TypeId::of::<ContainerStatus>();
    }

    #[test]
    fn crate_root_reexports_settings_helpers() {
        let settings = parse_settings("branch_prefix = \"agentwork\"").expect("parse settings");
        assert_eq!(settings.branch_prefix, "agentwork");
    }
}
