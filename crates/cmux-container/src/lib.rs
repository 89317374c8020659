//! Container Instance: per-run container lifecycle, port
//! mapping, worker RPC, and the devcontainer bootstrap.

pub mod config_filter;
pub mod devcontainer;
pub mod docker;
pub mod error;
pub mod instance;
pub mod ports;
pub mod worker;

pub use config_filter::filter_git_config;
pub use devcontainer::{bootstrap_devcontainer, has_devcontainer, tail_devcontainer_log};
pub use docker::{BindMount, ContainerSpec, DockerCliRuntime, DockerRuntime, ExposedPorts};
pub use error::ContainerError;
pub use instance::{
    ContainerInstance, ContainerInstanceConfig, ContainerPortSpec, InstanceInfo,
    InstanceStatusSnapshot, PortRole,
};
pub use ports::PortCache;
pub use worker::{
    poll_until_alive, ConfigureGitRequest, HttpWorkerClient, SshKeyMaterial, WorkerClient,
    WorkerExecRequest, WorkerExecResponse,
};
