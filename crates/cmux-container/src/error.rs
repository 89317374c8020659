#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("docker command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("docker command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to parse docker output for {command}: {message}")]
    Parse { command: String, message: String },
    #[error("worker request failed: {0}")]
    WorkerRequest(String),
    #[error("worker liveness check timed out after {attempts} attempts")]
    WorkerLivenessTimeout { attempts: u32 },
    #[error("io error: {0}")]
    Filesystem(#[from] std::io::Error),
}
