//! Staged error kinds shared across the engine.
//!
//! Every fallible operation that can surface to a caller tags the stage it
//! failed at, so `cmuxd` can render `Failed at '<stage>': <message>` without
//! each crate re-deriving that string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PreconditionFailed,
    Timeout,
    Transient,
    Upstream,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed at '{stage}': {message}")]
pub struct StagedError {
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
}

impl StagedError {
    pub fn new(kind: ErrorKind, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn not_found(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, stage, message)
    }

    pub fn already_exists(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, stage, message)
    }

    pub fn precondition_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, stage, message)
    }

    pub fn timeout(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, stage, message)
    }

    pub fn transient(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, stage, message)
    }

    pub fn upstream(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, stage, message)
    }

    pub fn fatal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, stage, message)
    }
}

/// The shape callers see for a failed user-visible operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn success(url: impl Into<String>) -> Self {
        Self {
            success: true,
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn failure(err: &StagedError) -> Self {
        Self {
            success: false,
            url: None,
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_error_renders_stage_and_message() {
        let err = StagedError::upstream("Create draft PR", "gh exited with status 1");
        assert_eq!(
            err.to_string(),
            "Failed at 'Create draft PR': gh exited with status 1"
        );
    }

    #[test]
    fn operation_outcome_failure_embeds_staged_error_rendering() {
        let err = StagedError::timeout("Push branch", "exceeded 10s budget");
        let outcome = OperationOutcome::failure(&err);
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Failed at 'Push branch': exceeded 10s budget")
        );
    }
}
