//! Newtype identifiers shared across the engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskRunId(pub String);

impl TaskRunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The deterministic 12-char prefix used to derive the container name
    /// `cmux-<shortId>` and the named volume suffixes.
    pub fn short_id(&self) -> String {
        self.0.chars().take(12).collect()
    }

    pub fn container_name(&self) -> String {
        format!("cmux-{}", self.short_id())
    }

    pub fn workspace_volume_name(&self) -> String {
        format!("cmux_session_{}_workspace", self.0)
    }

    pub fn ide_volume_name(&self) -> String {
        format!("cmux_session_{}_ide", self.0)
    }
}

impl std::fmt::Display for TaskRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskRunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoId(pub String);

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::TaskRunId;

    #[test]
    fn short_id_truncates_to_twelve_chars_and_names_derive_from_it() {
        let id = TaskRunId::new("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(id.short_id(), "abcdefghijkl");
        assert_eq!(id.container_name(), "cmux-abcdefghijkl");
    }

    #[test]
    fn short_id_does_not_pad_ids_shorter_than_twelve_chars() {
        let id = TaskRunId::new("abc123");
        assert_eq!(id.short_id(), "abc123");
        assert_eq!(id.container_name(), "cmux-abc123");
    }

    #[test]
    fn volume_names_are_keyed_by_the_full_run_id() {
        let id = TaskRunId::new("run-9");
        assert_eq!(id.workspace_volume_name(), "cmux_session_run-9_workspace");
        assert_eq!(id.ide_volume_name(), "cmux_session_run-9_ide");
    }
}
