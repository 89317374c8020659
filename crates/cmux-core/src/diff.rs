//! Per-file diff record.

use serde::{Deserialize, Serialize};

/// 950 KiB: the control plane's per-document size cap, chosen to leave
/// headroom under its underlying 1 MiB limit.
pub const DIFF_CONTENT_SIZE_CAP_BYTES: usize = 950 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFileRecord {
    pub path: String,
    #[serde(default)]
    pub old_path: Option<String>,
    pub status: FileChangeStatus,
    pub additions: u64,
    pub deletions: u64,
    pub binary: bool,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub old_content: Option<String>,
    #[serde(default)]
    pub new_content: Option<String>,
    #[serde(default)]
    pub content_omitted: bool,
}

impl DiffFileRecord {
    /// Invariant: `content_omitted == true` iff the combined patch+old+new
    /// size exceeded the cap.
    pub fn content_size(&self) -> usize {
        self.patch.as_deref().map_or(0, str::len)
            + self.old_content.as_deref().map_or(0, str::len)
            + self.new_content.as_deref().map_or(0, str::len)
    }
}
