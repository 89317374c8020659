//! Diff Store Adapter: blob materialization against the
//! host-side worktree, the 950 KiB size policy, and the atomic replace
//! into the control plane.

use std::path::Path;

use cmux_core::{
    ControlPlane, DiffFileRecord, FileChangeStatus, StagedError, TaskRunId,
    DIFF_CONTENT_SIZE_CAP_BYTES,
};
use cmux_git::GitCli;

use crate::parser::ParsedFileDiff;

const STAGE_REPLACE_DIFFS: &str = "Replace diffs";

pub struct DiffStoreAdapter {
    git: GitCli,
}

impl Default for DiffStoreAdapter {
    fn default() -> Self {
        Self::new(GitCli::default())
    }
}

impl DiffStoreAdapter {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// Materializes blob content for every non-binary parsed file and
    /// applies the size policy.
    pub fn materialize(&self, parsed: &[ParsedFileDiff], worktree_path: &Path) -> Vec<DiffFileRecord> {
        parsed
            .iter()
            .map(|file| self.materialize_one(file, worktree_path))
            .collect()
    }

    fn materialize_one(&self, file: &ParsedFileDiff, worktree_path: &Path) -> DiffFileRecord {
        if file.binary {
            return DiffFileRecord {
                path: file.path.clone(),
                old_path: file.old_path.clone(),
                status: file.status,
                additions: file.additions,
                deletions: file.deletions,
                binary: true,
                patch: Some(file.patch.clone()),
                old_content: None,
                new_content: None,
                content_omitted: false,
            };
        }

        let (old_content, new_content) = match file.status {
            FileChangeStatus::Added => (String::new(), read_worktree_file(worktree_path, &file.path)),
            FileChangeStatus::Deleted => (String::new(), String::new()),
            FileChangeStatus::Modified | FileChangeStatus::Renamed => {
                let new_content = read_worktree_file(worktree_path, &file.path);
                let lookup_path = file.old_path.as_deref().unwrap_or(&file.path);
                let old_content = self.git_show_head(worktree_path, lookup_path);
                (old_content, new_content)
            }
        };

        let patch_size = file.patch.len();
        let old_size = old_content.len();
        let new_size = new_content.len();
        let total = patch_size + old_size + new_size;

        if total <= DIFF_CONTENT_SIZE_CAP_BYTES {
            DiffFileRecord {
                path: file.path.clone(),
                old_path: file.old_path.clone(),
                status: file.status,
                additions: file.additions,
                deletions: file.deletions,
                binary: false,
                patch: Some(file.patch.clone()),
                old_content: Some(old_content),
                new_content: Some(new_content),
                content_omitted: false,
            }
        } else {
            let patch = (patch_size <= DIFF_CONTENT_SIZE_CAP_BYTES).then(|| file.patch.clone());
            DiffFileRecord {
                path: file.path.clone(),
                old_path: file.old_path.clone(),
                status: file.status,
                additions: file.additions,
                deletions: file.deletions,
                binary: false,
                patch,
                old_content: None,
                new_content: None,
                content_omitted: true,
            }
        }
    }

    fn git_show_head(&self, worktree_path: &Path, path: &str) -> String {
        self.git
            .run(worktree_path, ["show", &format!("HEAD:{path}")])
            .map(|out| out.stdout)
            .unwrap_or_default()
    }

    /// Final step: atomically replace the run's diff set, then stamp the
    /// "diffs updated at" timestamp.
    pub async fn replace_for_run(
        &self,
        control_plane: &dyn ControlPlane,
        run_id: &TaskRunId,
        records: Vec<DiffFileRecord>,
    ) -> Result<(), StagedError> {
        control_plane
            .diffs_replace_for_task_run(run_id, records)
            .await
            .map_err(|err| StagedError::upstream(STAGE_REPLACE_DIFFS, err.to_string()))?;
        control_plane
            .diffs_update_timestamp(run_id)
            .await
            .map_err(|err| StagedError::upstream(STAGE_REPLACE_DIFFS, err.to_string()))?;
        Ok(())
    }
}

fn read_worktree_file(worktree_path: &Path, relative_path: &str) -> String {
    std::fs::read_to_string(worktree_path.join(relative_path)).unwrap_or_default()
}
