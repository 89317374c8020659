//! PR/Commit Driver: checkout, commit, push (with rebase
//! retry), and draft-PR creation via the `gh` CLI, each stage reporting a
//! `StagedError` tagging its own name.

use std::path::Path;

use cmux_core::{DiffFileRecord, StagedError};
use cmux_git::{GitCli, RepoHandle};

use crate::command::{AllowedGhCommand, GhCli};
use crate::error::PrError;

const PR_TITLE_MAX_LEN: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

pub struct PrDriver {
    git: GitCli,
    gh: GhCli,
}

impl Default for PrDriver {
    fn default() -> Self {
        Self {
            git: GitCli::default(),
            gh: GhCli::default(),
        }
    }
}

impl PrDriver {
    pub fn new(git: GitCli, gh: GhCli) -> Self {
        Self { git, gh }
    }

    /// Step 1: confirm current branch == the run's branch; else check it
    /// out (creating it locally if needed). Never discards local changes.
    pub fn ensure_branch_checked_out(
        &self,
        repo: &RepoHandle,
        branch: &str,
    ) -> Result<(), StagedError> {
        let stage = "Checkout branch";
        let current = cmux_git::current_branch(repo, &self.git)
            .map_err(|err| StagedError::upstream(stage, err.to_string()))?;
        if current == branch {
            return Ok(());
        }

        match self.git.run(&repo.root, ["checkout", branch]) {
            Ok(_) => Ok(()),
            Err(_) => {
                self.git
                    .run(&repo.root, ["checkout", "-b", branch])
                    .map(|_| ())
                    .map_err(|err| StagedError::upstream(stage, err.to_string()))
            }
        }
    }

    /// Step 2: stage everything and commit. "Nothing to commit" is success.
    pub fn commit_all(
        &self,
        repo: &RepoHandle,
        message: &str,
    ) -> Result<CommitOutcome, StagedError> {
        let stage = "Commit changes";
        self.git
            .run(&repo.root, ["add", "-A"])
            .map_err(|err| StagedError::upstream(stage, err.to_string()))?;

        match self.git.run(&repo.root, ["commit", "-m", message]) {
            Ok(_) => Ok(CommitOutcome::Committed),
            Err(cmux_git::GitError::CommandFailed { stdout, stderr, .. })
                if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") =>
            {
                Ok(CommitOutcome::NothingToCommit)
            }
            Err(err) => Err(StagedError::upstream(stage, err.to_string())),
        }
    }

    /// Step 3: push, retrying once after `pull --rebase` on failure.
    pub fn push_with_rebase_retry(
        &self,
        repo: &RepoHandle,
        branch: &str,
    ) -> Result<(), StagedError> {
        let stage = "Push branch";
        if self
            .git
            .run(&repo.root, ["push", "-u", "origin", branch])
            .is_ok()
        {
            return Ok(());
        }

        self.git
            .run(&repo.root, ["pull", "--rebase", "origin", branch])
            .map_err(|err| StagedError::upstream(stage, err.to_string()))?;

        self.git
            .run(&repo.root, ["push", "-u", "origin", branch])
            .map(|_| ())
            .map_err(|err| StagedError::upstream(stage, err.to_string()))
    }

    /// Step 4: open the draft PR, title truncated to 72 chars + ellipsis.
    pub fn open_draft_pr(
        &self,
        repo_root: &Path,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, StagedError> {
        let stage = "Create draft PR";
        let title = truncate_title(title, PR_TITLE_MAX_LEN);
        let output = self
            .gh
            .run_allowed(
                repo_root,
                AllowedGhCommand::PrCreateDraft,
                [
                    "pr", "create", "--draft", "--title", &title, "--body", body, "--head", head,
                    "--base", base,
                ],
            )
            .map_err(|err| StagedError::upstream(stage, err.to_string()))?;

        parse_pr_url(&output.stdout).ok_or_else(|| {
            StagedError::upstream(stage, "gh pr create did not print a PR URL".to_string())
        })
    }
}

fn parse_pr_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .find_map(|line| {
            let trimmed = line.trim();
            trimmed
                .starts_with("https://")
                .then(|| trimmed.to_string())
        })
}

/// Truncates to `max_len` bytes on a char boundary, appending `...` when
/// truncated.
pub fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        return title.to_string();
    }
    let budget = max_len.saturating_sub(3);
    let truncated: String = title.chars().take(budget).collect();
    format!("{truncated}...")
}

/// Commit message generated from the diff set, falling back to the task
/// title and run id when there is nothing to summarize from.
pub fn generate_commit_message(
    diffs: &[DiffFileRecord],
    fallback_title: &str,
    run_id: &str,
) -> String {
    if diffs.is_empty() {
        return format!("{fallback_title} ({run_id})");
    }

    let mut paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
    paths.truncate(5);
    let summary = paths.join(", ");
    let suffix = if diffs.len() > 5 {
        format!(" and {} more", diffs.len() - 5)
    } else {
        String::new()
    };
    format!("Update {summary}{suffix}")
}

impl From<PrError> for StagedError {
    fn from(err: PrError) -> Self {
        StagedError::upstream("gh command", err.to_string())
    }
}
