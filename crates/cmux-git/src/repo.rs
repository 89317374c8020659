use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
    pub git_dir: PathBuf,
}

pub fn discover_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let inside = match git.run(start_path, ["rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => output.stdout.trim().eq("true"),
        Err(GitError::CommandFailed { .. }) => false,
        Err(err) => return Err(err),
    };

    if !inside {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let root_raw = git.run(start_path, ["rev-parse", "--show-toplevel"])?;
    let root = PathBuf::from(root_raw.stdout.trim());

    let git_dir_raw = git.run(&root, ["rev-parse", "--git-dir"])?;
    let git_dir_rel = PathBuf::from(git_dir_raw.stdout.trim());
    let git_dir = if git_dir_rel.is_absolute() {
        git_dir_rel
    } else {
        root.join(git_dir_rel)
    };

    Ok(RepoHandle { root, git_dir })
}

pub fn current_branch(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

pub fn head_sha(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

/// Remote HEAD, used once per origin clone and then cached by the
/// `RepositoryManager`.
pub fn remote_default_branch(origin_path: &Path, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(
        origin_path,
        ["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
    );
    let branch = match output {
        Ok(out) => out
            .stdout
            .trim()
            .trim_start_matches("origin/")
            .to_string(),
        Err(GitError::CommandFailed { .. }) => {
            // Shallow clones often don't carry origin/HEAD; ask the remote directly.
            let remote_show = git.run(origin_path, ["remote", "show", "origin"])?;
            remote_show
                .stdout
                .lines()
                .find_map(|line| line.trim().strip_prefix("HEAD branch: "))
                .map(str::to_string)
                .ok_or_else(|| GitError::Parse {
                    context: "could not determine remote HEAD branch".to_string(),
                })?
        }
        Err(err) => return Err(err),
    };
    Ok(branch)
}
