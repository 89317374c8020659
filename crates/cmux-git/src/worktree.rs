use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::RepoHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
}

/// Thin wrapper over `git worktree`. Path/branch naming is the Workspace
/// Planner's job; this manager only materializes what it's
/// told to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorktreeManager {
    git: GitCli,
}

impl WorktreeManager {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// `git worktree add -b <branch> <path> origin/<base_branch>`. Never
    /// touches the origin clone's HEAD.
    pub fn create_with_new_branch(
        &self,
        repo: &RepoHandle,
        worktree_path: &Path,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<(), GitError> {
        if worktree_path.exists() {
            return Err(GitError::AlreadyExists {
                path: worktree_path.to_path_buf(),
            });
        }

        let args = vec![
            OsString::from("worktree"),
            OsString::from("add"),
            OsString::from("-b"),
            OsString::from(branch_name),
            worktree_path.as_os_str().to_os_string(),
            OsString::from(format!("origin/{base_branch}")),
        ];
        match self.git.run(&repo.root, args) {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("already exists") || stderr.contains("already used") =>
            {
                Err(GitError::AlreadyExists {
                    path: worktree_path.to_path_buf(),
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn create_for_existing_branch(
        &self,
        repo: &RepoHandle,
        worktree_path: &Path,
        branch_name: &str,
    ) -> Result<(), GitError> {
        if worktree_path.exists() {
            return Err(GitError::AlreadyExists {
                path: worktree_path.to_path_buf(),
            });
        }

        let args = vec![
            OsString::from("worktree"),
            OsString::from("add"),
            worktree_path.as_os_str().to_os_string(),
            OsString::from(branch_name),
        ];
        self.git.run(&repo.root, args)?;
        Ok(())
    }

    pub fn worktree_exists(&self, repo: &RepoHandle, worktree_path: &Path) -> bool {
        self.list(repo)
            .map(|entries| entries.iter().any(|entry| entry.path == worktree_path))
            .unwrap_or(false)
    }

    pub fn remove(&self, repo: &RepoHandle, worktree_path: &Path, force: bool) -> Result<(), GitError> {
        let mut args = vec![OsString::from("worktree"), OsString::from("remove")];
        if force {
            args.push(OsString::from("--force"));
        }
        args.push(worktree_path.as_os_str().to_os_string());

        self.git.run(&repo.root, args)?;
        Ok(())
    }

    /// Repairs a worktree registered in git but missing on disk, or
    /// present on disk but unregistered, by removing then recreating
    ///.
    pub fn repair_with_new_branch(
        &self,
        repo: &RepoHandle,
        worktree_path: &Path,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<(), GitError> {
        let _ = self.remove(repo, worktree_path, true);
        let _ = self.git.run(&repo.root, ["worktree", "prune"]);
        self.create_with_new_branch(repo, worktree_path, branch_name, base_branch)
    }

    pub fn list(&self, repo: &RepoHandle) -> Result<Vec<ListedWorktree>, GitError> {
        let output = self
            .git
            .run(&repo.root, ["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&output.stdout)
    }
}

fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();

    let mut current_path: Option<PathBuf> = None;
    let mut current_branch: Option<String> = None;
    let mut current_head: Option<String> = None;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(path) = current_path.take() {
                listed.push(ListedWorktree {
                    path,
                    branch: current_branch.take(),
                    head: current_head.take(),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest.trim()));
            continue;
        }
        if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.trim().trim_start_matches("refs/heads/").to_string();
            current_branch = Some(branch);
            continue;
        }
        if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.trim().to_string());
            continue;
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{parse_worktree_list, WorktreeManager};
    use crate::command::GitCli;
    use crate::repo::discover_repo;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("cmux-git-worktree-{prefix}-{now}"))
    }

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Bare "origin" plus a local clone, so `origin/<base_branch>` resolves
    /// the way `RepositoryManager::ensure_repository` leaves it.
    fn init_origin_clone(base_branch: &str) -> PathBuf {
        let bare = unique_temp_dir("bare");
        fs::create_dir_all(&bare).expect("create bare dir");
        run_git(&bare, &["init", "--bare", "-b", base_branch]);

        let seed = unique_temp_dir("seed");
        fs::create_dir_all(&seed).expect("create seed dir");
        run_git(&seed, &["init", "-b", base_branch]);
        fs::write(seed.join("README.md"), "init\n").expect("write file");
        run_git(&seed, &["add", "README.md"]);
        run_git(
            &seed,
            &[
                "-c",
                "user.name=Test User",
                "-c",
                "user.email=test@example.com",
                "commit",
                "-m",
                "init",
            ],
        );
        run_git(&seed, &["remote", "add", "origin", bare.to_str().unwrap()]);
        run_git(&seed, &["push", "origin", base_branch]);
        let _ = fs::remove_dir_all(&seed);

        let clone = unique_temp_dir("clone");
        run_git(
            clone.parent().unwrap(),
            &[
                "clone",
                bare.to_str().unwrap(),
                clone.file_name().unwrap().to_str().unwrap(),
            ],
        );
        clone
    }

    #[test]
    fn parse_worktree_list_parses_multiple_entries_and_trims_refs_prefix() {
        let raw = "\
worktree /repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /repo/worktrees/T1
HEAD 2222222222222222222222222222222222222222
branch refs/heads/cmux-t1

";

        let parsed = parse_worktree_list(raw).expect("parse worktree list");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].path, PathBuf::from("/repo"));
        assert_eq!(parsed[0].branch.as_deref(), Some("main"));
        assert_eq!(parsed[1].path, PathBuf::from("/repo/worktrees/T1"));
        assert_eq!(parsed[1].branch.as_deref(), Some("cmux-t1"));
    }

    #[test]
    fn parse_worktree_list_handles_entry_without_branch() {
        let raw = "\
worktree /repo/worktrees/T2
HEAD 3333333333333333333333333333333333333333
detached

";

        let parsed = parse_worktree_list(raw).expect("parse worktree list");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].branch, None);
    }

    #[test]
    fn parse_worktree_list_rejects_non_empty_unparseable_output() {
        let err = parse_worktree_list("nonsense output").expect_err("expected parse error");
        assert!(matches!(err, crate::error::GitError::Parse { .. }));
    }

    #[test]
    fn create_list_and_remove_worktree_on_a_new_branch() {
        let origin_path = init_origin_clone("main");
        let git = GitCli::default();
        let repo = discover_repo(&origin_path, &git).expect("discover repo");
        let manager = WorktreeManager::new(git);

        let worktree_path = origin_path
            .parent()
            .unwrap()
            .join("worktrees")
            .join("cmux-t1");
        manager
            .create_with_new_branch(&repo, &worktree_path, "cmux-t1", "main")
            .expect("create worktree");
        assert!(worktree_path.exists());

        let listed = manager.list(&repo).expect("list worktrees");
        assert!(listed.iter().any(|entry| {
            entry.path == worktree_path && entry.branch.as_deref() == Some("cmux-t1")
        }));
        assert!(manager.worktree_exists(&repo, &worktree_path));

        manager
            .remove(&repo, &worktree_path, true)
            .expect("remove worktree");
        assert!(!worktree_path.exists());

        let _ = fs::remove_dir_all(&origin_path);
    }

    #[test]
    fn create_with_new_branch_rejects_an_existing_path() {
        let origin_path = init_origin_clone("main");
        let git = GitCli::default();
        let repo = discover_repo(&origin_path, &git).expect("discover repo");
        let manager = WorktreeManager::new(git);

        let worktree_path = origin_path
            .parent()
            .unwrap()
            .join("worktrees")
            .join("cmux-t2");
        manager
            .create_with_new_branch(&repo, &worktree_path, "cmux-t2", "main")
            .expect("create worktree");

        let err = manager
            .create_with_new_branch(&repo, &worktree_path, "cmux-t2-again", "main")
            .expect_err("second create should fail");
        assert!(matches!(err, GitError::AlreadyExists { .. }));

        let _ = fs::remove_dir_all(&origin_path);
    }
}
