//! Deduplicated repository clones and worktree lifecycle, serialized per
//! origin path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::{discover_repo, remote_default_branch, RepoHandle};
use crate::worktree::{ListedWorktree, WorktreeManager};

#[derive(Default)]
struct OriginState {
    default_branch: Option<String>,
}

/// Owns one `tokio::sync::Mutex` per origin path so concurrent calls for the
/// same origin coalesce while different origins proceed in parallel (spec
/// §4.1: "Concurrent calls for the same `origin_path` coalesce via a keyed
/// async mutex; different paths run in parallel").
pub struct RepositoryManager {
    git: GitCli,
    worktrees: WorktreeManager,
    locks: RwLock<HashMap<PathBuf, Arc<Mutex<OriginState>>>>,
}

impl Default for RepositoryManager {
    fn default() -> Self {
        Self::new(GitCli::default())
    }
}

impl RepositoryManager {
    pub fn new(git: GitCli) -> Self {
        Self {
            git: git.clone(),
            worktrees: WorktreeManager::new(git),
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, origin_path: &Path) -> Arc<Mutex<OriginState>> {
        if let Some(lock) = self.locks.read().await.get(origin_path) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(origin_path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(OriginState::default()))),
        )
    }

    /// Fetches if `<origin_path>/.git` already exists, else shallow clones
    /// `url` into it.
    pub async fn ensure_repository(
        &self,
        url: &str,
        origin_path: &Path,
        branch_hint: Option<&str>,
    ) -> Result<RepoHandle, GitError> {
        let lock = self.lock_for(origin_path).await;
        let _guard = lock.lock().await;

        let git = self.git.clone();
        let url = url.to_string();
        let origin_path = origin_path.to_path_buf();
        let branch_hint = branch_hint.map(str::to_string);

        tokio::task::spawn_blocking(move || ensure_repository_blocking(&git, &url, &origin_path, branch_hint.as_deref()))
            .await
            .expect("ensure_repository blocking task panicked")
    }

    /// Cached after the first successful lookup per origin path.
    pub async fn default_branch(&self, origin_path: &Path) -> Result<String, GitError> {
        let lock = self.lock_for(origin_path).await;
        let mut state = lock.lock().await;
        if let Some(branch) = &state.default_branch {
            return Ok(branch.clone());
        }

        let git = self.git.clone();
        let path = origin_path.to_path_buf();
        let branch =
            tokio::task::spawn_blocking(move || remote_default_branch(&path, &git))
                .await
                .expect("default_branch blocking task panicked")?;
        state.default_branch = Some(branch.clone());
        Ok(branch)
    }

    pub async fn create_worktree(
        &self,
        origin_path: &Path,
        worktree_path: &Path,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<(), GitError> {
        let lock = self.lock_for(origin_path).await;
        let _guard = lock.lock().await;

        let git = self.git.clone();
        let origin_path = origin_path.to_path_buf();
        let worktree_path = worktree_path.to_path_buf();
        let branch_name = branch_name.to_string();
        let base_branch = base_branch.to_string();

        tokio::task::spawn_blocking(move || {
            let repo = discover_repo(&origin_path, &git)?;
            let manager = WorktreeManager::new(git);
            if manager.worktree_exists(&repo, &worktree_path) && !worktree_path.exists() {
                // Registered in git's worktree list but absent from disk —
                // e.g. the path was removed out-of-band. Repair it instead
                // of letting `worktree add` fail on the stale registration
                // (spec §4.1/§8).
                manager.repair_with_new_branch(&repo, &worktree_path, &branch_name, &base_branch)
            } else {
                manager.create_with_new_branch(&repo, &worktree_path, &branch_name, &base_branch)
            }
        })
        .await
        .expect("create_worktree blocking task panicked")
    }

    pub async fn worktree_exists(
        &self,
        origin_path: &Path,
        worktree_path: &Path,
    ) -> Result<bool, GitError> {
        let git = self.git.clone();
        let origin_path = origin_path.to_path_buf();
        let worktree_path = worktree_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let repo = discover_repo(&origin_path, &git)?;
            let manager = WorktreeManager::new(git);
            Ok(manager.worktree_exists(&repo, &worktree_path))
        })
        .await
        .expect("worktree_exists blocking task panicked")
    }

    pub async fn remove_worktree(
        &self,
        origin_path: &Path,
        worktree_path: &Path,
        force: bool,
    ) -> Result<(), GitError> {
        let lock = self.lock_for(origin_path).await;
        let _guard = lock.lock().await;

        let git = self.git.clone();
        let origin_path = origin_path.to_path_buf();
        let worktree_path = worktree_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let repo = discover_repo(&origin_path, &git)?;
            let manager = WorktreeManager::new(git);
            manager.remove(&repo, &worktree_path, force)
        })
        .await
        .expect("remove_worktree blocking task panicked")
    }

    pub async fn list_worktrees(
        &self,
        origin_path: &Path,
    ) -> Result<Vec<ListedWorktree>, GitError> {
        let git = self.git.clone();
        let origin_path = origin_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let repo = discover_repo(&origin_path, &git)?;
            WorktreeManager::new(git).list(&repo)
        })
        .await
        .expect("list_worktrees blocking task panicked")
    }
}

fn ensure_repository_blocking(
    git: &GitCli,
    url: &str,
    origin_path: &Path,
    branch_hint: Option<&str>,
) -> Result<RepoHandle, GitError> {
    if origin_path.join(".git").exists() {
        git.run(origin_path, ["fetch", "origin", "--prune"])?;
        return discover_repo(origin_path, git);
    }

    if let Some(parent) = origin_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| GitError::Io {
            command: format!("create_dir_all {}", parent.display()),
            source,
        })?;
    }

    let mut args = vec!["clone", "--depth", "1"];
    if let Some(branch) = branch_hint {
        args.push("--branch");
        args.push(branch);
    }
    let path_str = origin_path.to_string_lossy().into_owned();
    args.push(url);
    args.push(&path_str);
    git.run(
        origin_path
            .parent()
            .unwrap_or_else(|| Path::new(".")),
        args,
    )?;

    discover_repo(origin_path, git)
}
