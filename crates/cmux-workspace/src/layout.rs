use std::path::{Path, PathBuf};

/// Everything `cmux-git::RepositoryManager` needs to materialize an origin
/// clone and a per-run worktree, plus what downstream callers (PR driver,
/// container binds) need to locate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub projects_root: PathBuf,
    pub project_dir: PathBuf,
    pub origin_path: PathBuf,
    pub worktrees_dir: PathBuf,
    pub branch_name: String,
    pub folder_name: String,
    pub worktree_path: PathBuf,
    pub repo_name: String,
}

impl WorktreeInfo {
    pub fn new(
        projects_root: PathBuf,
        repo_name: String,
        branch_name: String,
        folder_name: String,
    ) -> Self {
        let project_dir = projects_root.join(&repo_name);
        let origin_path = project_dir.join("origin");
        let worktrees_dir = project_dir.join("worktrees");
        let worktree_path = worktrees_dir.join(&folder_name);
        Self {
            projects_root,
            project_dir,
            origin_path,
            worktrees_dir,
            branch_name,
            folder_name,
            worktree_path,
            repo_name,
        }
    }
}

/// Expands a leading `~` against `home`. Any other path is returned
/// unchanged.
pub fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) if raw == "~" => home.to_path_buf(),
        Some(raw) if raw.starts_with("~/") => home.join(&raw[2..]),
        _ => path.to_path_buf(),
    }
}

/// Derives the local repository directory name from a clone URL: the last
/// path segment with a trailing `.git` stripped, understood for both
/// `https://host/org/repo.git` and `git@host:org/repo.git` forms.
pub fn derive_repo_name(url: &str) -> String {
    let without_git_suffix = url.strip_suffix(".git").unwrap_or(url);
    let last_segment = without_git_suffix
        .rsplit(['/', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(without_git_suffix);
    last_segment.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_replaces_only_a_leading_tilde() {
        let home = PathBuf::from("/home/dev");
        assert_eq!(
            expand_tilde(Path::new("~/cmux"), &home),
            PathBuf::from("/home/dev/cmux")
        );
        assert_eq!(expand_tilde(Path::new("~"), &home), home);
        assert_eq!(
            expand_tilde(Path::new("/var/cmux"), &home),
            PathBuf::from("/var/cmux")
        );
    }

    #[test]
    fn derive_repo_name_strips_git_suffix_from_https_url() {
        assert_eq!(
            derive_repo_name("https://github.com/acme/app.git"),
            "app"
        );
    }

    #[test]
    fn derive_repo_name_handles_ssh_style_urls() {
        assert_eq!(derive_repo_name("git@host:acme/app.git"), "app");
    }

    #[test]
    fn derive_repo_name_handles_urls_without_git_suffix() {
        assert_eq!(derive_repo_name("https://github.com/acme/app"), "app");
    }

    #[test]
    fn worktree_info_lays_out_paths_under_the_project_directory() {
        let info = WorktreeInfo::new(
            PathBuf::from("/home/dev/cmux"),
            "app".to_string(),
            "cmux-1".to_string(),
            "cmux-1".to_string(),
        );
        assert_eq!(info.project_dir, PathBuf::from("/home/dev/cmux/app"));
        assert_eq!(info.origin_path, PathBuf::from("/home/dev/cmux/app/origin"));
        assert_eq!(
            info.worktree_path,
            PathBuf::from("/home/dev/cmux/app/worktrees/cmux-1")
        );
    }
}
