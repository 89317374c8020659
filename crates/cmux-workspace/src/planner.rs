use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use cmux_core::{Settings, StagedError};

use crate::layout::{derive_repo_name, expand_tilde, WorktreeInfo};
use crate::namer::BranchNamer;
use crate::preflight::preflight_check;

const STAGE: &str = "Plan workspace";

/// Inputs the caller supplies for one run.
#[derive(Debug, Clone)]
pub struct PlannerInput {
    pub repo_url: String,
    pub branch_hint: Option<String>,
    pub task_description: Option<String>,
    pub user_prefix: Option<String>,
}

pub struct WorkspacePlanner<N: BranchNamer> {
    namer: N,
    home: PathBuf,
}

impl<N: BranchNamer> WorkspacePlanner<N> {
    pub fn new(namer: N, home: PathBuf) -> Self {
        Self { namer, home }
    }

    fn projects_root(&self, settings: &Settings) -> PathBuf {
        match &settings.worktree_root {
            Some(root) => expand_tilde(root, &self.home),
            None => self.home.join("cmux"),
        }
    }

    /// Resolves the full filesystem layout and naming for a new run.
    /// Performs no filesystem mutation; `preflight_check` only reads.
    pub async fn plan(
        &self,
        input: PlannerInput,
        settings: &Settings,
    ) -> Result<WorktreeInfo, StagedError> {
        let projects_root = self.projects_root(settings);
        preflight_check(&projects_root)?;

        let repo_name = derive_repo_name(&input.repo_url);
        let prefix = input
            .user_prefix
            .clone()
            .unwrap_or_else(|| settings.branch_prefix.clone());

        let (branch_name, folder_name) = if let Some(hint) = &input.branch_hint {
            (hint.clone(), hint.clone())
        } else if settings.ai_naming_enabled {
            match &input.task_description {
                Some(description) => match self.namer.suggest(description, &prefix).await {
                    Some((branch, folder)) => (branch, folder),
                    None => self.timestamp_name(&prefix),
                },
                None => self.timestamp_name(&prefix),
            }
        } else {
            self.timestamp_name(&prefix)
        };

        Ok(WorktreeInfo::new(
            projects_root,
            repo_name,
            branch_name,
            folder_name,
        ))
    }

    fn timestamp_name(&self, prefix: &str) -> (String, String) {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let name = format!("{prefix}-{millis}");
        (name.clone(), name)
    }
}

/// Appends a short disambiguator when the planned branch/folder name
/// collides with one `cmux-git` reports as already taken.
pub fn disambiguate(base_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return base_name.to_string();
    }
    format!("{base_name}-{attempt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namer::{NoopBranchNamer, StaticBranchNamer};

    fn settings() -> Settings {
        Settings {
            branch_prefix: "cmux".to_string(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn falls_back_to_timestamp_name_when_ai_naming_disabled() {
        let planner = WorkspacePlanner::new(NoopBranchNamer, PathBuf::from("/home/dev"));
        let info = planner
            .plan(
                PlannerInput {
                    repo_url: "git@host:acme/app.git".to_string(),
                    branch_hint: None,
                    task_description: Some("fix typo".to_string()),
                    user_prefix: None,
                },
                &settings(),
            )
            .await
            .expect("plan");
        assert!(info.branch_name.starts_with("cmux-"));
        assert_eq!(info.folder_name, info.branch_name);
        assert_eq!(info.repo_name, "app");
    }

    #[tokio::test]
    async fn branch_hint_takes_priority_over_ai_naming() {
        let planner = WorkspacePlanner::new(
            StaticBranchNamer::new("ignored-slug"),
            PathBuf::from("/home/dev"),
        );
        let mut s = settings();
        s.ai_naming_enabled = true;
        let info = planner
            .plan(
                PlannerInput {
                    repo_url: "https://github.com/acme/app.git".to_string(),
                    branch_hint: Some("release-1".to_string()),
                    task_description: Some("fix typo".to_string()),
                    user_prefix: None,
                },
                &s,
            )
            .await
            .expect("plan");
        assert_eq!(info.branch_name, "release-1");
    }

    #[tokio::test]
    async fn ai_naming_used_when_enabled_and_description_present() {
        let planner = WorkspacePlanner::new(StaticBranchNamer::new("fix-typo"), PathBuf::from("/home/dev"));
        let mut s = settings();
        s.ai_naming_enabled = true;
        let info = planner
            .plan(
                PlannerInput {
                    repo_url: "https://github.com/acme/app.git".to_string(),
                    branch_hint: None,
                    task_description: Some("fix typo".to_string()),
                    user_prefix: None,
                },
                &s,
            )
            .await
            .expect("plan");
        assert_eq!(info.branch_name, "cmux-fix-typo");
    }

    #[tokio::test]
    async fn worktree_root_override_expands_tilde() {
        let planner = WorkspacePlanner::new(NoopBranchNamer, PathBuf::from("/home/dev"));
        let mut s = settings();
        s.worktree_root = Some(PathBuf::from("~/custom-root"));
        let info = planner
            .plan(
                PlannerInput {
                    repo_url: "https://github.com/acme/app.git".to_string(),
                    branch_hint: Some("b1".to_string()),
                    task_description: None,
                    user_prefix: None,
                },
                &s,
            )
            .await
            .expect("plan");
        assert_eq!(info.projects_root, PathBuf::from("/home/dev/custom-root"));
    }

    #[test]
    fn disambiguate_appends_attempt_suffix() {
        assert_eq!(disambiguate("cmux-1", 0), "cmux-1");
        assert_eq!(disambiguate("cmux-1", 1), "cmux-1-1");
    }
}
