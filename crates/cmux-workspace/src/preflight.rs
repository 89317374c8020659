//! Pre-flight guard: refuse to operate inside a directory that
//! looks like a human's working copy rather than a `cmux`-managed projects
//! root.
//!
//! Resolved open question (see DESIGN.md): a missing or empty root is not
//! an error — it is created on demand by `cmux-git`'s materialization step.
//! `PreconditionFailed` fires only when the root already contains entries
//! that are not themselves per-repo project directories shaped like
//! `<repo>/origin` + `<repo>/worktrees`.

use std::path::Path;

use cmux_core::StagedError;

const STAGE: &str = "Workspace pre-flight";

/// Read-only: lists directory entries but never creates or deletes
/// anything.
pub fn preflight_check(projects_root: &Path) -> Result<(), StagedError> {
    let Ok(entries) = std::fs::read_dir(projects_root) else {
        // Missing root (or unreadable, e.g. doesn't exist yet) — fine.
        return Ok(());
    };

    for entry in entries {
        let entry = entry.map_err(|err| {
            StagedError::fatal(STAGE, format!("failed to read projects root entry: {err}"))
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| {
            StagedError::fatal(STAGE, format!("failed to stat {}: {err}", path.display()))
        })?;

        if !file_type.is_dir() {
            return Err(StagedError::precondition_failed(
                STAGE,
                format!(
                    "unexpected files: {} is not a per-repo project directory",
                    path.display()
                ),
            ));
        }

        check_project_dir_shape(&path)?;
    }

    Ok(())
}

fn check_project_dir_shape(project_dir: &Path) -> Result<(), StagedError> {
    let Ok(children) = std::fs::read_dir(project_dir) else {
        return Ok(());
    };

    for child in children {
        let child = child.map_err(|err| {
            StagedError::fatal(
                STAGE,
                format!("failed to read {}: {err}", project_dir.display()),
            )
        })?;
        let name = child.file_name();
        let name = name.to_string_lossy();
        if name != "origin" && name != "worktrees" {
            return Err(StagedError::precondition_failed(
                STAGE,
                format!(
                    "unexpected files: {} contains {} which is neither 'origin' nor 'worktrees'",
                    project_dir.display(),
                    name
                ),
            ));
        }
    }

    Ok(())
}
