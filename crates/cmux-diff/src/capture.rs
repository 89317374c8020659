//! Diff Capture: a pipeline of best-effort steps executed over
//! worker RPC at the run's workspace directory, ending in the canonical
//! `git diff --cached` output (or an explicitly-labeled fallback).
//!
//! Design note: each step is a small async function that logs its own
//! failure and returns `Option<String>` rather than a nested try/catch;
//! the pipeline never aborts partway through.

use std::time::Duration;

use cmux_container::{WorkerClient, WorkerExecRequest, WorkerExecResponse};

use crate::exclusions::{path_is_excluded, pathspec_args};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const QUICK_TIMEOUT: Duration = Duration::from_secs(5);
const DIFF_TIMEOUT: Duration = Duration::from_secs(20);
const AGGRESSIVE_LINE_LIMIT: usize = 1000;

pub const AGGRESSIVE_CAPTURE_HEADER: &str =
    "# cmux aggressive capture: no unified diff was produced; below are raw file contents\n";
pub const FILE_LISTING_HEADER: &str =
    "# cmux aggressive capture: no file contents could be read; below is a file listing\n";

pub struct DiffCapture<'a> {
    worker: &'a dyn WorkerClient,
    base_url: String,
    workspace_dir: String,
    task_run_id: String,
}

impl<'a> DiffCapture<'a> {
    pub fn new(
        worker: &'a dyn WorkerClient,
        base_url: impl Into<String>,
        workspace_dir: impl Into<String>,
        task_run_id: impl Into<String>,
    ) -> Self {
        Self {
            worker,
            base_url: base_url.into(),
            workspace_dir: workspace_dir.into(),
            task_run_id: task_run_id.into(),
        }
    }

    async fn exec(
        &self,
        command: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Option<WorkerExecResponse> {
        let request = WorkerExecRequest {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: self.workspace_dir.clone(),
            env: Default::default(),
        };
        match self.worker.exec(&self.base_url, request, timeout).await {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::warn!(
                    run_id = %self.task_run_id,
                    command,
                    error = %err,
                    "diff capture step failed to transport"
                );
                None
            }
        }
    }

    /// Best-effort step: runs and logs the result, swallowing failures
    /// entirely.
    async fn run_logged(&self, command: &str, args: &[&str], timeout: Duration) {
        if let Some(response) = self.exec(command, args, timeout).await {
            if !response.ok() {
                tracing::debug!(
                    run_id = %self.task_run_id,
                    command,
                    args = ?args,
                    stderr = %response.stderr,
                    error = ?response.error,
                    "diff capture diagnostic step returned non-zero"
                );
            }
        }
    }

    /// Runs the full capture protocol; returns the composed diff string.
    /// Empty only when every strategy (canonical diff, aggressive capture,
    /// file listing) produced nothing.
    pub async fn capture(&self) -> String {
        self.run_logged("git", &["fetch", "origin", "--prune"], FETCH_TIMEOUT)
            .await;

        self.run_logged("pwd", &[], QUICK_TIMEOUT).await;
        self.run_logged(
            "git",
            &["rev-parse", "--show-toplevel"],
            QUICK_TIMEOUT,
        )
        .await;
        self.run_logged("git", &["status", "--verbose"], QUICK_TIMEOUT)
            .await;
        self.run_logged("git", &["status", "--porcelain"], QUICK_TIMEOUT)
            .await;
        self.run_logged("ls", &["-la"], QUICK_TIMEOUT).await;

        self.run_logged("git", &["reset"], QUICK_TIMEOUT).await;
        let pathspecs = pathspec_args();
        let mut add_args: Vec<&str> = vec!["add", "-A", "--", "."];
        add_args.extend(pathspecs.iter().map(String::as_str));
        self.run_logged("git", &add_args, QUICK_TIMEOUT).await;

        self.run_logged(
            "git",
            &["diff", "--cached", "--stat"],
            QUICK_TIMEOUT,
        )
        .await;
        let raw_diff = self
            .exec("git", &["diff", "--cached"], DIFF_TIMEOUT)
            .await
            .map(|r| r.stdout)
            .unwrap_or_default();

        let filtered = filter_excluded_sections(&raw_diff);

        if has_real_diff(&filtered) {
            return filtered;
        }

        self.aggressive_capture().await
    }

    async fn aggressive_capture(&self) -> String {
        let porcelain = self
            .exec("git", &["status", "--porcelain"], QUICK_TIMEOUT)
            .await
            .map(|r| r.stdout)
            .unwrap_or_default();
        let paths = parse_porcelain_paths(&porcelain);

        if paths.is_empty() {
            return self.file_listing_fallback().await;
        }

        let mut out = String::from(AGGRESSIVE_CAPTURE_HEADER);
        let mut any_content = false;
        for path in &paths {
            let head_cmd = format!("head -n {AGGRESSIVE_LINE_LIMIT} -- {path}");
            let content = self
                .exec("sh", &["-c", &head_cmd], QUICK_TIMEOUT)
                .await
                .map(|r| r.stdout)
                .unwrap_or_default();
            if content.is_empty() {
                continue;
            }
            any_content = true;
            out.push_str(&format!("--- {path} (first {AGGRESSIVE_LINE_LIMIT} lines) ---\n"));
            out.push_str(&content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
        }

        if !any_content {
            return self.file_listing_fallback().await;
        }
        out
    }

    async fn file_listing_fallback(&self) -> String {
        let listing = self
            .exec("git", &["status", "--porcelain"], QUICK_TIMEOUT)
            .await
            .map(|r| r.stdout)
            .unwrap_or_default();
        if listing.trim().is_empty() {
            return String::new();
        }
        format!("{FILE_LISTING_HEADER}{listing}")
    }
}

/// Step 5: drop any diff section whose `diff --git a/<path>` header
/// matches an exclusion, defending against pathspec glob expansion gaps.
fn filter_excluded_sections(diff_text: &str) -> String {
    let mut out = String::with_capacity(diff_text.len());
    let mut current = String::new();
    let mut current_excluded = false;

    let flush = |out: &mut String, current: &str, excluded: bool| {
        if !excluded {
            out.push_str(current);
        }
    };

    for line in diff_text.split_inclusive('\n') {
        if line.starts_with("diff --git ") {
            flush(&mut out, &current, current_excluded);
            current.clear();
            current_excluded = header_path_excluded(line);
        }
        current.push_str(line);
    }
    flush(&mut out, &current, current_excluded);
    out
}

fn header_path_excluded(header_line: &str) -> bool {
    let trimmed = header_line.trim_end_matches('\n');
    let Some(rest) = trimmed.strip_prefix("diff --git ") else {
        return false;
    };
    // "a/<path> b/<path>" — take the `a/`-prefixed token; spaces inside
    // paths make this approximate, but it's a defense-in-depth check, not
    // the source of truth (the per-file `--- a/` / `+++ b/` lines are).
    let Some(without_a) = rest.strip_prefix("a/") else {
        return false;
    };
    let Some(b_idx) = without_a.rfind(" b/") else {
        return false;
    };
    path_is_excluded(&without_a[..b_idx])
}

fn has_real_diff(diff_text: &str) -> bool {
    !diff_text.trim().is_empty() && diff_text.contains("diff --git ")
}

fn parse_porcelain_paths(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter_map(|line| {
            if line.len() < 4 {
                return None;
            }
            let path = line[3..].trim();
            if path.is_empty() {
                return None;
            }
            // Renames are "old -> new"; keep the new path.
            Some(path.rsplit(" -> ").next().unwrap_or(path).to_string())
        })
        .collect()
}
