//! Pathspec exclusions shared by the staging step and the post-filter:
//! lockfiles, logs, caches, OS metadata, build output.

/// Patterns as used for `git add -A -- . <pattern...>` pathspec exclusion
/// (`:!` shorthand for `:(exclude)`).
pub const EXCLUDED_GLOBS: &[&str] = &[
    "*.lock",
    "*-lock.json",
    "pnpm-lock.yaml",
    "*.log",
    "logs",
    ".DS_Store",
    "node_modules",
    "dist",
    "build",
    ".next",
    "out",
    ".turbo",
    "coverage",
    ".nyc_output",
    "*.min.js",
    "*.min.css",
    "*.map",
    ".env.local",
    ".env.*.local",
];

/// Renders the exclusion list as `git add` pathspec arguments.
pub fn pathspec_args() -> Vec<String> {
    EXCLUDED_GLOBS
        .iter()
        .map(|pattern| format!(":!{pattern}"))
        .collect()
}

/// Defense-in-depth check used to drop diff sections whose header path
/// matched an excluded glob despite the pathspec.
pub fn path_is_excluded(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    EXCLUDED_GLOBS.iter().any(|pattern| glob_matches(pattern, path, file_name))
}

fn glob_matches(pattern: &str, full_path: &str, file_name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        return file_name.ends_with(suffix) || full_path.ends_with(suffix);
    }
    if pattern.contains('*') {
        return glob_star_match(pattern, file_name) || glob_star_match(pattern, full_path);
    }
    // Bare names (directories like `node_modules`, or exact files like
    // `.DS_Store`) match any path component.
    full_path
        .split('/')
        .any(|component| component == pattern)
        || file_name == pattern
}

/// Minimal single-`*`-segment glob matcher (e.g. `.env.*.local`); good
/// enough for the small, fixed pattern set above without pulling in a glob
/// crate.
fn glob_star_match(pattern: &str, candidate: &str) -> bool {
    let mut parts = pattern.splitn(2, '*');
    let (prefix, rest) = (parts.next().unwrap_or(""), parts.next());
    match rest {
        None => candidate == pattern,
        Some(rest) => {
            candidate.starts_with(prefix)
                && candidate[prefix.len()..].ends_with(rest)
                && candidate.len() >= prefix.len() + rest.len()
        }
    }
}
