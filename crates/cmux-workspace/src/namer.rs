//! AI-assisted branch/folder naming. The call to an actual
//! naming model is an external collaborator; this crate only
//! defines the seam and a couple of trivial implementations useful for
//! tests and for when no API key is configured.

use async_trait::async_trait;

/// Produces a `(branch_name, folder_name)` slug from a task description.
/// `None` means "fall back to the timestamp-based name" — used when naming
/// is disabled, no API key is available, or the call fails.
#[async_trait]
pub trait BranchNamer: Send + Sync {
    async fn suggest(&self, description: &str, prefix: &str) -> Option<(String, String)>;
}

/// Always defers to the timestamp fallback. The default when AI naming is
/// disabled or no namer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBranchNamer;

#[async_trait]
impl BranchNamer for NoopBranchNamer {
    async fn suggest(&self, _description: &str, _prefix: &str) -> Option<(String, String)> {
        None
    }
}

/// Returns a fixed slug regardless of input. Useful for tests that need a
/// deterministic AI-naming outcome without a real model call.
#[derive(Debug, Clone)]
pub struct StaticBranchNamer {
    pub slug: String,
}

impl StaticBranchNamer {
    pub fn new(slug: impl Into<String>) -> Self {
        Self { slug: slug.into() }
    }
}

#[async_trait]
impl BranchNamer for StaticBranchNamer {
    async fn suggest(&self, _description: &str, prefix: &str) -> Option<(String, String)> {
        let name = format!("{prefix}-{}", self.slug);
        Some((name.clone(), name))
    }
}
