//! Workspace Planner: resolves filesystem layout and naming for
//! a new run from user settings, without touching the filesystem itself
//! (materialization belongs to `cmux-git`'s `RepositoryManager`).

pub mod layout;
pub mod namer;
pub mod planner;
pub mod preflight;

pub use layout::WorktreeInfo;
pub use namer::{BranchNamer, NoopBranchNamer, StaticBranchNamer};
pub use planner::{disambiguate, PlannerInput, WorkspacePlanner};
pub use preflight::preflight_check;
