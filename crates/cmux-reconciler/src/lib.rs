//! State Reconciler + Capacity & Retention: the
//! periodic sweep that keeps the registry, the control plane, and the
//! container runtime converged, and evicts idle or over-capacity
//! containers.

pub mod reconciler;
pub mod retention;

pub use reconciler::{ReconcileSummary, Reconciler, ReconcilerConfig, DEFAULT_POLL_INTERVAL};
pub use retention::{enforce_capacity_and_retention, RetentionSummary};
