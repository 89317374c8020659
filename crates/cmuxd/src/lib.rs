//! Daemon process wiring: config load, engine construction, the
//! reconciler loop, and (in `main.rs`) the CLI entry points.

pub mod config;
pub mod doctor;
pub mod engine;
pub mod shutdown;

pub use config::{CmuxdConfig, ConfigError};
pub use doctor::{run_doctor, DoctorCheck, DoctorReport};
pub use engine::Engine;
pub use shutdown::wait_for_shutdown_signal;
