//! Environment checks (`cmuxd doctor`): confirm the external binaries this
//! engine shells out to are reachable before a user reports a confusing
//! mid-provisioning failure.

use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::config::CmuxdConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
    pub all_ok: bool,
}

fn command_available(binary: &str, version_flag: &str) -> bool {
    Command::new(binary)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

pub fn run_doctor(config: &CmuxdConfig) -> DoctorReport {
    let mut checks = Vec::new();

    let docker_ok = command_available(&config.docker_binary, "--version");
    checks.push(DoctorCheck {
        name: "docker".to_string(),
        ok: docker_ok,
        detail: if docker_ok {
            format!("{} is available", config.docker_binary)
        } else {
            format!("{} not found on PATH", config.docker_binary)
        },
    });

    let git_ok = command_available(&config.git_binary, "--version");
    checks.push(DoctorCheck {
        name: "git".to_string(),
        ok: git_ok,
        detail: if git_ok {
            format!("{} is available", config.git_binary)
        } else {
            format!("{} not found on PATH", config.git_binary)
        },
    });

    let gh_ok = command_available(&config.gh_binary, "--version");
    checks.push(DoctorCheck {
        name: "gh".to_string(),
        ok: gh_ok,
        detail: if gh_ok {
            format!("{} is available", config.gh_binary)
        } else {
            format!("{} not found on PATH (required only for draft-PR creation)", config.gh_binary)
        },
    });

    let all_ok = docker_ok && git_ok;
    DoctorReport { checks, all_ok }
}
