use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::PrError;

/// Mirrors the allowlist-contract pattern used for automated git-provider
/// CLI invocations: only the exact argument shapes the driver needs are
/// permitted, so a bug elsewhere in the process can't smuggle an arbitrary
/// `gh` invocation through this wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedGhCommand {
    PrCreateDraft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhCli {
    pub binary: PathBuf,
}

impl Default for GhCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gh"),
        }
    }
}

impl GhCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn run_allowed<I, S>(
        &self,
        cwd: &Path,
        allowed: AllowedGhCommand,
        args: I,
    ) -> Result<GhOutput, PrError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        validate_contract(allowed, &owned_args)?;

        let mut command = Command::new(&self.binary);
        command.current_dir(cwd);
        for arg in &owned_args {
            command.arg(arg);
        }

        let rendered = render_command(&self.binary, &owned_args);
        let output = command.output().map_err(|source| PrError::Io {
            command: rendered.clone(),
            source,
        })?;

        let stdout = String::from_utf8(output.stdout).map_err(|source| PrError::NonUtf8Output {
            command: rendered.clone(),
            stream: "stdout",
            source,
        })?;
        let stderr = String::from_utf8(output.stderr).map_err(|source| PrError::NonUtf8Output {
            command: rendered.clone(),
            stream: "stderr",
            source,
        })?;

        if !output.status.success() {
            return Err(PrError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(GhOutput { stdout, stderr })
    }
}

fn validate_contract(allowed: AllowedGhCommand, args: &[OsString]) -> Result<(), PrError> {
    let ok = match allowed {
        AllowedGhCommand::PrCreateDraft => {
            args.len() >= 9
                && arg_eq(args, 0, "pr")
                && arg_eq(args, 1, "create")
                && arg_eq(args, 2, "--draft")
                && arg_eq(args, 3, "--title")
                && arg_eq(args, 5, "--body")
                && arg_eq(args, 7, "--head")
                && args.len() == 11
                && arg_eq(args, 9, "--base")
        }
    };

    if ok {
        return Ok(());
    }

    Err(PrError::ContractViolation {
        message: format!("disallowed automated gh invocation: {:?}", args),
    })
}

fn arg_eq(args: &[OsString], idx: usize, expected: &str) -> bool {
    args.get(idx)
        .map(|arg| arg.to_string_lossy() == expected)
        .unwrap_or(false)
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
