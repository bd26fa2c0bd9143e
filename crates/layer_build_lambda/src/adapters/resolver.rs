use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use layer_build_core::error::BuildError;
use layer_build_core::package_spec::PackageSpec;
use tokio::process::Command;
use tracing::debug;

use super::blocking::block_on;

const STDERR_TAIL_LINES: usize = 20;

/// Strategy that materializes a package spec into `target_dir`.
///
/// Implementations must give up once `remaining` has elapsed and report
/// `BuildError::Timeout` rather than leave work running.
pub trait PackageResolver {
    fn resolve(
        &self,
        spec: &PackageSpec,
        target_dir: &Path,
        remaining: Duration,
    ) -> Result<(), BuildError>;
}

/// Installs requirements with pip into a target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipResolver {
    program: String,
    leading_args: Vec<String>,
}

impl Default for PipResolver {
    fn default() -> Self {
        Self::new("pip", Vec::new())
    }
}

impl PipResolver {
    pub fn new(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Splits a command line such as `python3 -m pip` into program and leading args.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn command_args(&self, spec: &PackageSpec, target_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        args.push("install".into());
        args.extend(spec.install_args().map(OsString::from));
        args.push("--target".into());
        args.push(target_dir.as_os_str().to_owned());
        args.push("--no-cache-dir".into());
        args.push("--disable-pip-version-check".into());
        args.push("--no-input".into());
        args
    }
}

impl PackageResolver for PipResolver {
    fn resolve(
        &self,
        spec: &PackageSpec,
        target_dir: &Path,
        remaining: Duration,
    ) -> Result<(), BuildError> {
        let args = self.command_args(spec, target_dir);
        debug!(program = %self.program, ?args, "spawning package installer");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(target_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = self.program.clone();
        block_on(async move {
            // Dropping the pending output future kills the installer.
            let output = tokio::time::timeout(remaining, command.output())
                .await
                .map_err(|_| BuildError::timeout("resolution", remaining))?
                .map_err(|error| {
                    BuildError::Resolution(format!("failed to start {program}: {error}"))
                })?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                debug!(stdout = %stdout.trim(), "installer output");
            }

            if output.status.success() {
                Ok(())
            } else {
                Err(BuildError::Resolution(format!(
                    "{program} exited with {}: {}",
                    output.status,
                    stderr_tail(&output.stderr)
                )))
            }
        })
        .map_err(BuildError::Resolution)?
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    if lines.is_empty() {
        "no stderr output".to_string()
    } else {
        lines[start..].join("\n")
    }
}
