use std::fs::OpenOptions;
use std::io::{SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::task;

use super::package::package_name;
use super::runner::{ProcessExit, wait_with_deadline};
use super::workspace::Workspace;
use super::{DISPLAY_NAME, ENTRY_PACKAGE, REJECTED_MESSAGE, TOOLCHAIN_PREAMBLE};
use crate::config::PlaygroundConfig;

/// Owner-read-only; the toolchain never needs to modify the source
const SOURCE_PERMISSIONS: u32 = 0o400;

/// Result of trying to turn a submission into an executable
#[derive(Debug)]
pub enum BuildOutcome {
    /// Refused before the toolchain ran
    Rejected(&'static str),
    /// Toolchain ran and reported errors; the text is safe to show the user
    CompileFailed(String),
    /// Toolchain could not be run or waited on
    ToolchainFault(anyhow::Error),
    /// Toolchain exceeded the build deadline and was killed
    TimedOut,
    Built(PathBuf),
}

/// Invokes the Go toolchain with a minimal, explicit environment
#[derive(Debug, Clone)]
pub struct Compiler {
    toolchain: PathBuf,
    env: Vec<(String, String)>,
    deadline: Duration,
}

impl Compiler {
    /// Captures the current values of the variables named in `env_names`
    ///
    /// Unset variables are left out rather than passed empty.
    pub fn new(toolchain: impl Into<PathBuf>, env_names: &[String], deadline: Duration) -> Self {
        let env = env_names
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect();

        Self {
            toolchain: toolchain.into(),
            env,
            deadline,
        }
    }

    pub fn from_config(config: &PlaygroundConfig) -> Self {
        Self::new(
            &config.toolchain,
            &config.toolchain_env,
            config.build_time_limit.into(),
        )
    }

    pub fn toolchain(&self) -> &Path {
        &self.toolchain
    }

    /// Writes `source` into `workspace` and builds it
    ///
    /// Returns `Err` only when the workspace itself cannot be used; every
    /// toolchain result, including a failure to launch it, is a [`BuildOutcome`].
    ///
    /// The toolchain keeps the server's working directory. Run from inside the
    /// workspace, `go build` would print the source as `./main.go` and the
    /// rewrite to [`DISPLAY_NAME`] would miss it.
    pub async fn build(&self, workspace: &Workspace, source: &str) -> Result<BuildOutcome> {
        let source_path = workspace.source_path();
        let (path, text) = (source_path.to_path_buf(), source.to_owned());
        task::spawn_blocking(move || write_source(&path, &text))
            .await
            .context("error joining source writer")??;

        // A clause that does not parse is left for the compiler to report.
        match package_name(source) {
            Ok(name) if name != ENTRY_PACKAGE => {
                log::debug!("Rejected submission declaring package {name:?}");
                return Ok(BuildOutcome::Rejected(REJECTED_MESSAGE));
            }
            Ok(_) => {}
            Err(e) => log::debug!("Package clause did not parse ({e}), building anyway"),
        }

        let artifact = workspace.artifact_path();
        let output = tempfile::tempfile().context("error creating build output file")?;
        let stdout = output.try_clone().context("error sharing build output file")?;
        let stderr = output.try_clone().context("error sharing build output file")?;

        let mut cmd = Command::new(&self.toolchain);
        cmd.arg("build")
            .arg("-o")
            .arg(artifact)
            .arg(source_path)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(BuildOutcome::ToolchainFault(anyhow!(e).context(format!(
                    "error starting toolchain {}",
                    self.toolchain.display()
                ))));
            }
        };

        let status = match wait_with_deadline(&mut child, self.deadline).await {
            ProcessExit::Exited(status) => status,
            ProcessExit::WaitFailed(e) => {
                return Ok(BuildOutcome::ToolchainFault(
                    anyhow!(e).context("error waiting for toolchain"),
                ));
            }
            ProcessExit::TimedOut => {
                log::info!("Build killed after {:?}", self.deadline);
                return Ok(BuildOutcome::TimedOut);
            }
        };

        if status.success() {
            if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
                return Ok(BuildOutcome::ToolchainFault(anyhow!(
                    "toolchain succeeded but produced no executable at {}",
                    artifact.display()
                )));
            }
            return Ok(BuildOutcome::Built(artifact.to_path_buf()));
        }

        let mut output = tokio::fs::File::from_std(output);
        output
            .seek(SeekFrom::Start(0))
            .await
            .context("error reading build output")?;
        let mut raw = Vec::new();
        output
            .read_to_end(&mut raw)
            .await
            .context("error reading build output")?;

        let mut diagnostics = rewrite_diagnostics(&String::from_utf8_lossy(&raw), source_path);
        if diagnostics.trim().is_empty() {
            diagnostics = format!("build failed: {status}");
        }
        log::debug!("Build failed with {status}");

        Ok(BuildOutcome::CompileFailed(diagnostics))
    }
}

fn write_source(path: &Path, source: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(SOURCE_PERMISSIONS)
        .open(path)
        .with_context(|| format!("error creating temp file {:?}", path.display().to_string()))?;
    file.write_all(source.as_bytes())
        .with_context(|| format!("error writing temp file {:?}", path.display().to_string()))?;
    Ok(())
}

/// Makes toolchain output independent of where the workspace lives
///
/// Every mention of the real source path becomes [`DISPLAY_NAME`], and the
/// header `go build` prints for file arguments is dropped.
pub fn rewrite_diagnostics(output: &str, source_path: &Path) -> String {
    let real = source_path.to_string_lossy();
    output
        .replace(real.as_ref(), DISPLAY_NAME)
        .replacen(TOOLCHAIN_PREAMBLE, "", 1)
}
