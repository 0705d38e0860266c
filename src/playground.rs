mod compile;
mod package;
mod recorder;
mod runner;
#[cfg(test)]
mod testing;
mod workspace;

pub use compile::{BuildOutcome, Compiler, rewrite_diagnostics};
pub use package::{PackageClauseError, package_name};
pub use recorder::{DecodeError, Event, Recorder, RecorderSink, Stream, decode_frames};
pub use runner::{ExecutionOutcome, Supervisor};
pub use workspace::Workspace;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::config::PlaygroundConfig;

/// Package a submission must declare to be built
pub const ENTRY_PACKAGE: &str = "main";
/// Name shown instead of the real source path in diagnostics
pub const DISPLAY_NAME: &str = "prog.go";

pub const REJECTED_MESSAGE: &str = "package name must be main";
pub const TIMEOUT_MESSAGE: &str = "process took too long";
pub const BUILD_TIMEOUT_MESSAGE: &str = "build took too long";

pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);

const SOURCE_NAME: &str = "main.go";
const ARTIFACT_NAME: &str = "a.out";
const WORKSPACE_PREFIX: &str = "sandbox";
/// Printed by `go build` ahead of diagnostics when given a file argument
const TOOLCHAIN_PREAMBLE: &str = "# command-line-arguments\n";

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Request {
    #[serde(rename = "Body", alias = "body", default)]
    pub body: String,
}

/// Either a problem to show the user or the recorded run, never both
#[derive(Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub errors: String,
    pub events: Vec<Event>,
}

impl Response {
    fn error(text: impl Into<String>) -> Self {
        Self {
            errors: text.into(),
            events: Vec::new(),
        }
    }

    fn events(events: Vec<Event>) -> Self {
        Self {
            errors: String::new(),
            events,
        }
    }
}

/// Compile → run → record pipeline for one submission at a time
///
/// Holds configuration only; concurrent calls share nothing else.
#[derive(Debug, Clone)]
pub struct Playground {
    compiler: Compiler,
    supervisor: Supervisor,
    workspace_root: Option<PathBuf>,
    output_limit: Option<usize>,
}

impl Playground {
    pub fn new(compiler: Compiler, supervisor: Supervisor, workspace_root: Option<PathBuf>) -> Self {
        Self {
            compiler,
            supervisor,
            workspace_root,
            output_limit: None,
        }
    }

    pub fn from_config(config: &PlaygroundConfig) -> Self {
        Self::new(
            Compiler::from_config(config),
            Supervisor::new(config.run_time_limit.into()),
            config.workspace_root.clone(),
        )
        .with_output_limit(config.output_limit)
    }

    /// Caps the program output kept per run; `None` keeps all of it
    pub fn with_output_limit(mut self, limit: Option<usize>) -> Self {
        self.output_limit = limit;
        self
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Builds and runs `req.body`
    ///
    /// `Ok` carries everything the submitter should see: a rejection, compile
    /// errors, a timeout, or the recorded events. `Err` means the service itself
    /// failed and the detail must not reach the submitter.
    pub async fn compile_and_run(&self, req: &Request) -> Result<Response> {
        let root = self.workspace_root.clone();
        let mut workspace = task::spawn_blocking(move || match root {
            Some(root) => Workspace::acquire_in(root),
            None => Workspace::acquire(),
        })
        .await
        .context("error joining workspace setup")??;

        let result = self.build_and_run(&workspace, &req.body).await;

        let released = task::spawn_blocking(move || workspace.release())
            .await
            .context("error joining workspace cleanup");
        if let Err(e) = released.and_then(|r| r) {
            log::warn!("{e:#}");
        }
        result
    }

    async fn build_and_run(&self, workspace: &Workspace, source: &str) -> Result<Response> {
        let executable = match self.compiler.build(workspace, source).await? {
            BuildOutcome::Built(path) => path,
            BuildOutcome::Rejected(reason) => return Ok(Response::error(reason)),
            BuildOutcome::CompileFailed(diagnostics) => return Ok(Response::error(diagnostics)),
            BuildOutcome::TimedOut => return Ok(Response::error(BUILD_TIMEOUT_MESSAGE)),
            BuildOutcome::ToolchainFault(e) => return Err(e.context("error building go source")),
        };

        let recorder = match self.output_limit {
            Some(limit) => Recorder::with_limit(limit),
            None => Recorder::new(),
        };
        match self.supervisor.run(&executable, &recorder).await {
            ExecutionOutcome::Completed(status) => {
                log::debug!("Program completed with {status}");
            }
            ExecutionOutcome::TimedOut => return Ok(Response::error(TIMEOUT_MESSAGE)),
            ExecutionOutcome::Faulted(e) => return Err(e.context("error running sandbox")),
        }

        if recorder.is_clipped() {
            log::info!("Program output clipped at {:?} bytes", self.output_limit);
        }
        let events = recorder.events().context("error decoding events")?;
        Ok(Response::events(events))
    }
}
