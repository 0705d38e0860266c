use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::{self, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::recorder::{Recorder, RecorderSink};

/// Search path handed to the program; nothing else is inherited
const RUN_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How long output readers may keep draining after the program is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 32 * 1024;

/// Terminal state of one supervised run
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The program exited on its own, whatever its status
    Completed(ExitStatus),
    /// The program could not be started, waited on or captured
    Faulted(anyhow::Error),
    /// The deadline elapsed and the program was killed
    TimedOut,
}

/// How a child process left the process table
#[derive(Debug)]
pub(crate) enum ProcessExit {
    Exited(ExitStatus),
    WaitFailed(io::Error),
    TimedOut,
}

/// Races a child's exit against `deadline`
///
/// The child must lead its own process group. Whatever wins, the group is
/// killed while the leader is still unreaped, so its pid cannot have been handed
/// to an unrelated process yet. On every path other than a natural exit the
/// child itself is also killed before it is reaped. If the returned future is
/// dropped part way, the group is killed on drop.
pub(crate) async fn wait_with_deadline(child: &mut Child, deadline: Duration) -> ProcessExit {
    let Some(pid) = child.id() else {
        // Reaped by an earlier wait; there is no group left to race.
        return match child.wait().await {
            Ok(status) => ProcessExit::Exited(status),
            Err(e) => ProcessExit::WaitFailed(e),
        };
    };
    let group = GroupKill::new(pid);

    let race = match timeout(deadline, task::spawn_blocking(move || wait_exited(pid))).await {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(e))) => Some(ProcessExit::WaitFailed(e)),
        Ok(Err(e)) => Some(ProcessExit::WaitFailed(io::Error::other(e))),
        Err(_) => Some(ProcessExit::TimedOut),
    };

    group.kill();

    match race {
        None => match child.wait().await {
            Ok(status) => ProcessExit::Exited(status),
            Err(e) => ProcessExit::WaitFailed(e),
        },
        Some(ProcessExit::TimedOut) => match terminate(child).await {
            Ok(()) => ProcessExit::TimedOut,
            Err(e) => ProcessExit::WaitFailed(e),
        },
        Some(exit) => {
            if let Err(e) = terminate(child).await {
                log::warn!("Failed to reclaim process after wait error: {e}");
            }
            exit
        }
    }
}

/// Kills `child` and reaps it
///
/// Safe to call on a child that has already exited and been waited on.
pub(crate) async fn terminate(child: &mut Child) -> io::Result<()> {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    // Fails only when the child was already reaped; the wait below still succeeds.
    let _ = child.start_kill();
    let status = child.wait().await?;
    log::debug!("Reclaimed child process ({status})");
    Ok(())
}

/// Blocks until `pid` has exited, leaving it unreaped
fn wait_exited(pid: u32) -> io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data and all-zero is a valid value.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `info` outlives the call; WNOWAIT leaves the zombie for `Child::wait`.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Kills a process group when dropped, unless [`GroupKill::kill`] ran first
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: u32) -> Self {
        Self { pgid: Some(pgid) }
    }

    fn kill(mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            log::debug!("Wait abandoned, killing process group {pgid}");
            kill_group(pgid);
        }
    }
}

/// Sends SIGKILL to every process in group `pgid`
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers; a negative pid addresses a process group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("Failed to kill process group {pgid}: {err}");
        }
    }
}

/// Runs built programs under a wall-clock deadline
#[derive(Debug, Clone)]
pub struct Supervisor {
    deadline: Duration,
}

impl Supervisor {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Runs `executable` with its output streams attached to `recorder`
    ///
    /// The program gets an empty environment apart from `PATH`, no stdin, and its
    /// own process group. It runs in the directory that contains it.
    pub async fn run(&self, executable: &Path, recorder: &Recorder) -> ExecutionOutcome {
        let mut cmd = Command::new(executable);
        cmd.env_clear()
            .env("PATH", RUN_PATH)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = executable.parent() {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome::Faulted(
                    anyhow!(e).context(format!("error starting {}", executable.display())),
                );
            }
        };

        let token = CancellationToken::new();
        let mut pumps = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.spawn(pump(stdout, recorder.stdout(), token.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.spawn(pump(stderr, recorder.stderr(), token.clone()));
        }

        let exit = wait_with_deadline(&mut child, self.deadline).await;
        let drained = drain(&mut pumps, &token).await;

        match exit {
            ProcessExit::Exited(status) => {
                log::debug!("{} exited with {status}", executable.display());
                match drained {
                    Ok(()) => ExecutionOutcome::Completed(status),
                    Err(e) => ExecutionOutcome::Faulted(e),
                }
            }
            ProcessExit::WaitFailed(e) => ExecutionOutcome::Faulted(
                anyhow!(e).context(format!("error waiting for {}", executable.display())),
            ),
            ProcessExit::TimedOut => {
                log::debug!(
                    "{} killed after {:?}",
                    executable.display(),
                    self.deadline
                );
                ExecutionOutcome::TimedOut
            }
        }
    }
}

/// Copies one output stream into its sink until EOF or cancellation
async fn pump<R>(mut src: R, mut sink: RecorderSink, token: CancellationToken) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    use std::io::Write;

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            _ = token.cancelled() => break,
            n = src.read(&mut buf) => n?,
        };
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])?;
    }
    Ok(())
}

/// Waits for the output readers, cutting them off after [`DRAIN_GRACE`]
async fn drain(pumps: &mut JoinSet<io::Result<()>>, token: &CancellationToken) -> Result<()> {
    let joined = timeout(DRAIN_GRACE, async {
        let mut first_err = None;
        while let Some(res) = pumps.join_next().await {
            let err = match res {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => anyhow!(e),
                Err(e) => anyhow!(e),
            };
            first_err.get_or_insert(err);
        }
        first_err.map_or(Ok(()), Err)
    })
    .await;

    match joined {
        Ok(res) => res.context("error capturing program output"),
        Err(_) => {
            log::warn!("Output still open {DRAIN_GRACE:?} after exit, capture cut short");
            token.cancel();
            while pumps.join_next().await.is_some() {}
            Ok(())
        }
    }
}
