//! Child-process plumbing shared by the installer, supervisor and tunnel.
//!
//! Children are spawned in their own process group on Unix so that a package
//! manager and the node process it forks can be signalled together.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::util::OutputTail;

/// How long to wait for output readers after a bounded command is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Build a command with piped output, its own process group, and
/// kill-on-drop so an abandoned handle never leaves a live child behind.
pub fn managed_command(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Render `program args..` for logs and error messages.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawn reader tasks that copy stdout and stderr lines into `tail`.
pub fn capture_output(child: &mut Child, tail: &OutputTail) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        tasks.push(spawn_line_reader(stdout, tail.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(spawn_line_reader(stderr, tail.clone()));
    }
    tasks
}

fn spawn_line_reader<R>(reader: R, tail: OutputTail) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tail.push_line(&line);
        }
    })
}

/// Ask the whole process group led by `pid` to terminate.
pub fn terminate_group(pid: u32) {
    #[cfg(unix)]
    signal_group(pid, libc::SIGTERM);
    #[cfg(not(unix))]
    let _ = pid;
}

/// Forcefully kill the whole process group led by `pid`.
pub fn kill_group(pid: u32) {
    #[cfg(unix)]
    signal_group(pid, libc::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    if pgid <= 0 {
        return;
    }
    // SAFETY: kill(2) with a negative pid only sends a signal to that group.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

/// Kill a child (and its group) and reap it.
pub async fn kill_and_reap(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    let _ = child.kill().await;
}

/// Kills a child's whole process group when dropped.
///
/// `kill_on_drop` only reaches the group leader; this also reaches whatever
/// the leader forked, even when the future waiting on the child is dropped.
#[derive(Debug)]
pub struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    pub fn new(child: &Child) -> Self {
        Self { pid: child.id() }
    }

    /// Hand the group's lifetime over to someone else.
    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_group(pid);
        }
    }
}

/// How a bounded command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The command exited on its own.
    Exited { exit_code: Option<i32> },
    /// The deadline passed and the command was killed.
    TimedOut,
    /// The command could not be started.
    SpawnFailed { error: String },
    Cancelled,
}

/// Run `cmd` to completion, never past `deadline`.
///
/// Output lines are copied into `tail`. On timeout or cancellation the whole
/// process group is killed; once the command is reaped anything it left in
/// its group is killed as well.
pub async fn run_bounded(
    mut cmd: Command,
    command_line: &str,
    deadline: Instant,
    tail: &OutputTail,
    cancel: &CancellationToken,
) -> RunOutcome {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return RunOutcome::TimedOut;
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to spawn {}: {}", command_line, e);
            return RunOutcome::SpawnFailed {
                error: e.to_string(),
            };
        }
    };
    let guard = ProcessGroupGuard::new(&child);
    info!(pid = ?child.id(), "running {}", command_line);
    let readers = capture_output(&mut child, tail);

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            kill_and_reap(&mut child).await;
            RunOutcome::Cancelled
        }
        _ = tokio::time::sleep(remaining) => {
            warn!("{} timed out, killing", command_line);
            kill_and_reap(&mut child).await;
            RunOutcome::TimedOut
        }
        status = child.wait() => match status {
            Ok(status) => RunOutcome::Exited { exit_code: status.code() },
            Err(e) => RunOutcome::SpawnFailed { error: e.to_string() },
        }
    };
    drop(guard);

    for reader in readers {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            debug!("output reader did not finish in time");
        }
    }
    outcome
}

/// True while `pid` exists and is not a zombie.
#[cfg(all(test, unix))]
pub(crate) fn process_alive(pid: i32) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        return stat
            .rsplit_once(')')
            .is_none_or(|(_, rest)| !rest.trim_start().starts_with('Z'));
    }
    // SAFETY: signal 0 only checks that the process exists.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Wait up to `timeout` for `pid` to disappear.
#[cfg(all(test, unix))]
pub(crate) async fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}
