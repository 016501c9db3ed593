//! Dev-server process supervision.
//!
//! `ProcessSupervisor::start` spawns `<pm> run <script> -- --port P`
//! and polls the port until it accepts connections, the process exits, or
//! the startup window elapses. A background monitor task owns the child so
//! that early exits are observed as soon as they happen rather than on the
//! next poll.

use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ProjectError, ServerError};
use crate::port::is_accepting;
use crate::process::{
    capture_output, display_command, kill_and_reap, kill_group, managed_command, terminate_group,
};
use crate::project::ProjectHandle;
use crate::util::{DEFAULT_OUTPUT_LIMIT, OutputTail};

/// Output fragments dev servers print when they lose a bind race.
const ADDRESS_IN_USE_MARKERS: &[&str] = &["eaddrinuse", "address already in use", "is already in use"];

/// How long to wait for output readers after the dev server is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub package_manager: String,
    /// Manifest script that runs the server: `dev`, or `preview` for a
    /// production build.
    pub script: String,
    /// Interface the dev server is asked to bind.
    pub host: String,
    /// Appended after `--port P --host H`.
    pub extra_args: Vec<String>,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on stop.
    pub stop_grace: Duration,
    pub output_limit: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            package_manager: "npm".to_string(),
            script: "dev".to_string(),
            host: "0.0.0.0".to_string(),
            extra_args: vec!["--strictPort".to_string()],
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
            stop_grace: Duration::from_secs(3),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

/// Lifecycle of a supervised dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Listening,
    Terminated,
}

/// Exit status reported by the monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessExit {
    code: Option<i32>,
}

/// A running (or stopped) dev server.
///
/// Dropping the handle kills the process group, so a handle that is simply
/// forgotten never leaves an orphaned server holding its port.
#[derive(Debug)]
pub struct ServerHandle {
    pid: Option<u32>,
    port: u16,
    local_url: String,
    state: ServerState,
    stop_grace: Duration,
    output: OutputTail,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    kill_tx: Option<oneshot::Sender<()>>,
    readers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_url(&self) -> &str {
        &self.local_url
    }

    /// Current lifecycle state; a process that exited on its own reads as
    /// `Terminated` even before `stop` is called.
    pub fn state(&self) -> ServerState {
        if self.state != ServerState::Terminated && !self.is_running() {
            ServerState::Terminated
        } else {
            self.state
        }
    }

    /// True until the process has been observed to exit.
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Recent dev-server output.
    pub fn output(&self) -> String {
        self.output.contents()
    }

    fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Stop the server: SIGTERM to the process group, then SIGKILL once the
    /// grace period runs out. Stopping a terminated server does nothing.
    pub async fn stop(&mut self) {
        if self.state == ServerState::Terminated {
            return;
        }
        if self.is_running() {
            if let Some(pid) = self.pid {
                info!(pid, port = self.port, "stopping dev server");
                terminate_group(pid);
            }
            let graceful =
                tokio::time::timeout(self.stop_grace, self.exit_rx.wait_for(Option::is_some))
                    .await
                    .is_ok();
            if !graceful {
                warn!(port = self.port, "dev server ignored SIGTERM, killing");
                self.force_kill().await;
            }
        }
        // Stragglers that left the group leader behind.
        if let Some(pid) = self.pid {
            kill_group(pid);
        }
        self.state = ServerState::Terminated;
        self.drain_readers().await;
    }

    async fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if let Some(pid) = self.pid {
            kill_group(pid);
        }
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            self.exit_rx.wait_for(Option::is_some),
        )
        .await;
    }

    async fn drain_readers(&mut self) {
        for reader in self.readers.drain(..) {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                debug!("output reader did not finish in time");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.state == ServerState::Terminated {
            return;
        }
        if let Some(pid) = self.pid {
            kill_group(pid);
        }
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        for reader in &self.readers {
            reader.abort();
        }
        // The monitor reaps the child after the kill request; detach it.
        self.monitor.take();
    }
}

/// Starts dev servers and confirms they are reachable.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn command_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            self.config.script.clone(),
            "--".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--host".to_string(),
            self.config.host.clone(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Launch the dev server on `port` and wait up to `window` for it to
    /// accept connections.
    ///
    /// The process is killed before any error is returned, so a failed start
    /// never leaves anything running.
    pub async fn start(
        &self,
        project: &ProjectHandle,
        port: u16,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<ServerHandle, ServerError> {
        project
            .validate(&self.config.script)
            .map_err(|e| match e {
                ProjectError::MissingScript { script } => {
                    ServerError::ManifestMissingDevScript { script }
                }
                other => ServerError::InvalidProject(other),
            })?;

        if is_accepting(port, self.config.probe_timeout).await {
            return Err(ServerError::PortUnavailable { port });
        }

        let args = self.command_args(port);
        let command_line = display_command(&self.config.package_manager, &args);
        let mut cmd = managed_command(&self.config.package_manager, &args);
        cmd.current_dir(project.root())
            .env("PORT", port.to_string())
            .env("BROWSER", "none");
        let mut child = cmd.spawn().map_err(|source| ServerError::SpawnFailed {
            command: command_line.clone(),
            source,
        })?;

        let pid = child.id();
        info!(pid = ?pid, port, "started {}", command_line);

        let output = OutputTail::new(self.config.output_limit);
        let readers = capture_output(&mut child, &output);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let monitor = tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                Ok(()) = kill_rx => {
                    kill_and_reap(&mut child).await;
                    None
                }
            };
            let _ = exit_tx.send(Some(ProcessExit { code }));
        });

        let mut handle = ServerHandle {
            pid,
            port,
            local_url: format!("http://localhost:{}", port),
            state: ServerState::Starting,
            stop_grace: self.config.stop_grace,
            output,
            exit_rx,
            kill_tx: Some(kill_tx),
            readers,
            monitor: Some(monitor),
        };

        match self.wait_until_listening(&mut handle, window, cancel).await {
            Ok(()) => {
                handle.state = ServerState::Listening;
                info!(port, url = %handle.local_url, "dev server is accepting connections");
                Ok(handle)
            }
            Err(err) => {
                handle.force_kill().await;
                handle.state = ServerState::Terminated;
                handle.drain_readers().await;
                Err(self.refine_error(err, &handle))
            }
        }
    }

    /// Poll at a fixed interval, at most `window / poll_interval` times,
    /// until the port accepts or the process exits.
    async fn wait_until_listening(
        &self,
        handle: &mut ServerHandle,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ServerError> {
        let port = handle.port;
        let max_attempts = poll_attempts(window, self.config.poll_interval);

        for attempt in 1..=max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ServerError::Cancelled),
                // An exit wakes the loop early instead of waiting out the tick.
                _ = handle.exit_rx.changed() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Some(exit) = handle.exit() {
                warn!(port, attempt, exit_code = ?exit.code, "dev server exited during startup");
                return Err(ServerError::ProcessExitedEarly {
                    port,
                    exit_code: exit.code,
                    output: String::new(),
                });
            }
            if is_accepting(port, self.config.probe_timeout).await {
                debug!(port, attempt, "port accepted connection");
                return Ok(());
            }
            debug!(port, attempt, max_attempts, "port not accepting yet");
        }

        warn!(port, max_attempts, "dev server startup timed out");
        Err(ServerError::StartupTimeout { port, waited: window })
    }

    /// Attach captured output to early exits and recognise lost bind races.
    fn refine_error(&self, err: ServerError, handle: &ServerHandle) -> ServerError {
        match err {
            ServerError::ProcessExitedEarly {
                port, exit_code, ..
            } => {
                let output = handle.output();
                if mentions_address_in_use(&output) {
                    ServerError::PortUnavailable { port }
                } else {
                    ServerError::ProcessExitedEarly {
                        port,
                        exit_code,
                        output,
                    }
                }
            }
            other => other,
        }
    }
}

fn poll_attempts(window: Duration, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let attempts = window.as_millis().div_ceil(interval_ms).max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

fn mentions_address_in_use(output: &str) -> bool {
    let lower = output.to_lowercase();
    ADDRESS_IN_USE_MARKERS.iter().any(|m| lower.contains(m))
}
