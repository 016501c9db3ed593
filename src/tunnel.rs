//! Best-effort public tunnel for a locally bound port.
//!
//! The tunnel binary (ngrok by default) is spawned in its own process group.
//! Its public URL is discovered from whichever source answers first: a line
//! of its stdout matching `url_pattern`, or the local control API.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::TunnelError;
use crate::process::{
    ProcessGroupGuard, capture_output, display_command, kill_and_reap, kill_group,
    managed_command, terminate_group,
};
use crate::util::{DEFAULT_OUTPUT_LIMIT, OutputTail};

pub const DEFAULT_URL_PATTERN: &str =
    r"https://[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.ngrok(-free)?\.(app|dev|io)";

/// Per-request timeout for the control API.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Time given to the tunnel to exit on SIGTERM before it is killed.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub enabled: bool,
    pub binary: String,
    /// `{port}` is replaced with the local port.
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Local control API listing active tunnels. `None` disables polling.
    pub api_url: Option<String>,
    pub api_poll_interval: Duration,
    pub url_pattern: String,
    pub output_limit: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "ngrok".to_string(),
            args: vec![
                "http".to_string(),
                "{port}".to_string(),
                "--log=stdout".to_string(),
                "--log-format=json".to_string(),
            ],
            timeout: Duration::from_secs(10),
            api_url: Some("http://127.0.0.1:4040/api/tunnels".to_string()),
            api_poll_interval: Duration::from_secs(1),
            url_pattern: DEFAULT_URL_PATTERN.to_string(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Pending,
    Active,
    Failed,
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    public_url: String,
    #[serde(default)]
    config: Option<TunnelInfoConfig>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfoConfig {
    #[serde(default)]
    addr: Option<String>,
}

/// A tunnel forwarding to a local port. It does not own the server behind
/// that port; tearing it down leaves the server alone.
#[derive(Debug)]
pub struct TunnelHandle {
    public_url: Option<String>,
    port: u16,
    state: TunnelState,
    pid: Option<u32>,
    child: Option<Child>,
}

impl TunnelHandle {
    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Re-check the tunnel process; an exited process marks the tunnel failed.
    pub fn refresh_state(&mut self) -> TunnelState {
        if self.state == TunnelState::Active
            && let Some(child) = self.child.as_mut()
            && !matches!(child.try_wait(), Ok(None))
        {
            warn!(port = self.port, "tunnel process exited");
            self.state = TunnelState::Failed;
        }
        self.state
    }

    /// Terminate the tunnel process. Safe to call more than once.
    pub async fn teardown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Some(pid) = self.pid {
            info!(pid, port = self.port, "tearing down tunnel");
            terminate_group(pid);
        }
        if tokio::time::timeout(TEARDOWN_GRACE, child.wait()).await.is_err() {
            kill_and_reap(&mut child).await;
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if self.child.is_some()
            && let Some(pid) = self.pid
        {
            kill_group(pid);
        }
    }
}

/// Spawns tunnels and waits for their public URL.
#[derive(Debug, Clone)]
pub struct TunnelPublisher {
    config: TunnelConfig,
    client: reqwest::Client,
}

impl TunnelPublisher {
    pub fn new(config: TunnelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(API_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// True if the tunnel binary can be found.
    pub fn binary_available(&self) -> bool {
        which::which(&self.config.binary).is_ok()
    }

    /// Publish `port`, waiting at most the configured timeout for a URL.
    pub async fn publish(
        &self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle, TunnelError> {
        let binary = which::which(&self.config.binary).map_err(|_| TunnelError::BinaryNotFound {
            binary: self.config.binary.clone(),
        })?;
        let pattern =
            Regex::new(&self.config.url_pattern).map_err(|source| TunnelError::InvalidUrlPattern {
                pattern: self.config.url_pattern.clone(),
                source,
            })?;

        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|a| a.replace("{port}", &port.to_string()))
            .collect();
        let program = binary.to_string_lossy().to_string();
        let mut child =
            managed_command(&program, &args)
                .spawn()
                .map_err(|source| TunnelError::SpawnFailed {
                    binary: self.config.binary.clone(),
                    source,
                })?;
        let mut guard = ProcessGroupGuard::new(&child);
        let pid = child.id();
        info!(pid = ?pid, port, "started {}", display_command(&self.config.binary, &args));

        let mut handle = TunnelHandle {
            public_url: None,
            port,
            state: TunnelState::Pending,
            pid,
            child: None,
        };

        let tail = OutputTail::new(self.config.output_limit);
        let (url_tx, mut url_rx) = mpsc::channel::<String>(1);
        if let Some(stdout) = child.stdout.take() {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tail.push_line(&line);
                    if let Some(m) = pattern.find(&line) {
                        let _ = url_tx.try_send(m.as_str().to_string());
                    }
                }
            });
        }
        let _stderr_reader = capture_output(&mut child, &tail);

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let mut api_tick = tokio::time::interval(self.config.api_poll_interval);
        let poll_api = self.config.api_url.is_some();

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(TunnelError::Cancelled),
                _ = &mut deadline => break Err(TunnelError::TunnelTimeout { waited: self.config.timeout }),
                Some(url) = url_rx.recv() => {
                    debug!(port, "tunnel URL found in output");
                    break Ok(url);
                }
                _ = child.wait() => {
                    break Err(TunnelError::ExitedEarly { output: tail.contents() });
                }
                _ = api_tick.tick(), if poll_api => {
                    if let Some(url) = self.query_api(port).await {
                        debug!(port, "tunnel URL found via control API");
                        break Ok(url);
                    }
                }
            }
        };

        match outcome {
            Ok(url) => {
                info!(port, url = %url, "tunnel active");
                handle.public_url = Some(url);
                handle.state = TunnelState::Active;
                handle.child = Some(child);
                guard.disarm();
                Ok(handle)
            }
            Err(err) => {
                warn!(port, error = %err, "tunnel failed");
                kill_and_reap(&mut child).await;
                handle.state = TunnelState::Failed;
                Err(err)
            }
        }
    }

    /// Ask the control API for an https tunnel forwarding to `port`.
    async fn query_api(&self, port: u16) -> Option<String> {
        let url = self.config.api_url.as_deref()?;
        let response = self.client.get(url).send().await.ok()?;
        let list: TunnelList = response.json().await.ok()?;
        let port_suffix = format!(":{}", port);
        list.tunnels
            .into_iter()
            .filter(|t| t.public_url.starts_with("https://"))
            .find(|t| {
                t.config
                    .as_ref()
                    .and_then(|c| c.addr.as_deref())
                    .is_none_or(|addr| addr.ends_with(&port_suffix))
            })
            .map(|t| t.public_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Instant;
    use tempfile::tempdir;

    fn create_test_script(dir: &Path, name: &str, content: &str) -> PathBuf {
        let script_path = dir.join(name);
        fs::write(&script_path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms).unwrap();
        }
        script_path
    }

    fn publisher(binary: &Path, timeout: Duration) -> TunnelPublisher {
        TunnelPublisher::new(TunnelConfig {
            binary: binary.to_string_lossy().to_string(),
            timeout,
            api_url: None,
            ..TunnelConfig::default()
        })
    }

    #[test]
    fn test_default_pattern_matches_ngrok_urls() {
        let re = Regex::new(DEFAULT_URL_PATTERN).unwrap();
        let line = r#"{"lvl":"info","msg":"started tunnel","url":"https://a1b2-203-0-113-5.ngrok-free.app"}"#;
        assert_eq!(
            re.find(line).unwrap().as_str(),
            "https://a1b2-203-0-113-5.ngrok-free.app"
        );
        assert!(re.find("http://localhost:3000").is_none());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let p = publisher(Path::new("/nonexistent/ngrok"), Duration::from_secs(1));
        assert!(!p.binary_available());
        let err = p.publish(3000, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TunnelError::BinaryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_url_from_stdout() {
        let dir = tempdir().unwrap();
        let bin = create_test_script(
            dir.path(),
            "tunnel.sh",
            "#!/bin/sh\necho \"{\\\"msg\\\":\\\"started tunnel\\\",\\\"url\\\":\\\"https://demo-$2.ngrok-free.app\\\"}\"\nsleep 30\n",
        );
        let p = publisher(&bin, Duration::from_secs(5));

        let mut handle = p.publish(4321, &CancellationToken::new()).await.unwrap();
        assert_eq!(handle.state(), TunnelState::Active);
        assert_eq!(handle.public_url(), Some("https://demo-4321.ngrok-free.app"));
        assert_eq!(handle.refresh_state(), TunnelState::Active);

        handle.teardown().await;
        // Repeated teardown is harmless.
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_url_from_control_api() {
        let dir = tempdir().unwrap();
        let bin = create_test_script(dir.path(), "tunnel.sh", "#!/bin/sh\nsleep 30\n");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_port = listener.local_addr().unwrap().port();
        let app = axum::Router::new().route(
            "/api/tunnels",
            axum::routing::get(|| async {
                axum::Json(serde_json::json!({
                    "tunnels": [
                        {"public_url": "https://other.ngrok-free.app", "config": {"addr": "http://localhost:9999"}},
                        {"public_url": "https://mine.ngrok-free.app", "config": {"addr": "http://localhost:4322"}}
                    ]
                }))
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let p = TunnelPublisher::new(TunnelConfig {
            binary: bin.to_string_lossy().to_string(),
            timeout: Duration::from_secs(5),
            api_url: Some(format!("http://127.0.0.1:{}/api/tunnels", api_port)),
            api_poll_interval: Duration::from_millis(100),
            ..TunnelConfig::default()
        });

        let mut handle = p.publish(4322, &CancellationToken::new()).await.unwrap();
        assert_eq!(handle.public_url(), Some("https://mine.ngrok-free.app"));
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_timeout_without_url() {
        let dir = tempdir().unwrap();
        let bin = create_test_script(dir.path(), "tunnel.sh", "#!/bin/sh\nsleep 30\n");
        let p = publisher(&bin, Duration::from_millis(500));

        let started = Instant::now();
        let err = p.publish(3000, &CancellationToken::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, TunnelError::TunnelTimeout { .. }));
    }

    #[tokio::test]
    async fn test_tunnel_exits_early() {
        let dir = tempdir().unwrap();
        let bin = create_test_script(
            dir.path(),
            "tunnel.sh",
            "#!/bin/sh\necho 'ERR_NGROK_4018: authentication failed' >&2\nexit 1\n",
        );
        let p = publisher(&bin, Duration::from_secs(5));

        let err = p.publish(3000, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TunnelError::ExitedEarly { .. }));
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let dir = tempdir().unwrap();
        let bin = create_test_script(dir.path(), "tunnel.sh", "#!/bin/sh\nsleep 30\n");
        let p = TunnelPublisher::new(TunnelConfig {
            binary: bin.to_string_lossy().to_string(),
            url_pattern: "https://(".to_string(),
            ..TunnelConfig::default()
        });
        let err = p.publish(3000, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TunnelError::InvalidUrlPattern { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_publish_kills_forked_children() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("agent.pid");
        let bin = create_test_script(
            dir.path(),
            "tunnel.sh",
            &format!(
                "#!/bin/sh\nsleep 60 &\necho $! > {}\nwait\n",
                pid_file.display()
            ),
        );
        let p = publisher(&bin, Duration::from_secs(30));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(500),
            p.publish(3000, &CancellationToken::new()),
        )
        .await;
        assert!(abandoned.is_err(), "publish should still be waiting");

        let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(
            crate::process::wait_for_exit(pid, Duration::from_secs(3)).await,
            "tunnel's background child outlived the dropped publish"
        );
    }
}
