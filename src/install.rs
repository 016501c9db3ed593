//! Dependency installation with structural success detection.
//!
//! Package managers routinely exit non-zero on peer-dependency warnings while
//! still producing a usable tree, so success is decided by looking at the
//! dependency directory rather than by trusting the exit code:
//!
//! 1. Run `<pm> install <profile args>` in the project root, bounded by the
//!    profile timeout.
//! 2. If it exited without producing the dev-server executable, run the
//!    profile's retry arguments with whatever time is left.
//! 3. Success ⇔ `<dependency_dir>/.bin/<dev binary>` exists.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::process::{RunOutcome, display_command, managed_command, run_bounded};
use crate::project::ProjectHandle;
use crate::util::{DEFAULT_OUTPUT_LIMIT, OutputTail, format_secs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// No special flags, long timeout.
    Thorough,
    /// Cache-first resolution, no audit, short timeout.
    Fast,
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::Thorough => write!(f, "thorough"),
            ProfileKind::Fast => write!(f, "fast"),
        }
    }
}

/// Installer flags and time budget for one strategy.
#[derive(Debug, Clone)]
pub struct InstallProfile {
    pub kind: ProfileKind,
    pub args: Vec<String>,
    /// Run once more with these args if the first run exited without
    /// producing a usable tree. Shares the same timeout budget.
    pub retry_args: Option<Vec<String>>,
    pub timeout: Duration,
    /// Return success without spawning anything when dependencies are
    /// already in place.
    pub skip_when_ready: bool,
}

impl InstallProfile {
    pub fn thorough() -> Self {
        Self {
            kind: ProfileKind::Thorough,
            args: Vec::new(),
            retry_args: Some(vec!["--force".to_string()]),
            timeout: Duration::from_secs(300),
            skip_when_ready: false,
        }
    }

    pub fn fast() -> Self {
        Self {
            kind: ProfileKind::Fast,
            args: vec![
                "--prefer-offline".to_string(),
                "--no-audit".to_string(),
                "--no-fund".to_string(),
            ],
            retry_args: Some(vec!["--offline".to_string(), "--no-audit".to_string()]),
            timeout: Duration::from_secs(120),
            skip_when_ready: true,
        }
    }
}

/// How the installer run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    /// Dependencies were already present; nothing was spawned.
    AlreadyInstalled,
    /// The package manager exited on its own.
    Exited { exit_code: Option<i32> },
    /// The time budget ran out and the package manager was killed.
    TimedOut,
    /// The package manager could not be started.
    SpawnFailed { error: String },
    Cancelled,
}

impl From<RunOutcome> for InstallOutcome {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Exited { exit_code } => InstallOutcome::Exited { exit_code },
            RunOutcome::TimedOut => InstallOutcome::TimedOut,
            RunOutcome::SpawnFailed { error } => InstallOutcome::SpawnFailed { error },
            RunOutcome::Cancelled => InstallOutcome::Cancelled,
        }
    }
}

/// Result of one install attempt.
#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub profile: ProfileKind,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: InstallOutcome,
    pub diagnostic: String,
}

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub package_manager: String,
    pub dependency_dir: String,
    /// Manifest script whose executable must exist after install.
    pub dev_script: String,
    /// Explicit dev-server executable; derived from the dev script if unset.
    pub dev_binary: Option<String>,
    pub output_limit: usize,
    pub thorough: InstallProfile,
    pub fast: InstallProfile,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            package_manager: "npm".to_string(),
            dependency_dir: "node_modules".to_string(),
            dev_script: "dev".to_string(),
            dev_binary: None,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            thorough: InstallProfile::thorough(),
            fast: InstallProfile::fast(),
        }
    }
}

/// Runs the package manager against a project directory.
#[derive(Debug, Clone)]
pub struct Installer {
    config: InstallerConfig,
}

impl Installer {
    pub fn new(config: InstallerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    pub fn profile(&self, kind: ProfileKind) -> &InstallProfile {
        match kind {
            ProfileKind::Thorough => &self.config.thorough,
            ProfileKind::Fast => &self.config.fast,
        }
    }

    /// The executable whose presence marks a usable install.
    pub fn expected_binary(&self, project: &ProjectHandle) -> String {
        if let Some(ref binary) = self.config.dev_binary {
            return binary.clone();
        }
        project
            .manifest()
            .ok()
            .and_then(|m| m.script_binary(&self.config.dev_script))
            .unwrap_or_else(|| "vite".to_string())
    }

    pub fn is_ready(&self, project: &ProjectHandle) -> bool {
        project.dependencies_ready(&self.config.dependency_dir, &self.expected_binary(project))
    }

    /// Install dependencies using `profile`, never running past its timeout.
    pub async fn install(
        &self,
        project: &ProjectHandle,
        profile: &InstallProfile,
        cancel: &CancellationToken,
    ) -> InstallResult {
        let started = Instant::now();
        let deadline = started + profile.timeout;
        let binary = self.expected_binary(project);
        let expected = format!("{}/.bin/{}", self.config.dependency_dir, binary);

        if profile.skip_when_ready && self.is_ready(project) {
            info!(profile = %profile.kind, "dependencies already installed, skipping install");
            return InstallResult {
                profile: profile.kind,
                success: true,
                duration_ms: elapsed_ms(started),
                outcome: InstallOutcome::AlreadyInstalled,
                diagnostic: format!("{} already present", expected),
            };
        }

        let tail = OutputTail::new(self.config.output_limit);
        let mut outcome = self
            .run_once(project, &profile.args, deadline, &tail, cancel)
            .await;

        if matches!(outcome, InstallOutcome::Exited { .. })
            && !self.is_ready(project)
            && let Some(ref retry_args) = profile.retry_args
        {
            warn!(
                profile = %profile.kind,
                "install finished without {}, retrying with {:?}",
                expected,
                retry_args
            );
            outcome = self
                .run_once(project, retry_args, deadline, &tail, cancel)
                .await;
        }

        let success = outcome != InstallOutcome::Cancelled
            && project.dependencies_ready(&self.config.dependency_dir, &binary);
        let output = tail.contents();
        let diagnostic = if success {
            match outcome {
                InstallOutcome::Exited {
                    exit_code: Some(code),
                } if code != 0 => format!(
                    "{} install exited with code {} but {} is present",
                    self.config.package_manager, code, expected
                ),
                _ => format!("dependencies installed ({} present)", expected),
            }
        } else {
            self.failure_diagnostic(profile, &outcome, &expected, &output)
        };

        let result = InstallResult {
            profile: profile.kind,
            success,
            duration_ms: elapsed_ms(started),
            outcome,
            diagnostic,
        };
        info!(
            profile = %profile.kind,
            success = result.success,
            duration_ms = result.duration_ms,
            "install finished"
        );
        result
    }

    fn failure_diagnostic(
        &self,
        profile: &InstallProfile,
        outcome: &InstallOutcome,
        expected: &str,
        output: &str,
    ) -> String {
        let headline = match outcome {
            InstallOutcome::TimedOut => format!(
                "{} install timed out after {} ({} profile)",
                self.config.package_manager,
                format_secs(profile.timeout),
                profile.kind
            ),
            InstallOutcome::Exited { exit_code } => format!(
                "{} install exited with code {} and {} is missing",
                self.config.package_manager,
                exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                expected
            ),
            InstallOutcome::SpawnFailed { error } => format!(
                "failed to run {}: {}",
                self.config.package_manager, error
            ),
            InstallOutcome::Cancelled => "install cancelled".to_string(),
            InstallOutcome::AlreadyInstalled => format!("{} missing", expected),
        };
        if output.is_empty() {
            headline
        } else {
            format!("{}\n{}", headline, output)
        }
    }

    async fn run_once(
        &self,
        project: &ProjectHandle,
        args: &[String],
        deadline: Instant,
        tail: &OutputTail,
        cancel: &CancellationToken,
    ) -> InstallOutcome {
        let mut full_args = vec!["install".to_string()];
        full_args.extend(args.iter().cloned());
        let command_line = display_command(&self.config.package_manager, &full_args);

        let mut cmd = managed_command(&self.config.package_manager, &full_args);
        cmd.current_dir(project.root());
        run_bounded(cmd, &command_line, deadline, tail, cancel)
            .await
            .into()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
