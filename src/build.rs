//! Production builds.
//!
//! A production deployment runs `<pm> run <build script>` once, bounded by a
//! timeout, before the preview server is supervised. The build counts as
//! successful only when it exits cleanly and its output directory exists.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::process::{RunOutcome, display_command, managed_command, run_bounded};
use crate::project::ProjectHandle;
use crate::util::{DEFAULT_OUTPUT_LIMIT, OutputTail, format_secs};

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub package_manager: String,
    /// Manifest script that produces the build.
    pub script: String,
    /// Directory the build writes, relative to the project root.
    pub output_dir: String,
    pub timeout: Duration,
    pub output_limit: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            package_manager: "npm".to_string(),
            script: "build".to_string(),
            output_dir: "dist".to_string(),
            timeout: Duration::from_secs(180),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

/// Result of one build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub diagnostic: String,
}

/// Runs a project's build script.
#[derive(Debug, Clone)]
pub struct Builder {
    config: BuildConfig,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn output_present(&self, project: &ProjectHandle) -> bool {
        project.root().join(Path::new(&self.config.output_dir)).is_dir()
    }

    /// Build `project`, never running past the configured timeout.
    pub async fn build(&self, project: &ProjectHandle, cancel: &CancellationToken) -> BuildResult {
        let started = Instant::now();
        let args = vec!["run".to_string(), self.config.script.clone()];
        let command_line = display_command(&self.config.package_manager, &args);

        let mut cmd = managed_command(&self.config.package_manager, &args);
        cmd.current_dir(project.root()).env("NODE_ENV", "production");

        let tail = OutputTail::new(self.config.output_limit);
        let outcome = run_bounded(
            cmd,
            &command_line,
            started + self.config.timeout,
            &tail,
            cancel,
        )
        .await;

        let success = outcome == RunOutcome::Exited { exit_code: Some(0) }
            && self.output_present(project);
        let diagnostic = if success {
            format!("{} produced {}", command_line, self.config.output_dir)
        } else {
            self.failure_diagnostic(&command_line, &outcome, &tail.contents())
        };

        let result = BuildResult {
            success,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            diagnostic,
        };
        info!(
            success = result.success,
            duration_ms = result.duration_ms,
            "build finished"
        );
        result
    }

    fn failure_diagnostic(&self, command_line: &str, outcome: &RunOutcome, output: &str) -> String {
        let headline = match outcome {
            RunOutcome::TimedOut => format!(
                "{} timed out after {}",
                command_line,
                format_secs(self.config.timeout)
            ),
            RunOutcome::Exited {
                exit_code: Some(0),
            } => format!(
                "{} exited cleanly but {} is missing",
                command_line, self.config.output_dir
            ),
            RunOutcome::Exited { exit_code } => format!(
                "{} exited with code {}",
                command_line,
                exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
            ),
            RunOutcome::SpawnFailed { error } => {
                format!("failed to run {}: {}", self.config.package_manager, error)
            }
            RunOutcome::Cancelled => "build cancelled".to_string(),
        };
        if output.is_empty() {
            headline
        } else {
            format!("{}\n{}", headline, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn create_test_script(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
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

    fn project() -> (TempDir, ProjectHandle) {
        let dir = tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("package.json"), r#"{"scripts": {"build": "vite build"}}"#).unwrap();
        (dir, ProjectHandle::new(app))
    }

    fn builder_with(pm: &Path, timeout: Duration) -> Builder {
        Builder::new(BuildConfig {
            package_manager: pm.to_string_lossy().to_string(),
            timeout,
            ..BuildConfig::default()
        })
    }

    #[tokio::test]
    async fn test_build_writes_output_dir() {
        let (dir, project) = project();
        let pm = create_test_script(
            dir.path(),
            "pm.sh",
            "#!/bin/sh\n[ \"$1 $2\" = \"run build\" ] || exit 9\n[ \"$NODE_ENV\" = production ] || exit 8\nmkdir -p dist\n",
        );
        let result = builder_with(&pm, Duration::from_secs(5))
            .build(&project, &CancellationToken::new())
            .await;
        assert!(result.success, "{}", result.diagnostic);
        assert_eq!(result.outcome, RunOutcome::Exited { exit_code: Some(0) });
        assert!(result.diagnostic.contains("produced dist"));
    }

    #[tokio::test]
    async fn test_failed_build_reports_exit_code_and_output() {
        let (dir, project) = project();
        let pm = create_test_script(
            dir.path(),
            "pm.sh",
            "#!/bin/sh\necho 'error TS2322: bad type' >&2\nexit 2\n",
        );
        let result = builder_with(&pm, Duration::from_secs(5))
            .build(&project, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.diagnostic.contains("exited with code 2"));
        assert!(result.diagnostic.contains("TS2322"));
    }

    #[tokio::test]
    async fn test_clean_exit_without_output_dir_is_failure() {
        let (dir, project) = project();
        let pm = create_test_script(dir.path(), "pm.sh", "#!/bin/sh\nexit 0\n");
        let result = builder_with(&pm, Duration::from_secs(5))
            .build(&project, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.diagnostic.contains("dist is missing"));
    }

    #[tokio::test]
    async fn test_build_timeout_is_bounded() {
        let (dir, project) = project();
        let pm = create_test_script(dir.path(), "pm.sh", "#!/bin/sh\nsleep 30\n");
        let started = Instant::now();
        let result = builder_with(&pm, Duration::from_millis(300))
            .build(&project, &CancellationToken::new())
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert_eq!(result.outcome, RunOutcome::TimedOut);
        assert!(result.diagnostic.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_build() {
        let (dir, project) = project();
        let pm = create_test_script(dir.path(), "pm.sh", "#!/bin/sh\nsleep 30\n");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = builder_with(&pm, Duration::from_secs(30))
            .build(&project, &cancel)
            .await;
        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert!(!result.success);
    }
}
