//! Typed error hierarchy for launchpad.
//!
//! Component enums cover the leaf subsystems:
//! - `ProjectError`: the project directory or its manifest is unusable
//! - `PortError`: no free port in the configured range
//! - `ServerError`: dev-server start failures
//! - `TunnelError`: public tunnel failures (never fatal to a deployment)
//!
//! `DeployError` is the taxonomy the orchestrator works with at the
//! strategy-attempt boundary; every component error converts into it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::deploy::DiagnosticKind;

/// Errors describing a project directory that cannot be deployed as-is.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project directory does not exist: {path}")]
    MissingDirectory { path: PathBuf },

    #[error("package.json not found at {path}")]
    MissingManifest { path: PathBuf },

    #[error("Failed to read manifest at {path}: {source}")]
    UnreadableManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest at {path}: {source}")]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No '{script}' script found in package.json")]
    MissingScript { script: String },
}

/// Errors from the port allocator.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("No available port in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u16 },
}

/// Errors from the process supervisor while starting a dev server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Manifest does not declare a '{script}' script")]
    ManifestMissingDevScript { script: String },

    #[error(transparent)]
    InvalidProject(#[from] ProjectError),

    #[error("Port {port} is already in use")]
    PortUnavailable { port: u16 },

    #[error("Dev server exited before binding port {port} (exit code {exit_code:?}): {output}")]
    ProcessExitedEarly {
        port: u16,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Dev server did not accept connections on port {port} within {}s", waited.as_secs())]
    StartupTimeout { port: u16, waited: Duration },

    #[error("Failed to spawn dev server '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dev server start was cancelled")]
    Cancelled,
}

/// Errors from the tunnel publisher.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Tunnel binary '{binary}' not found on PATH")]
    BinaryNotFound { binary: String },

    #[error("Tunnel did not report a public URL within {}s", waited.as_secs())]
    TunnelTimeout { waited: Duration },

    #[error("Tunnel process exited before reporting a public URL: {output}")]
    ExitedEarly { output: String },

    #[error("Invalid tunnel URL pattern '{pattern}': {source}")]
    InvalidUrlPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to spawn tunnel '{binary}': {source}")]
    SpawnFailed {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tunnel publishing was cancelled")]
    Cancelled,
}

/// Failure of one strategy attempt, as recorded in deployment diagnostics.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Dependency install failed: {0}")]
    InstallFailure(String),

    #[error("Production build failed: {0}")]
    BuildFailure(String),

    #[error("{0}")]
    ProcessExitedEarly(String),

    #[error("{0}")]
    StartupTimeout(String),

    #[error("{0}")]
    PortUnavailable(String),

    #[error("Public tunnel unavailable: {0}")]
    TunnelUnavailable(String),

    #[error("Deployment cancelled")]
    Cancelled,
}

impl DeployError {
    /// Diagnostic category for this error.
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            DeployError::InvalidProject(_) => DiagnosticKind::InvalidProject,
            DeployError::InstallFailure(_) => DiagnosticKind::InstallFailure,
            DeployError::BuildFailure(_) => DiagnosticKind::BuildFailure,
            DeployError::ProcessExitedEarly(_) => DiagnosticKind::ProcessExitedEarly,
            DeployError::StartupTimeout(_) => DiagnosticKind::StartupTimeout,
            DeployError::PortUnavailable(_) => DiagnosticKind::PortUnavailable,
            DeployError::TunnelUnavailable(_) => DiagnosticKind::TunnelUnavailable,
            DeployError::Cancelled => DiagnosticKind::Cancelled,
        }
    }

    /// Only an invalid project or cancellation stops the strategy ladder.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployError::InvalidProject(_) | DeployError::Cancelled)
    }
}

impl From<ProjectError> for DeployError {
    fn from(err: ProjectError) -> Self {
        DeployError::InvalidProject(err.to_string())
    }
}

impl From<PortError> for DeployError {
    fn from(err: PortError) -> Self {
        DeployError::PortUnavailable(err.to_string())
    }
}

impl From<ServerError> for DeployError {
    fn from(err: ServerError) -> Self {
        let message = err.to_string();
        match err {
            ServerError::ManifestMissingDevScript { .. } | ServerError::InvalidProject(_) => {
                DeployError::InvalidProject(message)
            }
            ServerError::PortUnavailable { .. } => DeployError::PortUnavailable(message),
            ServerError::ProcessExitedEarly { .. } | ServerError::SpawnFailed { .. } => {
                DeployError::ProcessExitedEarly(message)
            }
            ServerError::StartupTimeout { .. } => DeployError::StartupTimeout(message),
            ServerError::Cancelled => DeployError::Cancelled,
        }
    }
}

impl From<TunnelError> for DeployError {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::Cancelled => DeployError::Cancelled,
            other => DeployError::TunnelUnavailable(other.to_string()),
        }
    }
}
