use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::strategy::{DeployMode, Strategy};
use crate::project::ManualInstructions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// A server is reachable on `local_url`.
    Success,
    /// Hosting failed (or was cancelled) but the project itself is fine.
    PartialSuccess,
    /// The project directory is not deployable.
    Failed,
}

impl DeploymentStatus {
    /// Process exit code for the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            DeploymentStatus::Success => 0,
            DeploymentStatus::Failed => 1,
            DeploymentStatus::PartialSuccess => 2,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Success => write!(f, "success"),
            DeploymentStatus::PartialSuccess => write!(f, "partial success"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Category of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A stage completed.
    Success,
    InvalidProject,
    InstallFailure,
    BuildFailure,
    ProcessExitedEarly,
    StartupTimeout,
    PortUnavailable,
    TunnelUnavailable,
    Cancelled,
}

impl DiagnosticKind {
    pub fn is_failure(self) -> bool {
        self != DiagnosticKind::Success
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Success => "ok",
            DiagnosticKind::InvalidProject => "invalid project",
            DiagnosticKind::InstallFailure => "install failure",
            DiagnosticKind::BuildFailure => "build failure",
            DiagnosticKind::ProcessExitedEarly => "process exited early",
            DiagnosticKind::StartupTimeout => "startup timeout",
            DiagnosticKind::PortUnavailable => "port unavailable",
            DiagnosticKind::TunnelUnavailable => "tunnel unavailable",
            DiagnosticKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One entry in a deployment's diagnostic trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub strategy: Strategy,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(strategy: Strategy, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            strategy,
            kind,
            message: message.into(),
        }
    }

    pub fn success(strategy: Strategy, message: impl Into<String>) -> Self {
        Self::new(strategy, DiagnosticKind::Success, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.strategy, self.kind, self.message)
    }
}

/// The outcome of one `deploy` call.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub id: Uuid,
    pub project: PathBuf,
    pub status: DeploymentStatus,
    pub local_url: Option<String>,
    pub public_url: Option<String>,
    pub port: Option<u16>,
    pub strategy_used: Strategy,
    pub mode: DeployMode,
    pub manual_instructions: Option<ManualInstructions>,
    /// Every stage outcome in the order it happened.
    pub diagnostics: Vec<Diagnostic>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Success
    }

    pub fn has_diagnostic(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    pub fn diagnostic_kinds(&self) -> Vec<DiagnosticKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }

    /// Diagnostics that record a failure, in order.
    pub fn failures(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.kind.is_failure())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
