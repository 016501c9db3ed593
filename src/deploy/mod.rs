//! Deployment orchestration.
//!
//! A deployment walks the strategy ladder, strongest first:
//!
//! 1. **Full**: thorough install, long startup window, best-effort tunnel.
//! 2. **Fast**: fast install, short startup window, local only.
//! 3. **Manual**: nothing is started; the result carries the commands.
//!
//! In production mode both automatic strategies run the build script after
//! installing and supervise the preview script instead of the dev script.
//!
//! Each strategy runs at most once. Any failure other than an invalid
//! project or cancellation is recorded as a diagnostic and moves the
//! deployment to the next strategy, so the caller always receives a
//! [`DeploymentResult`] rather than an error.

pub mod result;
pub mod strategy;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::build::Builder;
use crate::config::DeployConfig;
use crate::errors::{DeployError, ServerError, TunnelError};
use crate::install::{InstallOutcome, Installer};
use crate::port::{PortSource, is_accepting};
use crate::process::RunOutcome;
use crate::project::ProjectHandle;
use crate::server::{ProcessSupervisor, ServerHandle};
use crate::tunnel::{TunnelHandle, TunnelPublisher};

pub use result::{DeploymentResult, DeploymentStatus, Diagnostic, DiagnosticKind};
pub use strategy::{DeployMode, Strategy, StrategyPlan};

/// The server (and tunnel) left running by a successful deployment.
#[derive(Debug)]
pub struct ActiveDeployment {
    project: ProjectHandle,
    strategy: Strategy,
    server: ServerHandle,
    tunnel: Option<TunnelHandle>,
}

impl ActiveDeployment {
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    pub fn tunnel_mut(&mut self) -> Option<&mut TunnelHandle> {
        self.tunnel.as_mut()
    }

    /// Tunnel first, then the server it forwards to.
    async fn teardown(&mut self) {
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.teardown().await;
        }
        self.server.stop().await;
    }
}

/// Runs deployments and owns whatever they leave running.
///
/// Starting a new deployment first tears down the previous one, so calling
/// [`deploy`](Self::deploy) repeatedly never accumulates servers.
pub struct Deployer {
    config: DeployConfig,
    ports: Arc<dyn PortSource>,
    installer: Installer,
    builder: Builder,
    supervisor: ProcessSupervisor,
    tunnels: TunnelPublisher,
    active: Option<ActiveDeployment>,
}

impl Deployer {
    pub fn new(config: DeployConfig) -> Self {
        let ports: Arc<dyn PortSource> = Arc::new(config.port_allocator());
        Self::with_port_source(config, ports)
    }

    /// Use a custom port source instead of scanning the configured range.
    pub fn with_port_source(config: DeployConfig, ports: Arc<dyn PortSource>) -> Self {
        Self {
            installer: Installer::new(config.installer.clone()),
            builder: Builder::new(config.build.clone()),
            supervisor: ProcessSupervisor::new(config.supervisor.clone()),
            tunnels: TunnelPublisher::new(config.tunnel.clone()),
            config,
            ports,
            active: None,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn active(&self) -> Option<&ActiveDeployment> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveDeployment> {
        self.active.as_mut()
    }

    /// Deploy `project`, returning once a server is reachable or every
    /// strategy has been exhausted.
    pub async fn deploy(&mut self, project: &ProjectHandle) -> DeploymentResult {
        self.deploy_with_cancel(project, &CancellationToken::new())
            .await
    }

    /// Like [`deploy`](Self::deploy), but abandons the attempt promptly when
    /// `cancel` fires, stopping anything it started.
    pub async fn deploy_with_cancel(
        &mut self,
        project: &ProjectHandle,
        cancel: &CancellationToken,
    ) -> DeploymentResult {
        let id = Uuid::new_v4();
        let span = info_span!("deploy", id = %id, project = %project);
        self.run(id, project, cancel).instrument(span).await
    }

    /// Stop the server and tunnel left by the last deployment, if any.
    pub async fn shutdown(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!(
                project = %active.project,
                strategy = %active.strategy,
                port = active.server.port(),
                "tearing down previous deployment"
            );
            active.teardown().await;
        }
    }

    async fn run(
        &mut self,
        id: Uuid,
        project: &ProjectHandle,
        cancel: &CancellationToken,
    ) -> DeploymentResult {
        let started = Instant::now();
        self.shutdown().await;
        let mut diagnostics = Vec::new();

        if let Err(err) = project.validate_scripts(&self.config.required_scripts()) {
            let err = DeployError::from(err);
            warn!(error = %err, "project is not deployable");
            diagnostics.push(Diagnostic::new(Strategy::Full, err.kind(), err.to_string()));
            return self.finish(
                id,
                project,
                started,
                DeploymentStatus::Failed,
                Strategy::Manual,
                diagnostics,
            );
        }

        for strategy in Strategy::LADDER {
            let Some(plan) = StrategyPlan::for_strategy(strategy, &self.config) else {
                break;
            };
            if cancel.is_cancelled() {
                diagnostics.push(Diagnostic::new(
                    strategy,
                    DiagnosticKind::Cancelled,
                    DeployError::Cancelled.to_string(),
                ));
                return self.cancelled(id, project, started, diagnostics);
            }

            info!(strategy = %strategy, "attempting strategy");
            match self.attempt(project, &plan, &mut diagnostics, cancel).await {
                Ok(active) => {
                    self.active = Some(active);
                    return self.finish(
                        id,
                        project,
                        started,
                        DeploymentStatus::Success,
                        strategy,
                        diagnostics,
                    );
                }
                Err(err) => {
                    diagnostics.push(Diagnostic::new(strategy, err.kind(), err.to_string()));
                    match err {
                        DeployError::Cancelled => {
                            info!(strategy = %strategy, "deployment cancelled");
                            return self.cancelled(id, project, started, diagnostics);
                        }
                        err if err.is_terminal() => {
                            warn!(strategy = %strategy, error = %err, "deployment cannot proceed");
                            return self.finish(
                                id,
                                project,
                                started,
                                DeploymentStatus::Failed,
                                Strategy::Manual,
                                diagnostics,
                            );
                        }
                        other => {
                            warn!(strategy = %strategy, error = %other, "strategy failed, downgrading")
                        }
                    }
                }
            }
        }

        info!("automatic strategies exhausted, handing over manual instructions");
        self.finish(
            id,
            project,
            started,
            DeploymentStatus::PartialSuccess,
            Strategy::Manual,
            diagnostics,
        )
    }

    /// One strategy: install, start, publish, confirm.
    async fn attempt(
        &self,
        project: &ProjectHandle,
        plan: &StrategyPlan,
        diagnostics: &mut Vec<Diagnostic>,
        cancel: &CancellationToken,
    ) -> Result<ActiveDeployment, DeployError> {
        let strategy = plan.strategy;
        let profile = self.installer.profile(plan.install);
        let install = self.installer.install(project, profile, cancel).await;
        if install.outcome == InstallOutcome::Cancelled {
            return Err(DeployError::Cancelled);
        }
        if !install.success {
            return Err(DeployError::InstallFailure(install.diagnostic));
        }
        diagnostics.push(Diagnostic::success(
            strategy,
            format!("{} install: {}", profile.kind, install.diagnostic),
        ));

        if plan.build {
            let build = self.builder.build(project, cancel).await;
            if build.outcome == RunOutcome::Cancelled {
                return Err(DeployError::Cancelled);
            }
            if !build.success {
                return Err(DeployError::BuildFailure(build.diagnostic));
            }
            diagnostics.push(Diagnostic::success(strategy, build.diagnostic));
        }

        let mut server = self.start_server(project, plan, diagnostics, cancel).await?;
        diagnostics.push(Diagnostic::success(
            strategy,
            format!(
                "{} server listening on {}",
                self.config.supervisor.script,
                server.local_url()
            ),
        ));

        let mut tunnel = None;
        if plan.publish_tunnel {
            match self.tunnels.publish(server.port(), cancel).await {
                Ok(handle) => {
                    if let Some(url) = handle.public_url() {
                        diagnostics.push(Diagnostic::success(strategy, format!("public URL {}", url)));
                    }
                    tunnel = Some(handle);
                }
                Err(TunnelError::Cancelled) => {
                    server.stop().await;
                    return Err(DeployError::Cancelled);
                }
                Err(err) => {
                    let err = DeployError::from(err);
                    warn!(error = %err, "continuing without a public URL");
                    diagnostics.push(Diagnostic::new(strategy, err.kind(), err.to_string()));
                }
            }
        }

        let port = server.port();
        if !server.is_running() || !is_accepting(port, self.config.probe_timeout).await {
            warn!(port, "dev server stopped accepting connections");
            if let Some(mut tunnel) = tunnel {
                tunnel.teardown().await;
            }
            server.stop().await;
            return Err(DeployError::ProcessExitedEarly(format!(
                "Dev server on port {} stopped accepting connections before the deployment completed",
                port
            )));
        }

        Ok(ActiveDeployment {
            project: project.clone(),
            strategy,
            server,
            tunnel,
        })
    }

    /// Allocate a port and start the dev server, re-allocating once if the
    /// port turns out to be taken.
    async fn start_server(
        &self,
        project: &ProjectHandle,
        plan: &StrategyPlan,
        diagnostics: &mut Vec<Diagnostic>,
        cancel: &CancellationToken,
    ) -> Result<ServerHandle, DeployError> {
        let port = self.ports.allocate(&[]).await?;
        info!(port, strategy = %plan.strategy, "allocated port");

        match self
            .supervisor
            .start(project, port, plan.startup_window, cancel)
            .await
        {
            Ok(server) => Ok(server),
            Err(ServerError::PortUnavailable { port: taken }) => {
                let err = DeployError::from(ServerError::PortUnavailable { port: taken });
                diagnostics.push(Diagnostic::new(
                    plan.strategy,
                    err.kind(),
                    format!("{}; retrying on another port", err),
                ));
                let retry_port = self.ports.allocate(&[taken]).await?;
                info!(port = retry_port, taken, "retrying dev server on another port");
                Ok(self
                    .supervisor
                    .start(project, retry_port, plan.startup_window, cancel)
                    .await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn cancelled(
        &self,
        id: Uuid,
        project: &ProjectHandle,
        started: Instant,
        diagnostics: Vec<Diagnostic>,
    ) -> DeploymentResult {
        self.finish(
            id,
            project,
            started,
            DeploymentStatus::PartialSuccess,
            Strategy::Manual,
            diagnostics,
        )
    }

    fn finish(
        &self,
        id: Uuid,
        project: &ProjectHandle,
        started: Instant,
        status: DeploymentStatus,
        strategy_used: Strategy,
        diagnostics: Vec<Diagnostic>,
    ) -> DeploymentResult {
        let active = self
            .active
            .as_ref()
            .filter(|_| status == DeploymentStatus::Success);
        let manual_instructions =
            (status != DeploymentStatus::Success).then(|| self.config.manual_instructions(project));

        let result = DeploymentResult {
            id,
            project: project.root().to_path_buf(),
            status,
            local_url: active.map(|a| a.server.local_url().to_string()),
            public_url: active
                .and_then(|a| a.tunnel.as_ref())
                .and_then(|t| t.public_url().map(str::to_string)),
            port: active.map(|a| a.server.port()),
            strategy_used,
            mode: self.config.mode,
            manual_instructions,
            diagnostics,
            finished_at: Utc::now(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            status = %result.status,
            strategy = %result.strategy_used,
            elapsed_ms = result.elapsed_ms,
            "deployment finished"
        );
        result
    }
}
