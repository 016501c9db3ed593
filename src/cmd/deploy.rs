//! One-shot deployment (`launchpad deploy`).

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use launchpad::config::{CliOverrides, DeployConfig};
use launchpad::deploy::{DeploymentStatus, Deployer};
use launchpad::project::ProjectHandle;
use launchpad::tunnel::TunnelState;
use launchpad::ui::icons::WARN;
use launchpad::ui::{DeployUI, render_result};

/// How often a held deployment checks that its server is still alive.
const HOLD_CHECK_INTERVAL: Duration = Duration::from_secs(2);

pub struct DeployArgs {
    pub project: PathBuf,
    pub json: bool,
    pub no_hold: bool,
    pub open: bool,
    pub config: Option<PathBuf>,
    pub overrides: CliOverrides,
}

/// Deploy, report, and (unless `--no-hold`) keep serving until Ctrl+C.
///
/// Returns the process exit code for the deployment status.
pub async fn cmd_deploy(args: DeployArgs) -> Result<i32> {
    let config = DeployConfig::load(args.config.as_deref())?.with_overrides(&args.overrides);
    for warning in config.validate() {
        eprintln!("{}{}", WARN, style(warning).yellow());
    }
    if let Some(ref source) = config.source {
        tracing::debug!(path = %source.display(), "loaded config file");
    }

    let root = args
        .project
        .canonicalize()
        .unwrap_or_else(|_| args.project.clone());
    let project = ProjectHandle::new(root);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let ui = DeployUI::new(!args.json);
    ui.start(&project.display_name());
    let mut deployer = Deployer::new(config);
    let result = deployer.deploy_with_cancel(&project, &cancel).await;
    ui.finish();

    if args.json {
        println!(
            "{}",
            result.to_json().context("Failed to serialize deployment result")?
        );
    } else {
        print!("{}", render_result(&result));
    }

    if result.status == DeploymentStatus::Success {
        if args.open
            && let Some(url) = result.public_url.as_ref().or(result.local_url.as_ref())
            && let Err(e) = open::that(url)
        {
            eprintln!("Failed to open browser: {}", e);
        }

        if !args.no_hold {
            if !args.json {
                println!();
                println!("{}", style("Press Ctrl+C to stop the server.").dim());
            }
            hold(&mut deployer, &cancel).await;
        }
    }

    deployer.shutdown().await;
    Ok(result.status.exit_code())
}

/// Wait for Ctrl+C, or until the server dies on its own.
async fn hold(deployer: &mut Deployer, cancel: &CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                eprintln!();
                eprintln!("Shutting down...");
                return;
            }
            _ = tokio::time::sleep(HOLD_CHECK_INTERVAL) => {}
        }

        let Some(active) = deployer.active_mut() else {
            return;
        };
        if let Some(tunnel) = active.tunnel_mut()
            && tunnel.state() == TunnelState::Active
            && tunnel.refresh_state() == TunnelState::Failed
        {
            eprintln!("{}{}", WARN, style("Public tunnel has stopped").yellow());
        }
        if !active.server().is_running() {
            eprintln!(
                "{}{}",
                WARN,
                style("Server exited; recent output:").yellow()
            );
            eprintln!("{}", active.server().output());
            return;
        }
    }
}
