//! Preflight report (`launchpad check`).

use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};

use launchpad::config::{CliOverrides, DeployConfig};
use launchpad::install::Installer;
use launchpad::project::ProjectHandle;
use launchpad::tunnel::TunnelPublisher;
use launchpad::ui::icons::{CHECK, CROSS, WARN};

/// Print what a deployment of `project` would find. Returns `true` when the
/// project is deployable.
pub fn cmd_check(
    project: &Path,
    config_path: Option<&Path>,
    overrides: &CliOverrides,
) -> Result<bool> {
    let config = DeployConfig::load(config_path)?.with_overrides(overrides);
    let root = project
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(project));
    let project = ProjectHandle::new(root);
    let scripts = config.required_scripts();

    println!();
    println!(
        "Preflight: {} ({} mode)",
        style(project.to_string()).bold(),
        config.mode
    );
    println!();

    let deployable = match project.validate_scripts(&scripts) {
        Ok(manifest) => {
            for script in &scripts {
                println!("  {}package.json declares '{}'", CHECK, script);
                if let Some(command) = manifest.script(script) {
                    println!("      {}", style(command).dim());
                }
            }
            true
        }
        Err(e) => {
            println!("  {}{}", CROSS, e);
            false
        }
    };

    let installer = Installer::new(config.installer.clone());
    let binary = installer.expected_binary(&project);
    let binary_path = project.dependency_binary(&config.installer.dependency_dir, &binary);
    if installer.is_ready(&project) {
        println!("  {}dependencies installed ({})", CHECK, binary_path.display());
    } else {
        println!(
            "  {}dependencies not installed yet ({} missing)",
            WARN,
            binary_path.display()
        );
    }

    match which::which(&config.installer.package_manager) {
        Ok(path) => println!("  {}package manager: {}", CHECK, path.display()),
        Err(_) => println!(
            "  {}package manager '{}' not found on PATH",
            CROSS, config.installer.package_manager
        ),
    }

    if config.tunnel.enabled {
        let tunnels = TunnelPublisher::new(config.tunnel.clone());
        if tunnels.binary_available() {
            println!("  {}tunnel binary: {}", CHECK, config.tunnel.binary);
        } else {
            println!(
                "  {}tunnel binary '{}' not found; deployments will be local only",
                WARN, config.tunnel.binary
            );
        }
    } else {
        println!("  {}public tunnel disabled", WARN);
    }

    println!("  {}ports {}-{}", CHECK, config.port_start, config.port_end);
    println!();
    println!("Manual command: {}", config.manual_instructions(&project));
    println!();

    Ok(deployable)
}
