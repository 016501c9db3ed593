//! Configuration view, validation and scaffolding (`launchpad config`).

use anyhow::Result;
use std::path::{Path, PathBuf};

use launchpad::config::DeployConfig;
use launchpad::launchpad_config::{CONFIG_FILE, LaunchpadToml};

use super::super::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = DeployConfig::load(config_path)?;
            match config.source {
                Some(ref path) => println!("# Config file: {}", path.display()),
                None => println!("# No {} found; showing defaults", CONFIG_FILE),
            }
            println!("# Effective values (with LAUNCHPAD_* overrides)");
            println!();
            print!("{}", config.as_toml().to_toml_string()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = DeployConfig::load(config_path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init { force }) => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                );
            }
            LaunchpadToml::default().save(&path)?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
