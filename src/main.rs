use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use launchpad::config::CliOverrides;
use launchpad::deploy::DeployMode;
use launchpad::launchpad_config::parse_port_range;

mod cmd;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(version, about = "Take a generated front-end project to a running, reachable server")]
pub struct Cli {
    /// Show info-level logs (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to launchpad.toml (defaults to ./launchpad.toml, then the user config dir)
    #[arg(long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install, start and publish a project, degrading to manual instructions
    Deploy {
        /// Project directory containing package.json
        project: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Exit after reporting instead of serving until Ctrl+C
        #[arg(long)]
        no_hold: bool,

        /// Open the deployed URL in a browser
        #[arg(long)]
        open: bool,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Report whether a project looks deployable
    Check {
        /// Project directory containing package.json
        project: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Serve a directory of built static files
    Serve {
        /// Directory to serve
        dir: PathBuf,

        /// Port to serve on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args, Clone, Default)]
pub struct OverrideArgs {
    /// Port range to allocate from, e.g. 3000-3100
    #[arg(long, value_parser = parse_port_range_arg)]
    pub port_range: Option<(u16, u16)>,

    /// Skip public tunnel publishing
    #[arg(long)]
    pub no_tunnel: bool,

    /// Package manager to run (npm, pnpm, yarn, ...)
    #[arg(long)]
    pub package_manager: Option<String>,

    /// Serve the dev script (development) or build and preview (production)
    #[arg(long)]
    pub mode: Option<DeployMode>,
}

impl From<OverrideArgs> for CliOverrides {
    fn from(args: OverrideArgs) -> Self {
        CliOverrides {
            port_range: args.port_range,
            no_tunnel: args.no_tunnel,
            package_manager: args.package_manager,
            mode: args.mode,
        }
    }
}

fn parse_port_range_arg(s: &str) -> Result<(u16, u16), String> {
    parse_port_range(s).map_err(|e| e.to_string())
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default launchpad.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "launchpad=info"
    } else {
        "launchpad=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Deploy {
            project,
            json,
            no_hold,
            open,
            overrides,
        } => {
            let code = cmd::cmd_deploy(cmd::DeployArgs {
                project,
                json,
                no_hold,
                open,
                config: cli.config_file,
                overrides: overrides.into(),
            })
            .await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Check { project, overrides } => {
            let overrides = CliOverrides::from(overrides);
            let deployable = cmd::cmd_check(&project, cli.config_file.as_deref(), &overrides)?;
            if !deployable {
                std::process::exit(1);
            }
        }
        Commands::Serve { dir, port, host } => cmd::cmd_serve(&dir, &host, port).await?,
        Commands::Config { command } => cmd::cmd_config(cli.config_file.as_deref(), command)?,
    }

    Ok(())
}
