use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::build::BuildConfig;
use crate::deploy::DeployMode;
use crate::install::{InstallProfile, InstallerConfig, ProfileKind};
use crate::launchpad_config::LaunchpadToml;
use crate::port::PortAllocator;
use crate::project::{ManualInstructions, ProjectHandle};
use crate::server::SupervisorConfig;
use crate::tunnel::TunnelConfig;

/// Overrides taken from command-line flags; they win over file and env.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port_range: Option<(u16, u16)>,
    pub no_tunnel: bool,
    pub package_manager: Option<String>,
    pub mode: Option<DeployMode>,
}

/// Runtime configuration for a deployment.
///
/// This struct bridges the file layer (`LaunchpadToml`) with the
/// `Duration`-typed settings each component consumes. Layers are applied
/// in order: defaults, launchpad.toml, `LAUNCHPAD_*` environment, CLI flags.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub mode: DeployMode,
    pub port_start: u16,
    pub port_end: u16,
    pub probe_timeout: Duration,
    pub installer: InstallerConfig,
    /// Production build; only run in [`DeployMode::Production`].
    pub build: BuildConfig,
    pub supervisor: SupervisorConfig,
    pub tunnel: TunnelConfig,
    /// Startup window for the full strategy.
    pub full_startup: Duration,
    /// Startup window for the fast strategy.
    pub fast_startup: Duration,
    /// The config file that was read, if any.
    pub source: Option<PathBuf>,
    /// The file layer this config was built from.
    toml: LaunchpadToml,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self::from_toml(LaunchpadToml::default())
    }
}

impl DeployConfig {
    /// Build runtime settings from a parsed config file.
    pub fn from_toml(toml: LaunchpadToml) -> Self {
        let install = &toml.install;
        let server = &toml.server;
        let tunnel = &toml.tunnel;
        let probe_timeout = Duration::from_millis(toml.ports.probe_timeout_ms);
        let mode = server.mode;
        // The installed tree must provide whatever the first script launches.
        let (first_script, serve_script) = match mode {
            DeployMode::Development => (&server.dev_script, &server.dev_script),
            DeployMode::Production => (&server.build_script, &server.preview_script),
        };

        let installer = InstallerConfig {
            package_manager: install.package_manager.clone(),
            dependency_dir: install.dependency_dir.clone(),
            dev_script: first_script.clone(),
            dev_binary: install.dev_binary.clone(),
            output_limit: install.output_limit,
            thorough: InstallProfile {
                kind: ProfileKind::Thorough,
                args: install.thorough_args.clone(),
                retry_args: non_empty(&install.thorough_retry_args),
                timeout: Duration::from_secs(install.thorough_timeout_secs),
                skip_when_ready: false,
            },
            fast: InstallProfile {
                kind: ProfileKind::Fast,
                args: install.fast_args.clone(),
                retry_args: non_empty(&install.fast_retry_args),
                timeout: Duration::from_secs(install.fast_timeout_secs),
                skip_when_ready: install.skip_when_ready,
            },
        };

        let build = BuildConfig {
            package_manager: install.package_manager.clone(),
            script: server.build_script.clone(),
            output_dir: server.build_output_dir.clone(),
            timeout: Duration::from_secs(server.build_timeout_secs),
            output_limit: install.output_limit,
        };

        let supervisor = SupervisorConfig {
            package_manager: install.package_manager.clone(),
            script: serve_script.clone(),
            host: server.host.clone(),
            extra_args: server.extra_args.clone(),
            poll_interval: Duration::from_millis(server.poll_interval_ms.max(1)),
            probe_timeout,
            stop_grace: Duration::from_secs(server.stop_grace_secs),
            output_limit: install.output_limit,
        };

        let tunnel = TunnelConfig {
            enabled: tunnel.enabled,
            binary: tunnel.binary.clone(),
            args: tunnel.args.clone(),
            timeout: Duration::from_secs(tunnel.timeout_secs),
            api_url: Some(tunnel.api_url.clone()).filter(|u| !u.is_empty()),
            url_pattern: tunnel.url_pattern.clone(),
            output_limit: install.output_limit,
            ..TunnelConfig::default()
        };

        Self {
            mode,
            port_start: toml.ports.start,
            port_end: toml.ports.end,
            probe_timeout,
            installer,
            build,
            supervisor,
            tunnel,
            full_startup: Duration::from_secs(server.full_startup_secs),
            fast_startup: Duration::from_secs(server.fast_startup_secs),
            source: None,
            toml,
        }
    }

    /// Load the file layer (see [`LaunchpadToml::load_or_default`]) and
    /// apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (mut toml, source) = LaunchpadToml::load_or_default(explicit)?;
        toml.apply_env()?;
        let mut config = Self::from_toml(toml);
        config.source = source;
        Ok(config)
    }

    /// Apply CLI flags on top of the loaded layers.
    pub fn with_overrides(self, overrides: &CliOverrides) -> Self {
        let mut toml = self.toml;
        if let Some((start, end)) = overrides.port_range {
            toml.ports.start = start;
            toml.ports.end = end;
        }
        if overrides.no_tunnel {
            toml.tunnel.enabled = false;
        }
        if let Some(ref pm) = overrides.package_manager {
            toml.install.package_manager = pm.clone();
        }
        if let Some(mode) = overrides.mode {
            toml.server.mode = mode;
        }
        let source = self.source;
        let mut config = Self::from_toml(toml);
        config.source = source;
        config
    }

    /// The effective settings in file form, for `config show`.
    pub fn as_toml(&self) -> &LaunchpadToml {
        &self.toml
    }

    pub fn port_allocator(&self) -> PortAllocator {
        PortAllocator::new(self.port_start, self.port_end, self.probe_timeout)
    }

    /// Manifest scripts a deployment runs, in order.
    pub fn required_scripts(&self) -> Vec<&str> {
        match self.mode {
            DeployMode::Development => vec![self.supervisor.script.as_str()],
            DeployMode::Production => {
                vec![self.build.script.as_str(), self.supervisor.script.as_str()]
            }
        }
    }

    pub fn manual_instructions(&self, project: &ProjectHandle) -> ManualInstructions {
        ManualInstructions::from_scripts(
            project,
            &self.installer.package_manager,
            &self.required_scripts(),
        )
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn non_empty(args: &[String]) -> Option<Vec<String>> {
    (!args.is_empty()).then(|| args.to_vec())
}
