//! File layer of the launchpad configuration.
//!
//! Reads `launchpad.toml`. Every key is optional; missing keys take the
//! defaults shown below.
//!
//! # Configuration File Format
//!
//! ```toml
//! [ports]
//! start = 3000
//! end = 3100
//! probe_timeout_ms = 1000
//!
//! [install]
//! package_manager = "npm"
//! thorough_timeout_secs = 300
//! fast_timeout_secs = 120
//! thorough_args = []
//! thorough_retry_args = ["--force"]
//! fast_args = ["--prefer-offline", "--no-audit", "--no-fund"]
//! fast_retry_args = ["--offline", "--no-audit"]
//! dependency_dir = "node_modules"
//! # dev_binary = "vite"
//! output_limit = 500
//! skip_when_ready = true
//!
//! [server]
//! mode = "development"          # or "production"
//! dev_script = "dev"
//! build_script = "build"
//! preview_script = "preview"
//! build_output_dir = "dist"
//! build_timeout_secs = 180
//! host = "0.0.0.0"
//! extra_args = ["--strictPort"]
//! full_startup_secs = 30
//! fast_startup_secs = 12
//! poll_interval_ms = 1000
//! stop_grace_secs = 3
//!
//! [tunnel]
//! enabled = true
//! binary = "ngrok"
//! args = ["http", "{port}", "--log=stdout", "--log-format=json"]
//! timeout_secs = 10
//! api_url = "http://127.0.0.1:4040/api/tunnels"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::deploy::DeployMode;
use crate::tunnel::DEFAULT_URL_PATTERN;

pub const CONFIG_FILE: &str = "launchpad.toml";

/// Port range scanned by the allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsSection {
    #[serde(default = "default_port_start")]
    pub start: u16,
    #[serde(default = "default_port_end")]
    pub end: u16,
    /// Connect-probe timeout per port
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_port_start() -> u16 {
    3000
}

fn default_port_end() -> u16 {
    3100
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Package manager invocation for both install profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSection {
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
    #[serde(default = "default_thorough_timeout_secs")]
    pub thorough_timeout_secs: u64,
    #[serde(default = "default_fast_timeout_secs")]
    pub fast_timeout_secs: u64,
    #[serde(default)]
    pub thorough_args: Vec<String>,
    #[serde(default = "default_thorough_retry_args")]
    pub thorough_retry_args: Vec<String>,
    #[serde(default = "default_fast_args")]
    pub fast_args: Vec<String>,
    #[serde(default = "default_fast_retry_args")]
    pub fast_retry_args: Vec<String>,
    #[serde(default = "default_dependency_dir")]
    pub dependency_dir: String,
    /// Executable expected under `<dependency_dir>/.bin` after install.
    /// Derived from the manifest's dev script when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_binary: Option<String>,
    /// Characters of installer output kept for diagnostics
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
    /// Let the fast profile skip installing when dependencies are present
    #[serde(default = "default_true")]
    pub skip_when_ready: bool,
}

fn default_package_manager() -> String {
    "npm".to_string()
}

fn default_thorough_timeout_secs() -> u64 {
    300
}

fn default_fast_timeout_secs() -> u64 {
    120
}

fn default_thorough_retry_args() -> Vec<String> {
    vec!["--force".to_string()]
}

fn default_fast_args() -> Vec<String> {
    vec![
        "--prefer-offline".to_string(),
        "--no-audit".to_string(),
        "--no-fund".to_string(),
    ]
}

fn default_fast_retry_args() -> Vec<String> {
    vec!["--offline".to_string(), "--no-audit".to_string()]
}

fn default_dependency_dir() -> String {
    "node_modules".to_string()
}

fn default_output_limit() -> usize {
    crate::util::DEFAULT_OUTPUT_LIMIT
}

fn default_true() -> bool {
    true
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            package_manager: default_package_manager(),
            thorough_timeout_secs: default_thorough_timeout_secs(),
            fast_timeout_secs: default_fast_timeout_secs(),
            thorough_args: Vec::new(),
            thorough_retry_args: default_thorough_retry_args(),
            fast_args: default_fast_args(),
            fast_retry_args: default_fast_retry_args(),
            dependency_dir: default_dependency_dir(),
            dev_binary: None,
            output_limit: default_output_limit(),
            skip_when_ready: true,
        }
    }
}

/// Server launch and supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Serve the dev script, or build and serve the preview script
    #[serde(default)]
    pub mode: DeployMode,
    #[serde(default = "default_dev_script")]
    pub dev_script: String,
    #[serde(default = "default_build_script")]
    pub build_script: String,
    #[serde(default = "default_preview_script")]
    pub preview_script: String,
    /// Directory the build must produce, relative to the project root
    #[serde(default = "default_build_output_dir")]
    pub build_output_dir: String,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
    #[serde(default = "default_full_startup_secs")]
    pub full_startup_secs: u64,
    #[serde(default = "default_fast_startup_secs")]
    pub fast_startup_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_dev_script() -> String {
    "dev".to_string()
}

fn default_build_script() -> String {
    "build".to_string()
}

fn default_preview_script() -> String {
    "preview".to_string()
}

fn default_build_output_dir() -> String {
    "dist".to_string()
}

fn default_build_timeout_secs() -> u64 {
    180
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_extra_args() -> Vec<String> {
    vec!["--strictPort".to_string()]
}

fn default_full_startup_secs() -> u64 {
    30
}

fn default_fast_startup_secs() -> u64 {
    12
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stop_grace_secs() -> u64 {
    3
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            mode: DeployMode::default(),
            dev_script: default_dev_script(),
            build_script: default_build_script(),
            preview_script: default_preview_script(),
            build_output_dir: default_build_output_dir(),
            build_timeout_secs: default_build_timeout_secs(),
            host: default_host(),
            extra_args: default_extra_args(),
            full_startup_secs: default_full_startup_secs(),
            fast_startup_secs: default_fast_startup_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

/// Public tunnel publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tunnel_binary")]
    pub binary: String,
    #[serde(default = "default_tunnel_args")]
    pub args: Vec<String>,
    #[serde(default = "default_tunnel_timeout_secs")]
    pub timeout_secs: u64,
    /// Local control API; empty disables API polling
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_url_pattern")]
    pub url_pattern: String,
}

fn default_tunnel_binary() -> String {
    "ngrok".to_string()
}

fn default_tunnel_args() -> Vec<String> {
    ["http", "{port}", "--log=stdout", "--log-format=json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_tunnel_timeout_secs() -> u64 {
    10
}

fn default_api_url() -> String {
    "http://127.0.0.1:4040/api/tunnels".to_string()
}

fn default_url_pattern() -> String {
    DEFAULT_URL_PATTERN.to_string()
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: default_tunnel_binary(),
            args: default_tunnel_args(),
            timeout_secs: default_tunnel_timeout_secs(),
            api_url: default_api_url(),
            url_pattern: default_url_pattern(),
        }
    }
}

/// The complete launchpad.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchpadToml {
    #[serde(default)]
    pub ports: PortsSection,
    #[serde(default)]
    pub install: InstallSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tunnel: TunnelSection,
}

impl LaunchpadToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse launchpad.toml")
    }

    /// Candidate config files, most specific first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("launchpad").join(CONFIG_FILE));
        }
        paths
    }

    /// Load `explicit` if given (it must exist), otherwise the first existing
    /// file from [`search_paths`](Self::search_paths), otherwise defaults.
    ///
    /// Returns the path that was read, if any.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        for path in Self::search_paths() {
            if path.is_file() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize launchpad.toml")
    }

    /// Apply `LAUNCHPAD_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pm) = lookup("LAUNCHPAD_PACKAGE_MANAGER").filter(|v| !v.is_empty()) {
            self.install.package_manager = pm;
        }
        if let Some(mode) = lookup("LAUNCHPAD_MODE").filter(|v| !v.is_empty()) {
            self.server.mode = mode
                .parse()
                .map_err(|e: String| anyhow::anyhow!("Invalid LAUNCHPAD_MODE: {}", e))?;
        }
        if let Some(range) = lookup("LAUNCHPAD_PORT_RANGE") {
            let (start, end) = parse_port_range(&range)
                .with_context(|| "Invalid LAUNCHPAD_PORT_RANGE".to_string())?;
            self.ports.start = start;
            self.ports.end = end;
        }
        if let Some(enabled) = lookup("LAUNCHPAD_TUNNEL") {
            self.tunnel.enabled = !matches!(
                enabled.trim().to_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }
        if let Some(binary) = lookup("LAUNCHPAD_TUNNEL_BINARY").filter(|v| !v.is_empty()) {
            self.tunnel.binary = binary;
        }
        Ok(())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.ports.start > self.ports.end {
            warnings.push(format!(
                "ports.start ({}) is greater than ports.end ({}); no port can be allocated",
                self.ports.start, self.ports.end
            ));
        }
        if self.server.poll_interval_ms == 0 {
            warnings.push("server.poll_interval_ms is 0; using 1ms".to_string());
        }
        if self.server.fast_startup_secs > self.server.full_startup_secs {
            warnings.push(format!(
                "server.fast_startup_secs ({}) exceeds server.full_startup_secs ({})",
                self.server.fast_startup_secs, self.server.full_startup_secs
            ));
        }
        if self.install.fast_timeout_secs > self.install.thorough_timeout_secs {
            warnings.push(format!(
                "install.fast_timeout_secs ({}) exceeds install.thorough_timeout_secs ({})",
                self.install.fast_timeout_secs, self.install.thorough_timeout_secs
            ));
        }
        if self.server.mode == DeployMode::Production && self.server.build_timeout_secs == 0 {
            warnings.push("server.build_timeout_secs is 0; every build will time out".to_string());
        }
        if let Err(e) = regex::Regex::new(&self.tunnel.url_pattern) {
            warnings.push(format!("tunnel.url_pattern is not a valid regex: {}", e));
        }

        warnings
    }
}

/// Parse `"start-end"` into an inclusive port range.
pub fn parse_port_range(s: &str) -> Result<(u16, u16)> {
    let (start, end) = s
        .split_once('-')
        .with_context(|| format!("Port range '{}' must look like 3000-3100", s))?;
    let start: u16 = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid start port in '{}'", s))?;
    let end: u16 = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid end port in '{}'", s))?;
    if start == 0 || start > end {
        anyhow::bail!("Port range '{}' is empty", s);
    }
    Ok((start, end))
}
