use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::install::ProfileKind;

/// Deployment strategies, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Thorough install, long startup window, public tunnel.
    Full,
    /// Fast install, short startup window, local only.
    Fast,
    /// Nothing is started; the user gets the commands to run.
    Manual,
}

impl Strategy {
    /// The order strategies are attempted in. Each runs at most once.
    pub const LADDER: [Strategy; 3] = [Strategy::Full, Strategy::Fast, Strategy::Manual];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Full => write!(f, "full"),
            Strategy::Fast => write!(f, "fast"),
            Strategy::Manual => write!(f, "manual"),
        }
    }
}

/// What gets served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Supervise the manifest's dev script.
    #[default]
    Development,
    /// Build first, then supervise the preview script over the build output.
    Production,
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::Development => write!(f, "development"),
            DeployMode::Production => write!(f, "production"),
        }
    }
}

impl FromStr for DeployMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(DeployMode::Development),
            "production" | "prod" => Ok(DeployMode::Production),
            other => Err(format!(
                "unknown mode '{}' (expected development or production)",
                other
            )),
        }
    }
}

/// What one automatic strategy does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    pub install: ProfileKind,
    /// Run the production build before starting the server.
    pub build: bool,
    pub startup_window: Duration,
    pub publish_tunnel: bool,
}

impl StrategyPlan {
    /// The plan for `strategy`, or `None` for the manual fallback.
    pub fn for_strategy(strategy: Strategy, config: &DeployConfig) -> Option<Self> {
        let build = config.mode == DeployMode::Production;
        match strategy {
            Strategy::Full => Some(Self {
                strategy,
                install: ProfileKind::Thorough,
                build,
                startup_window: config.full_startup,
                publish_tunnel: config.tunnel.enabled,
            }),
            Strategy::Fast => Some(Self {
                strategy,
                install: ProfileKind::Fast,
                build,
                startup_window: config.fast_startup,
                publish_tunnel: false,
            }),
            Strategy::Manual => None,
        }
    }
}
