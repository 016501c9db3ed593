pub mod build;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod install;
pub mod launchpad_config;
pub mod port;
pub mod process;
pub mod project;
pub mod server;
pub mod tunnel;
pub mod ui;
pub mod util;

pub use config::DeployConfig;
pub use deploy::{DeploymentResult, DeploymentStatus, Deployer};
pub use project::ProjectHandle;
