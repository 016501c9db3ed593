//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `deploy` | `Deploy`         |
//! | `check`  | `Check`          |
//! | `serve`  | `Serve`          |
//! | `config` | `Config`         |

pub mod check;
pub mod config;
pub mod deploy;
pub mod serve;

pub use check::cmd_check;
pub use config::cmd_config;
pub use deploy::{DeployArgs, cmd_deploy};
pub use serve::cmd_serve;
