//! Static preview server (`launchpad serve`).

use anyhow::Result;
use std::path::Path;

use launchpad::server::{PreviewConfig, start_preview};

pub async fn cmd_serve(dir: &Path, host: &str, port: u16) -> Result<()> {
    start_preview(PreviewConfig {
        root: dir.to_path_buf(),
        host: host.to_string(),
        port,
    })
    .await
}
