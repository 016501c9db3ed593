use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui::icons::ROCKET;

/// Spinner shown while a deployment is in flight.
///
/// Hidden entirely when `enabled` is false (JSON output), so machine-readable
/// stdout is never interleaved with terminal control codes.
pub struct DeployUI {
    bar: ProgressBar,
}

impl DeployUI {
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        Self { bar }
    }

    /// Start spinning with a message naming the project.
    pub fn start(&self, project: &str) {
        self.bar.set_message(format!(
            "{}Deploying {}",
            ROCKET,
            style(project).cyan().bold()
        ));
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
