//! Human-readable rendering of a [`DeploymentResult`].

use console::style;
use std::fmt::Write;

use crate::deploy::{DeployMode, DeploymentResult, DeploymentStatus, DiagnosticKind};
use crate::ui::icons::{CHECK, CLOCK, CROSS, FOLDER, GLOBE, HOUSE, SPARKLE, WARN, WRENCH};
use crate::util::format_secs;

/// Render the result summary printed after `launchpad deploy`.
pub fn render_result(result: &DeploymentResult) -> String {
    let mut out = String::new();

    let headline = match result.status {
        DeploymentStatus::Success => match result.mode {
            DeployMode::Development => format!(
                "{}{} (strategy: {})",
                SPARKLE,
                style("Deployed").green().bold(),
                result.strategy_used
            ),
            DeployMode::Production => format!(
                "{}{} (strategy: {}, production build)",
                SPARKLE,
                style("Deployed").green().bold(),
                result.strategy_used
            ),
        },
        DeploymentStatus::PartialSuccess => format!(
            "{}{}",
            WARN,
            style("Project is ready, but it could not be hosted automatically")
                .yellow()
                .bold()
        ),
        DeploymentStatus::Failed => format!(
            "{}{}",
            CROSS,
            style("Project cannot be deployed").red().bold()
        ),
    };
    let _ = writeln!(out, "{}", headline);
    let _ = writeln!(out, "  {}{}", FOLDER, result.project.display());

    if let Some(ref url) = result.local_url {
        let _ = writeln!(out, "  {}Local:  {}", HOUSE, style(url).cyan().underlined());
    }
    if let Some(ref url) = result.public_url {
        let _ = writeln!(out, "  {}Public: {}", GLOBE, style(url).cyan().underlined());
    } else if result.status == DeploymentStatus::Success {
        let _ = writeln!(out, "  {}Public: {}", GLOBE, style("not available").dim());
    }
    let _ = writeln!(
        out,
        "  {}{}",
        CLOCK,
        style(format_secs(std::time::Duration::from_millis(result.elapsed_ms))).dim()
    );

    if let Some(ref manual) = result.manual_instructions {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}Run it yourself:", WRENCH);
        for command in &manual.commands {
            let _ = writeln!(out, "    {}", style(command).bold());
        }
    }

    if !result.diagnostics.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", style("Diagnostics").dim());
        for diagnostic in &result.diagnostics {
            let icon = match diagnostic.kind {
                DiagnosticKind::Success => &CHECK,
                DiagnosticKind::TunnelUnavailable | DiagnosticKind::PortUnavailable => &WARN,
                _ => &CROSS,
            };
            let mut lines = diagnostic.message.lines();
            let first = lines.next().unwrap_or_default();
            let _ = writeln!(
                out,
                "  {}{} {}",
                icon,
                style(format!("[{}]", diagnostic.strategy)).dim(),
                first
            );
            for line in lines {
                let _ = writeln!(out, "        {}", style(line).dim());
            }
        }
    }

    out
}
