//! Output formatting for CLI commands.
//!
//! This module turns operation outcomes into text for a terminal or JSON
//! for scripts. Nothing here prints; the caller decides where it goes.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::compose::ServiceState;
use crate::reconciler::{OperationOutcome, OutcomeReport, ReconciliationReport, StatusReport, TokenState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Container row for table display.
#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Document row for table display.
#[derive(Tabled)]
struct DocumentRow {
    #[tabled(rename = "Document")]
    path: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of any operation.
    #[must_use]
    pub fn format_outcome(&self, outcome: &OperationOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                match &outcome.report {
                    Some(OutcomeReport::Reconciliation(report)) => output.push_str(&Self::reconciliation_text(report)),
                    Some(OutcomeReport::Status(report)) => output.push_str(&Self::status_text(report)),
                    None => {}
                }

                let line = if outcome.ok {
                    self.success(&outcome.message)
                } else {
                    let step = outcome
                        .failed_step
                        .map_or_else(String::new, |s| format!("[{s}] "));
                    self.error(&format!("{} failed: {step}{}", outcome.operation, outcome.message))
                };
                output.push_str(&line);
                output.push('\n');
                output
            }
        }
    }

    /// Formats the container list.
    #[must_use]
    pub fn format_services(&self, services: &[ServiceState]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(services).unwrap_or_default(),
            OutputFormat::Text => {
                if services.is_empty() {
                    return String::from("   No containers.\n");
                }
                let mut output = Table::new(services.iter().map(Self::service_row)).to_string();
                output.push('\n');
                output
            }
        }
    }

    fn reconciliation_text(report: &ReconciliationReport) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nReconciliation reached {}", report.stage.to_string().bold());
        let slurpit = if report.enabled {
            format!("enabled ({})", report.mode).green().to_string()
        } else {
            "disabled".dimmed().to_string()
        };
        let _ = writeln!(output, "   Slurp'it: {slurpit}");
        let _ = writeln!(output, "   NetBox port: {}", report.ui_port);
        let _ = writeln!(
            output,
            "   Documents: {} written, {} unchanged, {} removed",
            report.documents.written.len().to_string().green(),
            report.documents.unchanged.len(),
            report.documents.removed.len().to_string().red()
        );
        for path in &report.documents.written {
            let _ = writeln!(output, "     + {}", path.display());
        }
        for path in &report.documents.removed {
            let _ = writeln!(output, "     - {}", path.display());
        }

        if !report.generated_credentials.is_empty() {
            let _ = writeln!(output, "   Generated: {}", report.generated_credentials.join(", "));
        }

        let token = match report.token {
            TokenState::Deferred => report.token.to_string().yellow().to_string(),
            TokenState::Provisioned | TokenState::Reused => report.token.to_string().green().to_string(),
            TokenState::NotRequired => report.token.to_string().dimmed().to_string(),
        };
        let _ = writeln!(output, "   Token: {token}");

        if let (Some(network), Some(attach)) = (&report.network, &report.attachments) {
            let _ = writeln!(
                output,
                "   Network {}: {} attached, {} already attached",
                network.name,
                attach.attached.len(),
                attach.already_attached.len()
            );
        }

        if !report.warnings.is_empty() {
            let _ = write!(output, "\n{} Deferred:\n", "⚠".yellow());
            for warning in &report.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        output.push('\n');
        output
    }

    fn status_text(report: &StatusReport) -> String {
        let mut output = String::new();
        let settings = &report.settings;

        let _ = write!(output, "\nSettings: {}", report.settings_location);
        if !report.settings_saved {
            let _ = write!(output, " {}", "(not saved yet, showing defaults)".dimmed());
        }
        output.push('\n');

        let slurpit = if settings.slurpit_enabled {
            format!("enabled ({})", settings.mode).green().to_string()
        } else {
            "disabled".dimmed().to_string()
        };
        let _ = writeln!(output, "   Slurp'it: {slurpit}");
        let _ = writeln!(output, "   NetBox port: {}", settings.ui_port);
        if settings.slurpit_enabled {
            let _ = writeln!(output, "   Portal port: {}", settings.portal_port);
        }
        let token = if report.token_stored {
            "stored".green().to_string()
        } else {
            "not stored".yellow().to_string()
        };
        let _ = writeln!(output, "   API token: {token}");

        let _ = writeln!(output, "\nDocuments:");
        let rows = report.documents.iter().map(|d| DocumentRow {
            path: d.path.display().to_string(),
            hash: d.hash.clone().unwrap_or_else(|| String::from("unreadable")),
        });
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = writeln!(output, "\nContainers:");
        if let Some(error) = &report.services_error {
            let _ = writeln!(output, "   {} {error}", "✗".red());
        } else if report.services.is_empty() {
            output.push_str("   No containers.\n");
        } else {
            output.push_str(&Table::new(report.services.iter().map(Self::service_row)).to_string());
            output.push('\n');
        }

        if let Some(reachability) = &report.reachability {
            let mark = if reachability.reachable { "✓".green() } else { "✗".red() };
            let _ = writeln!(output, "\n{mark} {reachability}");
        }

        if let Some(lock) = &report.lock {
            let _ = writeln!(
                output,
                "\n{} Locked by {} since {} (lock id {})",
                "⚠".yellow(),
                lock.holder,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                lock.lock_id
            );
        }

        output.push('\n');
        output
    }

    fn service_row(service: &ServiceState) -> ServiceRow {
        ServiceRow {
            service: service.service.clone(),
            name: Self::truncate(&service.name, 30),
            state: Self::format_state(&service.state),
            health: service.health.clone(),
            status: service.status.clone(),
        }
    }

    /// Formats a container state with color.
    fn format_state(state: &str) -> String {
        match state {
            "running" => state.green().to_string(),
            "restarting" | "created" | "paused" => state.yellow().to_string(),
            "exited" | "dead" => state.red().to_string(),
            other => other.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", "✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", "✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", "⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, mark: String, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{mark} {message}"),
        }
    }
}
