//! Output formatting for CLI commands.
//!
//! Every formatter returns a string in the selected format; the binary
//! decides where to print it.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ConfigHasher;
use crate::deployer::DriftReport;
use crate::graph::DependencyGraph;
use crate::model::Deployment;
use crate::planner::{DeploymentPlan, ExecutionResult, OperationKind, OutcomeStatus};
use crate::state::{DeploymentState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
}

/// Execution outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true if the formatter emits JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes. {} resources are up to date.\n",
                "✓".green(),
                plan.len()
            );
        }

        let mut output = String::new();
        let _ = write!(
            output,
            "\nPlan for {} (state serial {}, config {})\n\n",
            plan.deployment_id.bold(),
            plan.state_serial,
            ConfigHasher::short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanRow> = plan
            .operations
            .iter()
            .enumerate()
            .filter(|(_, op)| detailed || op.kind != OperationKind::NoOp)
            .map(|(i, op)| PlanRow {
                index: i + 1,
                operation: Self::format_operation(op.kind),
                resource: op.node_id.clone(),
                kind: op.resource_kind.to_string(),
                dependencies: op.dependencies.join(", "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for op in plan.operations.iter().filter(|op| !op.changes.is_empty()) {
                let _ = writeln!(output, "\n  ~ {}", op.node_id.yellow());
                for change in &op.changes {
                    let _ = writeln!(
                        output,
                        "      {}: {} -> {}",
                        change.field,
                        Self::format_value(change.old_value.as_ref()),
                        Self::format_value(change.new_value.as_ref())
                    );
                }
            }
        }

        let counts = plan.counts();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            counts.create.to_string().green(),
            counts.update.to_string().yellow(),
            counts.delete.to_string().red(),
            counts.noop
        );

        output
    }

    /// Formats the result of executing a plan.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let rows: Vec<OutcomeRow> = result
                    .outcomes
                    .iter()
                    .filter(|o| o.status != OutcomeStatus::Unchanged)
                    .map(|o| OutcomeRow {
                        index: o.index + 1,
                        operation: Self::format_operation(o.operation),
                        resource: o.node_id.clone(),
                        status: Self::format_status(o.status),
                        provider_id: o.provider_id.clone().unwrap_or_default(),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let headline = if result.success() {
                    format!("{} Apply complete", "✓".green())
                } else if result.cancelled {
                    format!("{} Apply cancelled", "⚠".yellow())
                } else {
                    format!("{} Apply failed", "✗".red())
                };
                let _ = writeln!(
                    output,
                    "\n{headline}: {} completed, {} unchanged, {} failed, {} skipped",
                    result.completed(),
                    result.unchanged(),
                    result.failed(),
                    result.skipped()
                );

                if let Some(failure) = &result.failure {
                    let _ = writeln!(output, "   {failure}");
                }

                output
            }
        }
    }

    /// Formats resources in topological order with their edges.
    #[must_use]
    pub fn format_graph(&self, deployment: &Deployment, graph: &DependencyGraph) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "deployment": deployment.id(),
                    "order": graph.topological_order(),
                    "edges": graph
                        .edges()
                        .into_iter()
                        .map(|(dependency, dependent)| {
                            serde_json::json!({ "from": dependency, "to": dependent })
                        })
                        .collect::<Vec<_>>(),
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("\nDependency order for {}:\n\n", deployment.id().bold());
                for (i, id) in graph.topological_order().into_iter().enumerate() {
                    let kind = deployment.get(id).map(|n| n.kind.to_string()).unwrap_or_default();
                    let dependencies = graph.dependencies_of(id);
                    if dependencies.is_empty() {
                        let _ = writeln!(output, "  {:>2}. {id} ({kind})", i + 1);
                    } else {
                        let _ = writeln!(
                            output,
                            "  {:>2}. {id} ({kind}) <- {}",
                            i + 1,
                            dependencies.join(", ").dimmed()
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.has_drift() {
                    let mut output = format!("{} {report}", "⚠".yellow());
                    let _ = write!(
                        output,
                        "\n{}/{} resources have drifted.\n",
                        report.drifted_count(),
                        report.total_recorded
                    );
                    output
                } else {
                    format!("{} {report}\n", "✓".green())
                }
            }
        }
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "state": state, "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}\n\n", state.deployment_id.bold());
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                match lock {
                    Some(lock) if !lock.is_expired() => {
                        let _ = writeln!(output, "   Lock: {}", lock.to_string().yellow());
                    }
                    _ => {
                        let _ = writeln!(output, "   Lock: none");
                    }
                }

                if !state.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            id: r.id.clone(),
                            kind: r.kind.to_string(),
                            provider_id: Self::truncate(&r.provider_id, 40),
                            hash: ConfigHasher::short_hash(&r.properties_hash).to_string(),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {:?} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, level: MessageLevel, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": level.as_str(), "message": message });
                serde_json::to_string(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let marker = match level {
                    MessageLevel::Success => "✓".green(),
                    MessageLevel::Warning => "⚠".yellow(),
                    MessageLevel::Error => "✗".red(),
                };
                format!("{marker} {message}")
            }
        }
    }

    fn format_operation(kind: OperationKind) -> String {
        match kind {
            OperationKind::Create => "+create".green().to_string(),
            OperationKind::Update => "~update".yellow().to_string(),
            OperationKind::Delete => "-delete".red().to_string(),
            OperationKind::NoOp => "noop".dimmed().to_string(),
        }
    }

    fn format_status(status: OutcomeStatus) -> String {
        match status {
            OutcomeStatus::Succeeded => "succeeded".green().to_string(),
            OutcomeStatus::Unchanged => "unchanged".dimmed().to_string(),
            OutcomeStatus::Failed => "failed".red().to_string(),
            OutcomeStatus::Skipped => "skipped".yellow().to_string(),
        }
    }

    fn format_value<T: serde::Serialize>(value: Option<&T>) -> String {
        value.map_or_else(
            || String::from("(absent)"),
            |v| Self::truncate(&serde_json::to_string(v).unwrap_or_default(), 60),
        )
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// Operation succeeded.
    Success,
    /// Something needs attention.
    Warning,
    /// Operation failed.
    Error,
}

impl MessageLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}
