//! Console rendering

use clap::ValueEnum;
use colored::Colorize;
use cull_lib::audit::AuditSummary;
use cull_lib::models::{format_usd, Decision, ResourceRecord};
use cull_lib::remediation::{ActiveOpsReport, RemediationPlan};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Instance ID")]
    id: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Cost/Mo")]
    monthly_cost: String,
    #[tabled(rename = "Decision")]
    decision: String,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Savings")]
    savings: String,
    #[tabled(rename = "Suggested Action")]
    action: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Stopped")]
    stopped: String,
    #[tabled(rename = "State Removed")]
    removed: String,
    #[tabled(rename = "State Address")]
    address: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Monthly cost cell; unknown rates never render as zero
pub fn format_monthly_cost(cost: Option<f64>) -> String {
    cost.map(format_usd).unwrap_or_else(|| "UNKNOWN".to_string())
}

pub fn color_decision(decision: Option<Decision>) -> String {
    match decision {
        Some(Decision::Zombie) => "ZOMBIE".red().bold().to_string(),
        Some(Decision::Active) => "ACTIVE".green().to_string(),
        None => "-".dimmed().to_string(),
    }
}

fn color_flag(flag: bool) -> String {
    if flag {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize output: {}", e)),
    }
}

/// Audit table with a savings footer
pub fn print_audit(records: &[ResourceRecord], summary: &AuditSummary) {
    if records.is_empty() {
        println!("{}", "No GPU resources found".yellow());
        return;
    }

    let rows: Vec<AuditRow> = records
        .iter()
        .map(|r| AuditRow {
            platform: r.platform.to_string(),
            id: r.id.clone(),
            owner: r.owner.clone(),
            monthly_cost: format_monthly_cost(r.monthly_cost()),
            decision: color_decision(r.decision),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    println!(
        "{} {} across {} zombie(s)",
        "Potential monthly savings:".bold(),
        format_usd(summary.total_monthly_savings).green().bold(),
        summary.zombies
    );
    if summary.unknown_rate_count > 0 {
        print_warning(&format!(
            "{} zombie(s) have no known rate and are excluded from the total",
            summary.unknown_rate_count
        ));
    }
    if summary.parse_failures > 0 {
        print_warning(&format!(
            "{} classification(s) could not be parsed and were treated as active",
            summary.parse_failures
        ));
    }
}

pub fn print_plan(plan: &RemediationPlan) {
    if plan.is_empty() {
        print_info("Remediation plan is empty");
        return;
    }

    println!("{}", "IaC Remediation Plan".bold());
    let rows: Vec<PlanRow> = plan
        .resources
        .iter()
        .map(|e| PlanRow {
            id: e.id.clone(),
            platform: e.platform.to_string(),
            owner: e.owner.clone(),
            savings: e.savings_potential.clone(),
            action: e.suggested_iac_action.cyan().to_string(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!(
        "{}",
        format!("Generated {}", plan.timestamp.to_rfc3339()).dimmed()
    );
}

pub fn print_remediation(report: &ActiveOpsReport) {
    let rows: Vec<OutcomeRow> = report
        .outcomes
        .iter()
        .map(|o| OutcomeRow {
            id: o.resource_id.clone(),
            stopped: color_flag(o.stop_success),
            removed: color_flag(o.state_removal_success),
            address: o.state_address.clone().unwrap_or_else(|| "-".to_string()),
            error: o.error.clone().unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    if report.aborted {
        print_error("Active operations aborted: no instance was stopped");
        return;
    }
    let message = format!(
        "Stopped {} / removed from state {} of {}",
        report.stops_succeeded(),
        report.removals_succeeded(),
        report.outcomes.len()
    );
    if report.removals_succeeded() > 0 {
        print_success(&message);
    } else {
        print_warning(&message);
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_cost_is_labelled() {
        assert_eq!(format_monthly_cost(None), "UNKNOWN");
        assert_eq!(format_monthly_cost(Some(23_922.1)), "$23,922.10");
    }

    #[test]
    fn test_decision_labels() {
        colored::control::set_override(false);
        assert_eq!(color_decision(Some(Decision::Zombie)), "ZOMBIE");
        assert_eq!(color_decision(Some(Decision::Active)), "ACTIVE");
        assert_eq!(color_decision(None), "-");
    }
}
