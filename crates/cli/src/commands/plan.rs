//! Inspect a saved remediation manifest

use anyhow::{Context, Result};
use clap::Subcommand;
use cull_lib::remediation::RemediationPlan;
use std::path::{Path, PathBuf};

use crate::output::{print_json, print_plan, OutputFormat};

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Show the resources and suggested actions of a saved manifest
    Show {
        /// Manifest path (defaults to the configured manifest path)
        #[arg(long, short)]
        manifest: Option<PathBuf>,
    },
}

pub fn show(path: &Path, format: OutputFormat) -> Result<()> {
    let plan = RemediationPlan::load(path)
        .with_context(|| format!("Failed to load remediation manifest {:?}", path))?;

    match format {
        OutputFormat::Json => print_json(&plan),
        OutputFormat::Table => print_plan(&plan),
    }
    Ok(())
}
