//! CloudCull - multi-cloud GPU zombie auditor
//!
//! Finds idle GPU instances across cloud platforms, estimates the money
//! they burn, writes a decommission plan and, when asked, stops them and
//! reconciles infrastructure state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cloudcull_cli::commands::{
    audit::{self, AuditArgs},
    plan::{self, PlanCommands},
};
use cloudcull_cli::config::{AuditConfig, LogFormat};
use cloudcull_cli::output::{print_error, OutputFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CloudCull: multi-cloud GPU zombie auditor
#[derive(Parser)]
#[command(name = "cloudcull")]
#[command(author, version, about = "CloudCull: multi-cloud GPU zombie auditor", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./cloudcull.toml when present)
    #[arg(long, short, env = "CLOUDCULL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Log filter, e.g. `info` or `cull_lib=debug` (RUST_LOG wins when set)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log line format
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Audit GPU resources and plan remediation of zombies
    Audit(AuditArgs),

    /// Inspect remediation manifests
    #[command(subcommand)]
    Plan(PlanCommands),
}

fn init_tracing(config: &AuditConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries tables and JSON documents
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AuditConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Commands::Audit(args) = &cli.command {
        args.apply(&mut config);
    }

    init_tracing(&config);

    match cli.command {
        Commands::Audit(_) => audit::run(config, cli.format).await,
        Commands::Plan(PlanCommands::Show { manifest }) => {
            let path = manifest.unwrap_or_else(|| config.manifest_path.clone());
            plan::show(&path, cli.format)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
