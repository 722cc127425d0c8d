//! The audit command: preflight, pipeline, plan, optional active operations

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use cull_lib::{
    adapter::{PlatformAdapter, SimulatedAdapter},
    audit::{AuditRunner, AuditSettings},
    classify::Classifier,
    health::{components, HealthRegistry},
    observability::{AuditMetrics, StructuredLogger},
    preflight::{PreflightGate, PreflightInput},
    pricing::{AzureRetailPrices, PricingResolver, RetryPolicy},
    remediation::{ActiveOps, Planner, RemediationExecutor, StateStore, TerraformStateStore},
    report::AuditReport,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::AuditConfig;
use crate::output::{
    print_audit, print_info, print_json, print_plan, print_remediation, print_warning, OutputFormat,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Flags overriding the loaded configuration for one run
#[derive(Args, Debug, Default, Clone)]
pub struct AuditArgs {
    /// Cloud region to scan
    #[arg(long)]
    pub region: Option<String>,

    /// Run against demo fixtures with the deterministic classifier
    #[arg(long)]
    pub simulated: bool,

    /// Replay resources from an inventory JSON file
    #[arg(long)]
    pub inventory: Option<PathBuf>,

    /// Classification provider (anthropic, openai, groq, google, simulated; aliases claude, gpt4, llama, gemini)
    #[arg(long)]
    pub provider: Option<String>,

    /// Model override for the classification provider
    #[arg(long)]
    pub model: Option<String>,

    /// Report suggested actions only (default)
    #[arg(long, conflicts_with = "no_dry_run")]
    pub dry_run: bool,

    /// Disable dry-run reporting of suggested actions
    #[arg(long)]
    pub no_dry_run: bool,

    /// Stop zombies and remove them from infrastructure state
    #[arg(long)]
    pub active_ops: bool,

    /// Skip the operator confirmation before active operations
    #[arg(long)]
    pub auto_approve: bool,

    /// Path to save the JSON report
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Path to save the remediation manifest
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Concurrent classification workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Directory containing the Terraform configuration
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// State tool binary
    #[arg(long)]
    pub state_tool: Option<String>,

    /// Use static rates only
    #[arg(long)]
    pub no_live_pricing: bool,

    /// Serve /metrics, /healthz and /readyz on this port (0 disables)
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

impl AuditArgs {
    /// Flags take precedence over file and environment values
    pub fn apply(&self, config: &mut AuditConfig) {
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if self.simulated {
            config.simulated = true;
        }
        if let Some(inventory) = &self.inventory {
            config.inventory = Some(inventory.clone());
        }
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if self.no_dry_run {
            config.dry_run = false;
        }
        if self.active_ops {
            config.active_ops = true;
        }
        if self.auto_approve {
            config.auto_approve = true;
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(manifest) = &self.manifest {
            config.manifest_path = manifest.clone();
        }
        if let Some(workers) = self.workers {
            config.analysis_workers = workers;
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(tool) = &self.state_tool {
            config.state_tool = tool.clone();
        }
        if self.no_live_pricing {
            config.live_pricing = false;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
    }
}

pub async fn run(config: AuditConfig, format: OutputFormat) -> Result<()> {
    let metrics = AuditMetrics::new();
    let health = HealthRegistry::new();
    let logger = StructuredLogger::new(Utc::now().format("%Y%m%dT%H%M%SZ").to_string());

    if config.metrics_port != 0 {
        let state = Arc::new(AppState::new(health.clone(), metrics.clone(), logger.run_id()));
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                warn!(port, error = %e, "Metrics server failed");
            }
        });
    }

    let adapters = load_adapters(&config)?;
    let state_store: Arc<dyn StateStore> = Arc::new(
        TerraformStateStore::new(config.state_tool.clone(), config.state_dir.clone())
            .with_state_file(config.state_file()),
    );

    let mut gate = PreflightGate::new(health.clone());
    let ready = gate
        .check(PreflightInput {
            adapters,
            backend: config.backend_settings(),
            state_store: Some(Arc::clone(&state_store)),
            remediation_requested: config.active_ops,
        })
        .await
        .context("Preflight failed")?;

    let healthy: Vec<String> = ready.adapters.iter().map(|a| a.platform().to_string()).collect();
    let removed: Vec<String> = ready.removed.iter().map(|p| p.to_string()).collect();
    logger.log_preflight(&healthy, &removed);
    logger.log_audit_started(VERSION, ready.backend.name(), ready.adapters.len(), config.active_ops);

    let pricing = Arc::new(build_pricing(&config, &health).await);
    let runner = AuditRunner::new(
        ready.adapters.clone(),
        Classifier::new(Arc::clone(&ready.backend)),
        pricing,
        AuditSettings {
            enrichment: config.enrichment(),
            analysis_workers: config.analysis_workers,
        },
        metrics.clone(),
        logger.clone(),
    );
    let outcome = runner.run().await;

    let zombies = outcome.zombies();
    let mut plan = (!zombies.is_empty()).then(|| Planner.plan(&outcome.records));
    if let Some(plan) = &plan {
        plan.save(&config.manifest_path)
            .with_context(|| format!("Failed to save manifest {:?}", config.manifest_path))?;
    }

    if format == OutputFormat::Table {
        print_audit(&outcome.records, &outcome.summary);
        if let Some(plan) = &plan {
            if config.dry_run {
                print_plan(plan);
            }
            print_info(&format!(
                "Remediation manifest saved to {}",
                config.manifest_path.display()
            ));
        }
    }

    let mut remediation = None;
    if config.active_ops {
        match plan.as_mut() {
            None => info!("No zombies found, nothing to remediate"),
            Some(plan) => {
                if !config.auto_approve && !confirm(plan.resources.len()).await? {
                    print_warning("Active operations aborted by operator");
                } else {
                    let executor = RemediationExecutor::new(Arc::clone(&state_store))
                        .with_metrics(metrics.clone())
                        .with_logger(logger.clone());
                    let report = ActiveOps::new(&ready.adapters, executor)
                        .with_metrics(metrics.clone())
                        .with_logger(logger.clone())
                        .run(plan, &zombies)
                        .await;
                    logger.log_remediation_summary(
                        plan.resources.len(),
                        report.stops_succeeded(),
                        report.removals_succeeded(),
                        report.aborted,
                    );

                    // Keep the manifest in step with the addresses actually removed
                    if let Some(execution) = &report.execution {
                        if plan.record_addresses(execution) > 0 {
                            plan.save(&config.manifest_path).with_context(|| {
                                format!("Failed to update manifest {:?}", config.manifest_path)
                            })?;
                        }
                    }
                    if format == OutputFormat::Table {
                        print_remediation(&report);
                    }
                    remediation = Some(report);
                }
            }
        }
    }

    let mut report = AuditReport::build(&outcome.records, plan.as_ref(), Utc::now());
    if let Some(ops) = &remediation {
        report = report.with_remediation(ops);
    }
    if format == OutputFormat::Json {
        print_json(&report);
    }
    if let Some(path) = &config.output {
        report
            .save(path)
            .with_context(|| format!("Failed to save report {:?}", path))?;
    }

    match &report.remediation {
        Some(section) if !section.is_success() => bail!(
            "Remediation incomplete: {} of {} stopped, {} removed from state",
            section.stopped,
            section.planned,
            section.removed
        ),
        _ => Ok(()),
    }
}

fn load_adapters(config: &AuditConfig) -> Result<Vec<Arc<dyn PlatformAdapter>>> {
    if let Some(path) = &config.inventory {
        return SimulatedAdapter::from_inventory(path)
            .with_context(|| format!("Failed to load inventory {:?}", path));
    }
    if config.simulated {
        return Ok(SimulatedAdapter::demo_set());
    }
    warn!(
        region = %config.region,
        "No cloud SDK integration is built in; use --simulated or --inventory"
    );
    Ok(Vec::new())
}

async fn build_pricing(config: &AuditConfig, health: &HealthRegistry) -> PricingResolver {
    if !config.live_pricing || config.simulated {
        health.set_healthy(components::PRICING).await;
        return PricingResolver::offline();
    }

    match AzureRetailPrices::new(&config.pricing_url, Duration::from_secs(10)) {
        Ok(source) => {
            health.set_healthy(components::PRICING).await;
            PricingResolver::with_live_source(Arc::new(source), RetryPolicy::default())
        }
        Err(e) => {
            warn!(error = %e, "Live pricing unavailable, using static rates");
            health
                .set_degraded(components::PRICING, format!("Live pricing unavailable: {e}"))
                .await;
            PricingResolver::offline()
        }
    }
}

/// Ask the operator on stderr so JSON output on stdout stays clean
async fn confirm(targets: usize) -> Result<bool> {
    tokio::task::spawn_blocking(move || -> Result<bool> {
        eprint!("CRITICAL: Execute automated remediation for {targets} targets? [y/N]: ");
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    })
    .await?
}
