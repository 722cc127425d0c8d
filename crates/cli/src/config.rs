//! Audit configuration
//!
//! Built once at startup from, lowest precedence first: built-in defaults,
//! an optional `cloudcull.toml`, `CLOUDCULL_*` environment variables, then
//! command-line flags.

use anyhow::{Context, Result};
use clap::ValueEnum;
use cull_lib::classify::{BackendSettings, Provider};
use cull_lib::enrichment::EnrichmentConfig;
use cull_lib::pricing::AZURE_RETAIL_PRICES_URL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_NAME: &str = "cloudcull";
pub const ENV_PREFIX: &str = "CLOUDCULL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub region: String,
    /// Use fixture adapters and the deterministic backend
    pub simulated: bool,
    /// Classification provider name or alias
    pub provider: String,
    pub model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub backend_base_url: Option<String>,
    pub backend_timeout_secs: u64,

    pub analysis_workers: usize,
    pub metrics_workers: usize,
    pub attribution_workers: usize,
    pub metrics_batch_size: usize,

    pub dry_run: bool,
    pub active_ops: bool,
    pub auto_approve: bool,

    /// JSON report destination; no report when unset
    pub output: Option<PathBuf>,
    pub manifest_path: PathBuf,
    /// Directory the state tool runs in
    pub state_dir: PathBuf,
    /// Local state file to back up; defaults to `terraform.tfstate` in `state_dir`
    pub state_file: Option<PathBuf>,
    pub state_tool: String,

    /// 0 disables the metrics and health server
    pub metrics_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,

    pub live_pricing: bool,
    pub pricing_url: String,
    /// Replay resources from an inventory file instead of demo fixtures
    pub inventory: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            simulated: false,
            provider: "anthropic".to_string(),
            model: None,
            anthropic_api_key: None,
            openai_api_key: None,
            groq_api_key: None,
            google_api_key: None,
            backend_base_url: None,
            backend_timeout_secs: 60,
            analysis_workers: 10,
            metrics_workers: 10,
            attribution_workers: 20,
            metrics_batch_size: 200,
            dry_run: true,
            active_ops: false,
            auto_approve: false,
            output: None,
            manifest_path: PathBuf::from("config/remediation_manifest.json"),
            state_dir: PathBuf::from("."),
            state_file: None,
            state_tool: "terraform".to_string(),
            metrics_port: 0,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            live_pricing: true,
            pricing_url: AZURE_RETAIL_PRICES_URL.to_string(),
            inventory: None,
        }
    }
}

impl AuditConfig {
    /// Load defaults, the config file and `CLOUDCULL_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let mut loaded: AuditConfig = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        loaded.fill_keys_from_provider_env();
        Ok(loaded)
    }

    /// Fall back to the providers' conventional variables for API keys
    fn fill_keys_from_provider_env(&mut self) {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        if self.anthropic_api_key.is_none() {
            self.anthropic_api_key = from_env("ANTHROPIC_API_KEY");
        }
        if self.openai_api_key.is_none() {
            self.openai_api_key = from_env("OPENAI_API_KEY");
        }
        if self.groq_api_key.is_none() {
            self.groq_api_key = from_env("GROQ_API_KEY");
        }
        if self.google_api_key.is_none() {
            self.google_api_key = from_env("GOOGLE_API_KEY");
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("terraform.tfstate"))
    }

    pub fn enrichment(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            batch_size: self.metrics_batch_size.max(1),
            metrics_workers: self.metrics_workers.max(1),
            attribution_workers: self.attribution_workers.max(1),
        }
    }

    /// Backend settings with the key matching the configured provider
    pub fn backend_settings(&self) -> BackendSettings {
        let api_key = match Provider::from_name(&self.provider) {
            Some(Provider::OpenAi) => self.openai_api_key.clone(),
            Some(Provider::Groq) => self.groq_api_key.clone(),
            Some(Provider::Google) => self.google_api_key.clone(),
            Some(Provider::Simulated) => None,
            // Unknown names fall back to Anthropic
            Some(Provider::Anthropic) | None => self.anthropic_api_key.clone(),
        };

        BackendSettings {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key,
            base_url: self.backend_base_url.clone(),
            simulated: self.simulated,
            timeout: Duration::from_secs(self.backend_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();

        assert!(config.dry_run);
        assert!(!config.active_ops);
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.state_file(), PathBuf::from("./terraform.tfstate"));
        assert_eq!(config.enrichment().attribution_workers, 20);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "provider = \"groq\"\ngroq_api_key = \"gsk-test\"\nanalysis_workers = 4\nlog_format = \"pretty\""
        )
        .unwrap();

        let config = AuditConfig::load_with_prefix(Some(file.path()), "CLOUDCULL_TEST_FILE").unwrap();

        assert_eq!(config.provider, "groq");
        assert_eq!(config.analysis_workers, 4);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.backend_settings().api_key.as_deref(), Some("gsk-test"));
        // Untouched fields keep their defaults
        assert_eq!(config.metrics_batch_size, 200);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "region = \"eu-west-1\"\nsimulated = false").unwrap();
        std::env::set_var("CLOUDCULL_TEST_ENV_SIMULATED", "true");
        std::env::set_var("CLOUDCULL_TEST_ENV_METRICS_PORT", "9108");

        let config = AuditConfig::load_with_prefix(Some(file.path()), "CLOUDCULL_TEST_ENV").unwrap();

        assert_eq!(config.region, "eu-west-1");
        assert!(config.simulated);
        assert_eq!(config.metrics_port, 9108);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AuditConfig::load_with_prefix(
            Some(Path::new("/nonexistent/cloudcull.toml")),
            "CLOUDCULL_TEST_MISSING",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_key_follows_provider_alias() {
        let config = AuditConfig {
            provider: "gpt4".to_string(),
            openai_api_key: Some("sk-test".to_string()),
            anthropic_api_key: Some("ant-test".to_string()),
            ..AuditConfig::default()
        };

        assert_eq!(config.backend_settings().api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_gemini_uses_google_key() {
        use cull_lib::classify::{build_backend, ClassificationBackend};

        let config = AuditConfig {
            provider: "gemini".to_string(),
            google_api_key: Some("g-test".to_string()),
            anthropic_api_key: Some("ant-test".to_string()),
            ..AuditConfig::default()
        };

        let settings = config.backend_settings();
        assert_eq!(settings.api_key.as_deref(), Some("g-test"));

        let backend = build_backend(&settings).unwrap();
        assert_eq!(backend.name(), "gemini-2.0-flash");
    }
}
