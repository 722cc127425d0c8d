//! State reconciliation for stopped resources

use super::{resource_type_for, RemediationPlan};
use crate::error::StateStoreError;
use crate::models::Platform;
use crate::observability::{AuditMetrics, StructuredLogger};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Declarative-infrastructure state the executor reconciles against
#[async_trait]
pub trait StateStore: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backing tool can be invoked at all
    fn is_available(&self) -> bool;

    /// Logical address whose physical id matches, searched through every
    /// module; `None` when no such resource is tracked
    async fn find_address(
        &self,
        resource_type: &str,
        physical_id: &str,
    ) -> Result<Option<String>, StateStoreError>;

    async fn remove(&self, address: &str) -> Result<(), StateStoreError>;

    /// Timestamped copy of the local state; `None` when there is no local state
    async fn backup(&self) -> Result<Option<PathBuf>, StateStoreError>;
}

fn safe_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid id pattern"))
}

/// Whether a resource id may be handed to the state tool
pub fn is_safe_resource_id(id: &str) -> bool {
    safe_id_pattern().is_match(id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryFailure {
    pub resource_id: String,
    pub reason: String,
}

/// Aggregate result of executing a plan
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    /// Resource ids removed from state
    pub removed: Vec<String>,
    /// State address each removed id was found at
    pub addresses: HashMap<String, String>,
    pub failures: Vec<EntryFailure>,
    pub backup: Option<PathBuf>,
}

impl ExecutionSummary {
    pub fn succeeded(&self) -> usize {
        self.removed.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn address_of(&self, id: &str) -> Option<&str> {
        self.addresses.get(id).map(String::as_str)
    }

    /// Zero removals is never a success
    pub fn is_success(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Removes planned resources from infrastructure state, one entry at a time
pub struct RemediationExecutor {
    store: Arc<dyn StateStore>,
    metrics: Option<AuditMetrics>,
    logger: StructuredLogger,
}

impl RemediationExecutor {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            metrics: None,
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_metrics(mut self, metrics: AuditMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn execute(&self, plan: &RemediationPlan) -> ExecutionSummary {
        info!(store = %self.store.name(), entries = plan.resources.len(), "Executing state reconciliation");

        let mut summary = ExecutionSummary::default();
        let mut backed_up = false;

        for entry in &plan.resources {
            let result = self
                .reconcile(&entry.id, entry.platform, &mut backed_up, &mut summary)
                .await;
            match result {
                Ok(address) => {
                    self.record(&entry.id, true, &address);
                    summary.removed.push(entry.id.clone());
                    summary.addresses.insert(entry.id.clone(), address);
                }
                Err(reason) => {
                    self.record(&entry.id, false, &reason);
                    summary.failures.push(EntryFailure {
                        resource_id: entry.id.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "State reconciliation complete"
        );
        summary
    }

    async fn reconcile(
        &self,
        id: &str,
        platform: Platform,
        backed_up: &mut bool,
        summary: &mut ExecutionSummary,
    ) -> Result<String, String> {
        if !is_safe_resource_id(id) {
            error!(resource_id = %id, phase = "validation", "Invalid resource id rejected");
            return Err("resource id failed validation".to_string());
        }

        let resource_type = resource_type_for(platform)
            .ok_or_else(|| format!("no state resource type for platform {platform}"))?;

        let address = self
            .store
            .find_address(resource_type, id)
            .await
            .map_err(|e| format!("state lookup failed: {e}"))?
            .ok_or_else(|| format!("no {resource_type} with id {id} in state"))?;

        // At most once per run, before the first destructive call
        if !*backed_up {
            *backed_up = true;
            match self.store.backup().await {
                Ok(Some(path)) => {
                    info!(path = %path.display(), "State backup created");
                    summary.backup = Some(path);
                }
                Ok(None) => info!("No local state found, skipping backup"),
                Err(e) => warn!(error = %e, "State backup failed, proceeding"),
            }
        }

        self.store
            .remove(&address)
            .await
            .map_err(|e| format!("state removal of {address} failed: {e}"))?;
        Ok(address)
    }

    fn record(&self, id: &str, success: bool, detail: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_remediation("state_rm", success);
        }
        self.logger.log_remediation_step("state_rm", id, success, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemediationPlanEntry;
    use crate::remediation::{PLAN_ACTION, PLAN_VERSION, REMEDIATION_TYPE};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory state keyed by (type, physical id)
    #[derive(Default)]
    struct MockStore {
        addresses: HashMap<(String, String), String>,
        removed: Mutex<Vec<String>>,
        lookups: AtomicUsize,
        backups: AtomicUsize,
        fail_backup: bool,
        fail_remove: bool,
    }

    impl MockStore {
        fn with(entries: &[(&str, &str, &str)]) -> Self {
            Self {
                addresses: entries
                    .iter()
                    .map(|(t, id, addr)| ((t.to_string(), id.to_string()), addr.to_string()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl StateStore for MockStore {
        fn name(&self) -> &str {
            "mock"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn find_address(
            &self,
            resource_type: &str,
            physical_id: &str,
        ) -> Result<Option<String>, StateStoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .addresses
                .get(&(resource_type.to_string(), physical_id.to_string()))
                .cloned())
        }

        async fn remove(&self, address: &str) -> Result<(), StateStoreError> {
            if self.fail_remove {
                return Err(StateStoreError::CommandFailed {
                    code: Some(1),
                    stderr: "state locked".to_string(),
                });
            }
            self.removed.lock().unwrap().push(address.to_string());
            Ok(())
        }

        async fn backup(&self) -> Result<Option<PathBuf>, StateStoreError> {
            self.backups.fetch_add(1, Ordering::SeqCst);
            if self.fail_backup {
                return Err(StateStoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            Ok(Some(PathBuf::from("terraform.tfstate.backup.20240101_000000")))
        }
    }

    fn entry(id: &str, platform: Platform) -> RemediationPlanEntry {
        RemediationPlanEntry {
            id: id.to_string(),
            platform,
            machine_type: "p4d.24xlarge".to_string(),
            owner: "Unknown".to_string(),
            monthly_savings: None,
            savings_potential: "UNKNOWN".to_string(),
            remediation_type: REMEDIATION_TYPE.to_string(),
            suggested_iac_action: String::new(),
            state_address: None,
        }
    }

    fn plan(entries: Vec<RemediationPlanEntry>) -> RemediationPlan {
        RemediationPlan {
            version: PLAN_VERSION.to_string(),
            action: PLAN_ACTION.to_string(),
            timestamp: Utc::now(),
            resources: entries,
        }
    }

    #[test]
    fn test_id_allow_list() {
        assert!(is_safe_resource_id("i-0a1b2c3d"));
        assert!(is_safe_resource_id("mock-vm-gpu-01"));
        assert!(!is_safe_resource_id("i-1; rm -rf /"));
        assert!(!is_safe_resource_id("a.b"));
        assert!(!is_safe_resource_id("vm_1"));
        assert!(!is_safe_resource_id(""));
    }

    #[tokio::test]
    async fn test_invalid_ids_never_reach_store() {
        let store = Arc::new(MockStore::with(&[]));
        let executor = RemediationExecutor::new(store.clone());

        let summary = executor
            .execute(&plan(vec![
                entry("i-1; rm -rf /", Platform::Aws),
                entry("$(whoami)", Platform::Gcp),
            ]))
            .await;

        assert_eq!(summary.failed(), 2);
        assert!(!summary.is_success());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(store.backups.load(Ordering::SeqCst), 0);
        assert!(store.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removes_located_address_not_guessed_one() {
        let store = Arc::new(MockStore::with(&[(
            "aws_instance",
            "i-1",
            "module.training.aws_instance.worker[0]",
        )]));
        let executor = RemediationExecutor::new(store.clone());

        let summary = executor
            .execute(&plan(vec![entry("i-1", Platform::Aws), entry("i-missing", Platform::Aws)]))
            .await;

        assert_eq!(summary.removed, vec!["i-1".to_string()]);
        assert_eq!(
            summary.address_of("i-1"),
            Some("module.training.aws_instance.worker[0]")
        );
        assert_eq!(summary.address_of("i-missing"), None);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].resource_id, "i-missing");
        assert!(summary.is_success());
        assert_eq!(
            *store.removed.lock().unwrap(),
            vec!["module.training.aws_instance.worker[0]".to_string()]
        );
    }

    #[tokio::test]
    async fn test_backup_taken_once_and_failure_not_blocking() {
        let mut store = MockStore::with(&[
            ("aws_instance", "i-1", "aws_instance.a"),
            ("google_compute_instance", "gpu-1", "google_compute_instance.b"),
        ]);
        store.fail_backup = true;
        let store = Arc::new(store);
        let executor = RemediationExecutor::new(store.clone());

        let summary = executor
            .execute(&plan(vec![entry("i-1", Platform::Aws), entry("gpu-1", Platform::Gcp)]))
            .await;

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(store.backups.load(Ordering::SeqCst), 1);
        assert!(summary.backup.is_none());
    }

    #[tokio::test]
    async fn test_failed_removals_are_not_success() {
        let mut store = MockStore::with(&[("aws_instance", "i-1", "aws_instance.a")]);
        store.fail_remove = true;
        let executor = RemediationExecutor::new(Arc::new(store));

        let summary = executor.execute(&plan(vec![entry("i-1", Platform::Aws)])).await;

        assert_eq!(summary.succeeded(), 0);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.is_success());
        assert!(summary.failures[0].reason.contains("state locked"));
    }

    #[tokio::test]
    async fn test_empty_plan_is_not_success() {
        let executor = RemediationExecutor::new(Arc::new(MockStore::default()));
        let summary = executor.execute(&plan(Vec::new())).await;

        assert!(!summary.is_success());
        assert_eq!(summary.failed(), 0);
    }
}
