//! Terraform-backed state store

use super::executor::StateStore;
use crate::error::StateStoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

pub const DEFAULT_BINARY: &str = "terraform";
pub const DEFAULT_STATE_FILE: &str = "terraform.tfstate";

/// Reconciles against a Terraform working directory via the CLI
pub struct TerraformStateStore {
    binary: String,
    working_dir: PathBuf,
    state_file: PathBuf,
    /// `terraform show -json`, read once per run
    state: OnceCell<Value>,
}

impl TerraformStateStore {
    pub fn new(binary: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            binary: binary.into(),
            state_file: working_dir.join(DEFAULT_STATE_FILE),
            working_dir,
            state: OnceCell::new(),
        }
    }

    pub fn with_state_file(mut self, state_file: impl Into<PathBuf>) -> Self {
        self.state_file = state_file.into();
        self
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    async fn run(&self, args: &[&str]) -> Result<String, StateStoreError> {
        debug!(binary = %self.binary, ?args, "Invoking state tool");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StateStoreError::ToolMissing(self.binary.clone()),
                _ => StateStoreError::Io(e),
            })?;

        if !output.status.success() {
            return Err(StateStoreError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn state(&self) -> Result<&Value, StateStoreError> {
        self.state
            .get_or_try_init(|| async {
                let stdout = self.run(&["show", "-json"]).await?;
                Ok::<Value, StateStoreError>(serde_json::from_str(&stdout)?)
            })
            .await
    }
}

#[async_trait]
impl StateStore for TerraformStateStore {
    fn name(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn find_address(
        &self,
        resource_type: &str,
        physical_id: &str,
    ) -> Result<Option<String>, StateStoreError> {
        let state = self.state().await?;
        Ok(find_address_in_state(state, resource_type, physical_id))
    }

    async fn remove(&self, address: &str) -> Result<(), StateStoreError> {
        self.run(&["state", "rm", address]).await.map(|_| ())
    }

    async fn backup(&self) -> Result<Option<PathBuf>, StateStoreError> {
        if !tokio::fs::try_exists(&self.state_file).await? {
            return Ok(None);
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut name = self.state_file.as_os_str().to_owned();
        name.push(format!(".backup.{stamp}"));
        let backup = PathBuf::from(name);
        tokio::fs::copy(&self.state_file, &backup).await?;
        Ok(Some(backup))
    }
}

/// Search `values.root_module` and every nested `child_modules` entry for a
/// resource of `resource_type` whose `values.id` equals `physical_id`
pub fn find_address_in_state(state: &Value, resource_type: &str, physical_id: &str) -> Option<String> {
    fn search(module: &Value, resource_type: &str, physical_id: &str) -> Option<String> {
        let direct = module
            .get("resources")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|r| {
                r.get("type").and_then(Value::as_str) == Some(resource_type)
                    && r.pointer("/values/id").and_then(Value::as_str) == Some(physical_id)
            })
            .and_then(|r| r.get("address").and_then(Value::as_str))
            .map(str::to_string);

        direct.or_else(|| {
            module
                .get("child_modules")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .find_map(|child| search(child, resource_type, physical_id))
        })
    }

    search(state.pointer("/values/root_module")?, resource_type, physical_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Value {
        json!({
            "format_version": "1.0",
            "values": {
                "root_module": {
                    "resources": [
                        {"address": "aws_instance.bastion", "type": "aws_instance", "values": {"id": "i-bastion"}},
                        {"address": "aws_security_group.gpu", "type": "aws_security_group", "values": {"id": "i-1"}}
                    ],
                    "child_modules": [
                        {
                            "address": "module.training",
                            "child_modules": [
                                {
                                    "address": "module.training.module.workers",
                                    "resources": [
                                        {
                                            "address": "module.training.module.workers.aws_instance.gpu[0]",
                                            "type": "aws_instance",
                                            "values": {"id": "i-1"}
                                        }
                                    ]
                                }
                            ]
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn test_finds_address_in_nested_modules() {
        assert_eq!(
            find_address_in_state(&state(), "aws_instance", "i-1").as_deref(),
            Some("module.training.module.workers.aws_instance.gpu[0]")
        );
        assert_eq!(
            find_address_in_state(&state(), "aws_instance", "i-bastion").as_deref(),
            Some("aws_instance.bastion")
        );
    }

    #[test]
    fn test_type_must_match_as_well_as_id() {
        assert_eq!(
            find_address_in_state(&state(), "google_compute_instance", "i-1"),
            None
        );
    }

    #[test]
    fn test_empty_state_finds_nothing() {
        assert_eq!(find_address_in_state(&json!({}), "aws_instance", "i-1"), None);
        assert_eq!(
            find_address_in_state(&json!({"values": {"root_module": {}}}), "aws_instance", "i-1"),
            None
        );
    }

    #[tokio::test]
    async fn test_backup_copies_state_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_STATE_FILE), r#"{"version": 4}"#).unwrap();
        let store = TerraformStateStore::new(DEFAULT_BINARY, dir.path());

        let backup = store.backup().await.unwrap().unwrap();

        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("terraform.tfstate.backup."));
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), r#"{"version": 4}"#);
    }

    #[tokio::test]
    async fn test_backup_without_local_state_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = TerraformStateStore::new(DEFAULT_BINARY, dir.path());

        assert!(store.backup().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = TerraformStateStore::new("definitely-not-a-terraform-binary", dir.path());

        assert!(!store.is_available());
        let result = store.remove("aws_instance.a").await;
        assert!(matches!(result, Err(StateStoreError::ToolMissing(_))));
    }
}
