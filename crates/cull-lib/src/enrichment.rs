//! Telemetry and owner attribution enrichment
//!
//! Telemetry uses one batched call per chunk of resources where the adapter
//! supports it, and concurrent per-resource calls otherwise. Owners are read
//! from tags/labels first; only resources without an owner tag fall back to
//! the slower audit-log lookup, dispatched across a bounded worker pool.
//! A failure for one resource leaves that resource with the sentinel values.

use crate::adapter::PlatformAdapter;
use crate::error::AdapterError;
use crate::models::{Platform, ResourceRecord, Telemetry, UNKNOWN_OWNER};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Tag keys holding the owner, in precedence order.
/// Keys are compared case-insensitively with `-` and `_` ignored.
pub const ATTRIBUTION_TAG_KEYS: &[&str] = &["owner", "created-by", "creator", "user"];

/// Configuration for the enrichment phase
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Maximum resources covered by one batched telemetry call
    pub batch_size: usize,
    /// Concurrent per-resource telemetry calls
    pub metrics_workers: usize,
    /// Concurrent audit-log attribution lookups
    pub attribution_workers: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            metrics_workers: 10,
            attribution_workers: 20,
        }
    }
}

/// Batches and parallelizes per-resource enrichment
pub struct Aggregator {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    config: EnrichmentConfig,
}

impl Aggregator {
    pub fn new(adapters: &[Arc<dyn PlatformAdapter>], config: EnrichmentConfig) -> Self {
        Self {
            adapters: adapters
                .iter()
                .map(|a| (a.platform(), a.clone()))
                .collect(),
            config,
        }
    }

    /// Attach telemetry and owner to every record
    pub async fn enrich(&self, mut records: Vec<ResourceRecord>) -> Vec<ResourceRecord> {
        let telemetry = self.collect_telemetry(&records).await;
        let owners = self.collect_owners(&records).await;

        for ((record, t), owner) in records.iter_mut().zip(telemetry).zip(owners) {
            record.telemetry = t;
            record.owner = owner;
        }

        records
    }

    async fn collect_telemetry(&self, records: &[ResourceRecord]) -> Vec<Telemetry> {
        let mut out = vec![Telemetry::default(); records.len()];

        for (platform, indices) in group_by_platform(records) {
            let Some(adapter) = self.adapters.get(&platform) else {
                warn!(
                    platform = %platform,
                    phase = "telemetry",
                    "No adapter for platform, using zero telemetry"
                );
                continue;
            };

            if adapter.supports_batch_metrics() {
                self.batched_telemetry(adapter, records, &indices, &mut out)
                    .await;
            } else {
                self.concurrent_telemetry(adapter, records, indices, &mut out)
                    .await;
            }
        }

        out
    }

    async fn batched_telemetry(
        &self,
        adapter: &Arc<dyn PlatformAdapter>,
        records: &[ResourceRecord],
        indices: &[usize],
        out: &mut [Telemetry],
    ) {
        for chunk in indices.chunks(self.config.batch_size.max(1)) {
            let ids: Vec<String> = chunk.iter().map(|&i| records[i].id.clone()).collect();
            debug!(platform = %adapter.platform(), batch = ids.len(), "Fetching batched telemetry");

            match adapter.batch_metrics(&ids).await {
                Ok(by_id) => {
                    for &i in chunk {
                        match by_id.get(&records[i].id) {
                            Some(t) => out[i] = *t,
                            None => warn!(
                                resource_id = %records[i].id,
                                phase = "telemetry",
                                "Batched telemetry missing resource, using zero telemetry"
                            ),
                        }
                    }
                }
                Err(e) => error!(
                    platform = %adapter.platform(),
                    phase = "telemetry",
                    batch = ids.len(),
                    error = %e,
                    "Batched telemetry failed, using zero telemetry for batch"
                ),
            }
        }
    }

    async fn concurrent_telemetry(
        &self,
        adapter: &Arc<dyn PlatformAdapter>,
        records: &[ResourceRecord],
        indices: Vec<usize>,
        out: &mut [Telemetry],
    ) {
        let results: Vec<(usize, Result<Telemetry, AdapterError>)> = stream::iter(indices)
            .map(|i| {
                let adapter = adapter.clone();
                let id = records[i].id.clone();
                let metadata = records[i].metadata.clone();
                async move { (i, adapter.metrics(&id, &metadata).await) }
            })
            .buffer_unordered(self.config.metrics_workers.max(1))
            .collect()
            .await;

        for (i, result) in results {
            match result {
                Ok(t) => out[i] = t,
                Err(e) => error!(
                    resource_id = %records[i].id,
                    phase = "telemetry",
                    error = %e,
                    "Telemetry fetch failed, using zero telemetry"
                ),
            }
        }
    }

    async fn collect_owners(&self, records: &[ResourceRecord]) -> Vec<String> {
        let mut out = vec![UNKNOWN_OWNER.to_string(); records.len()];
        let mut fallback = Vec::new();

        for (i, record) in records.iter().enumerate() {
            match owner_from_tags(&record.metadata) {
                Some(owner) => out[i] = owner,
                None => fallback.push(i),
            }
        }

        if fallback.is_empty() {
            return out;
        }

        debug!(count = fallback.len(), "Falling back to audit-log attribution");

        let results: Vec<(usize, String)> = stream::iter(fallback)
            .map(|i| {
                let record = &records[i];
                let adapter = self.adapters.get(&record.platform).cloned();
                let id = record.id.clone();
                let metadata = record.metadata.clone();
                async move {
                    let Some(adapter) = adapter else {
                        return (i, UNKNOWN_OWNER.to_string());
                    };
                    match adapter.attribution(&id, &metadata).await {
                        Ok(owner) if !owner.trim().is_empty() => (i, owner),
                        Ok(_) => (i, UNKNOWN_OWNER.to_string()),
                        Err(e) => {
                            warn!(
                                resource_id = %id,
                                phase = "attribution",
                                error = %e,
                                "Audit-log attribution failed"
                            );
                            (i, UNKNOWN_OWNER.to_string())
                        }
                    }
                }
            })
            .buffer_unordered(self.config.attribution_workers.max(1))
            .collect()
            .await;

        for (i, owner) in results {
            out[i] = owner;
        }

        out
    }
}

fn group_by_platform(records: &[ResourceRecord]) -> Vec<(Platform, Vec<usize>)> {
    let mut groups: Vec<(Platform, Vec<usize>)> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        match groups.iter_mut().find(|(p, _)| *p == record.platform) {
            Some((_, indices)) => indices.push(i),
            None => groups.push((record.platform, vec![i])),
        }
    }
    groups
}

fn normalize_tag_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Owner taken from resource tags or labels, without any remote call
///
/// Understands the AWS `Tags: [{Key, Value}]` list and the `tags`/`labels`
/// maps used by Azure and GCP. When several owner keys are present the first
/// in [`ATTRIBUTION_TAG_KEYS`] order wins.
pub fn owner_from_tags(metadata: &Value) -> Option<String> {
    let mut tags: HashMap<String, String> = HashMap::new();

    for field in ["Tags", "tags", "labels", "Labels"] {
        match metadata.get(field) {
            Some(Value::Array(items)) => {
                for item in items {
                    let key = item.get("Key").or_else(|| item.get("key"));
                    let value = item.get("Value").or_else(|| item.get("value"));
                    if let (Some(Value::String(k)), Some(Value::String(v))) = (key, value) {
                        tags.entry(normalize_tag_key(k)).or_insert_with(|| v.clone());
                    }
                }
            }
            Some(Value::Object(map)) => {
                for (k, v) in map {
                    if let Value::String(v) = v {
                        tags.entry(normalize_tag_key(k)).or_insert_with(|| v.clone());
                    }
                }
            }
            _ => {}
        }
    }

    ATTRIBUTION_TAG_KEYS
        .iter()
        .filter_map(|key| tags.get(&normalize_tag_key(key)))
        .find(|v| !v.trim().is_empty())
        .cloned()
}
