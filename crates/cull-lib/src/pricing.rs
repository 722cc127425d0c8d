//! Hourly rate resolution
//!
//! Resolution order: live price API (with bounded retry), then the static
//! per-platform table, then the unknown sentinel (`None`). A rate is never
//! invented: callers must treat `None` as "no known rate", not as zero.

use crate::error::PricingError;
use crate::models::Platform;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Baseline hourly USD rates, matched by case-insensitive substring in
/// declared order
pub const STATIC_RATES: &[(Platform, &[(&str, f64)])] = &[
    (
        Platform::Aws,
        &[
            ("p5.48xlarge", 98.32),
            ("p4d.24xlarge", 32.77),
            ("g5.48xlarge", 16.28),
            ("g4dn.xlarge", 0.526),
        ],
    ),
    (
        Platform::Gcp,
        &[
            ("a3-highgpu-8g", 31.02),
            ("a2-highgpu-1g", 3.67),
            ("g2-standard-8", 0.84),
        ],
    ),
    (
        Platform::Azure,
        &[
            ("ND96isr_H100_v5", 33.15),
            ("NC24ads_A100_v4", 3.40),
            ("NC6s_v3", 0.90),
        ],
    ),
];

/// Default endpoint of the Azure Retail Prices API
pub const AZURE_RETAIL_PRICES_URL: &str = "https://prices.azure.com/";

/// Rate from the static table, if any entry matches
pub fn static_rate(platform: Platform, machine_type: &str) -> Option<f64> {
    let machine_type = machine_type.to_lowercase();
    STATIC_RATES
        .iter()
        .find(|(p, _)| *p == platform)
        .and_then(|(_, table)| {
            table
                .iter()
                .find(|(pattern, _)| machine_type.contains(&pattern.to_lowercase()))
        })
        .map(|(_, rate)| *rate)
}

/// Exponential backoff around one idempotent request
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Source of live prices for some platforms
#[async_trait]
pub trait LivePriceSource: Send + Sync {
    fn supports(&self, platform: Platform) -> bool;

    /// Current hourly price; must be positive to be used
    async fn hourly_price(&self, platform: Platform, machine_type: &str) -> Result<f64, PricingError>;
}

#[derive(Debug, Deserialize)]
struct RetailPriceItem {
    #[serde(rename = "retailPrice")]
    retail_price: f64,
}

#[derive(Debug, Deserialize)]
struct RetailPricePage {
    #[serde(rename = "Items", default)]
    items: Vec<RetailPriceItem>,
}

/// Azure Retail Prices API client
pub struct AzureRetailPrices {
    client: Client,
    base_url: Url,
}

impl AzureRetailPrices {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PricingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }
}

#[async_trait]
impl LivePriceSource for AzureRetailPrices {
    fn supports(&self, platform: Platform) -> bool {
        platform == Platform::Azure
    }

    async fn hourly_price(&self, _platform: Platform, machine_type: &str) -> Result<f64, PricingError> {
        let filter = format!(
            "armSkuName eq '{}' and priceType eq 'Consumption' and serviceName eq 'Virtual Machines'",
            machine_type.replace('\'', "")
        );
        let mut url = self.base_url.join("api/retail/prices")?;
        url.query_pairs_mut().append_pair("$filter", &filter);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(PricingError::Status(response.status().as_u16()));
        }

        let page: RetailPricePage = response.json().await?;
        // Several regions may be listed; the first is used
        page.items
            .first()
            .map(|item| item.retail_price)
            .ok_or_else(|| PricingError::NotListed(machine_type.to_string()))
    }
}

/// Multi-tier rate lookup with a per-run cache
pub struct PricingResolver {
    live: Option<Arc<dyn LivePriceSource>>,
    retry: RetryPolicy,
    cache: Mutex<HashMap<(Platform, String), Option<f64>>>,
}

impl PricingResolver {
    /// Resolver using only the static table
    pub fn offline() -> Self {
        Self {
            live: None,
            retry: RetryPolicy::default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_live_source(live: Arc<dyn LivePriceSource>, retry: RetryPolicy) -> Self {
        Self {
            live: Some(live),
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Hourly rate for a machine type, or `None` when no tier knows it
    pub async fn rate(&self, platform: Platform, machine_type: &str) -> Option<f64> {
        let key = (platform, machine_type.to_string());
        if let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return *cached;
        }

        let resolved = match self.live_rate(platform, machine_type).await {
            Some(rate) => Some(rate),
            None => static_rate(platform, machine_type),
        };

        if resolved.is_none() {
            info!(platform = %platform, machine_type = %machine_type, "No known rate, reporting as unknown");
        }

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, resolved);
        resolved
    }

    async fn live_rate(&self, platform: Platform, machine_type: &str) -> Option<f64> {
        let live = self.live.as_ref().filter(|l| l.supports(platform))?;

        for attempt in 1..=self.retry.max_attempts.max(1) {
            match live.hourly_price(platform, machine_type).await {
                Ok(price) if price > 0.0 => {
                    debug!(platform = %platform, machine_type = %machine_type, price, "Live price found");
                    return Some(price);
                }
                Ok(_) | Err(PricingError::NotListed(_)) => return None,
                Err(e) => {
                    warn!(
                        platform = %platform,
                        machine_type = %machine_type,
                        attempt,
                        error = %e,
                        "Live price lookup failed"
                    );
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        warn!(platform = %platform, machine_type = %machine_type, "Live price lookup exhausted retries");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Live source failing a fixed number of times before answering
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        price: f64,
    }

    #[async_trait]
    impl LivePriceSource for FlakySource {
        fn supports(&self, platform: Platform) -> bool {
            platform == Platform::Azure
        }

        async fn hourly_price(&self, _platform: Platform, _machine_type: &str) -> Result<f64, PricingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(PricingError::Status(503))
            } else {
                Ok(self.price)
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_static_table_exact_rate() {
        let resolver = PricingResolver::offline();
        assert_eq!(resolver.rate(Platform::Aws, "p4d.24xlarge").await, Some(32.77));
    }

    #[tokio::test]
    async fn test_unmatched_type_is_unknown() {
        let resolver = PricingResolver::offline();
        assert_eq!(resolver.rate(Platform::Aws, "x9.mega").await, None);
        assert_eq!(resolver.rate(Platform::Azure, "Standard_NC6").await, None);
    }

    #[test]
    fn test_static_match_is_case_insensitive_substring() {
        assert_eq!(static_rate(Platform::Azure, "Standard_nc6s_V3"), Some(0.90));
        assert_eq!(static_rate(Platform::Gcp, "zones/us/a2-highgpu-1g"), Some(3.67));
    }

    #[tokio::test]
    async fn test_live_price_wins_after_retries() {
        let source = Arc::new(FlakySource {
            failures: 2,
            calls: AtomicU32::new(0),
            price: 1.25,
        });
        let resolver = PricingResolver::with_live_source(source.clone(), fast_retry());

        assert_eq!(resolver.rate(Platform::Azure, "NC6s_v3").await, Some(1.25));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_live_exhaustion_degrades_to_static() {
        let source = Arc::new(FlakySource {
            failures: 10,
            calls: AtomicU32::new(0),
            price: 1.25,
        });
        let resolver = PricingResolver::with_live_source(source.clone(), fast_retry());

        assert_eq!(resolver.rate(Platform::Azure, "NC6s_v3").await, Some(0.90));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        // Cached for the rest of the run
        resolver.rate(Platform::Azure, "NC6s_v3").await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_positive_live_price_ignored() {
        let source = Arc::new(FlakySource {
            failures: 0,
            calls: AtomicU32::new(0),
            price: 0.0,
        });
        let resolver = PricingResolver::with_live_source(source, fast_retry());

        assert_eq!(resolver.rate(Platform::Azure, "Standard_NV4").await, None);
    }

    #[test]
    fn test_retry_delays_are_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(4), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_azure_retail_prices_first_item() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/retail/prices")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Items": [{"retailPrice": 3.06}, {"retailPrice": 3.5}]}"#)
            .create_async()
            .await;

        let source = AzureRetailPrices::new(&server.url(), Duration::from_secs(5)).unwrap();
        let price = source.hourly_price(Platform::Azure, "NC6s_v3").await.unwrap();

        assert_eq!(price, 3.06);
    }

    #[tokio::test]
    async fn test_azure_retail_prices_empty_is_not_listed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/retail/prices")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Items": []}"#)
            .create_async()
            .await;

        let source = AzureRetailPrices::new(&server.url(), Duration::from_secs(5)).unwrap();
        let result = source.hourly_price(Platform::Azure, "Unknown_SKU").await;

        assert!(matches!(result, Err(PricingError::NotListed(_))));
    }
}
