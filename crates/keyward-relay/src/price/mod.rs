//! Exchange-rate lookup with a short-lived cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use keyward_core::config::ExchangeRateConfig;

use crate::storage::{DatabaseError, StateStore};

/// Errors from fetching or caching the exchange rate.
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Price service returned status {status}")]
    Status { status: u16 },

    #[error("Malformed price response: {0}")]
    Malformed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Source of the current fiat exchange rate.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_rate(&self) -> Result<f64, PriceError>;
}

#[derive(Debug, Deserialize)]
struct RateBody {
    rate: f64,
}

/// Fetches the rate from an HTTP price service.
pub struct HttpPriceSource {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpPriceSource {
    pub fn new(config: &ExchangeRateConfig) -> Result<Self, PriceError> {
        // reqwest is built without a TLS provider; an Err means one is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_rate(&self) -> Result<f64, PriceError> {
        let resp = self.http.get(&self.endpoint).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PriceError::Status {
                status: status.as_u16(),
            });
        }
        let body: RateBody = resp
            .json()
            .await
            .map_err(|e| PriceError::Malformed(e.to_string()))?;
        if !body.rate.is_finite() || body.rate <= 0.0 {
            return Err(PriceError::Malformed(format!("rate {}", body.rate)));
        }
        Ok(body.rate)
    }
}

/// Memoizes the exchange rate in the state store.
#[derive(Clone)]
pub struct ExchangeRateCache {
    source: Arc<dyn PriceSource>,
    ttl: Duration,
}

impl ExchangeRateCache {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self { source, ttl }
    }

    /// Current rate, fetched only when the cached one is older than the TTL.
    ///
    /// A stale cached rate is still served when the fetch fails.
    pub async fn rate(&self, store: &StateStore, now_ms: i64) -> Result<f64, PriceError> {
        let cached = store.cached_exchange_rate().await?;
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);

        if let Some(record) = cached
            && now_ms.saturating_sub(record.fetched_at) < ttl_ms
        {
            debug!(rate = record.rate, "Serving cached exchange rate");
            return Ok(record.rate);
        }

        match self.source.fetch_rate().await {
            Ok(rate) => {
                store.put_exchange_rate(rate, now_ms).await?;
                debug!(rate, "Fetched exchange rate");
                Ok(rate)
            }
            Err(e) => match cached {
                Some(record) => {
                    warn!(error = %e, rate = record.rate, "Price fetch failed, serving stale rate");
                    Ok(record.rate)
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        rate: Option<f64>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(rate: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                rate,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        async fn fetch_rate(&self) -> Result<f64, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rate
                .ok_or_else(|| PriceError::Malformed("unavailable".into()))
        }
    }

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn fresh_cache_skips_fetch() {
        let store = StateStore::open_in_memory().await.unwrap();
        let source = FakeSource::new(Some(50.0));
        let cache = ExchangeRateCache::new(source.clone(), TTL);

        assert!((cache.rate(&store, 1_000).await.unwrap() - 50.0).abs() < f64::EPSILON);
        assert!((cache.rate(&store, 61_000).await.unwrap() - 50.0).abs() < f64::EPSILON);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_cache_refetches() {
        let store = StateStore::open_in_memory().await.unwrap();
        store.put_exchange_rate(40.0, 0).await.unwrap();
        let source = FakeSource::new(Some(55.5));
        let cache = ExchangeRateCache::new(source.clone(), TTL);

        let rate = cache.rate(&store, 301_000).await.unwrap();
        assert!((rate - 55.5).abs() < f64::EPSILON);
        let record = store.cached_exchange_rate().await.unwrap().unwrap();
        assert_eq!(record.fetched_at, 301_000);
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_stale_rate() {
        let store = StateStore::open_in_memory().await.unwrap();
        store.put_exchange_rate(40.0, 0).await.unwrap();
        let cache = ExchangeRateCache::new(FakeSource::new(None), TTL);

        let rate = cache.rate(&store, 900_000).await.unwrap();
        assert!((rate - 40.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failed_fetch_without_cache_is_an_error() {
        let store = StateStore::open_in_memory().await.unwrap();
        let cache = ExchangeRateCache::new(FakeSource::new(None), TTL);
        assert!(cache.rate(&store, 0).await.is_err());
    }
}
