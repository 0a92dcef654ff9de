use crate::provider::{Generation, GenerationRequest, Provider};
use crate::{Error, Result};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Base delay before the second attempt against the same provider.
const BASE_BACKOFF_MS: u64 = 1_000;
/// Hard cap on per-retry backoff.
const MAX_BACKOFF_MS: u64 = 10_000;

pub type FailureCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn(&str, &Generation) + Send + Sync>;

#[derive(Clone)]
pub struct ChainConfig {
    /// Attempts per provider before falling back to the next one.
    pub max_retries: u32,
    /// Hard per-attempt timeout; a timed-out attempt is abandoned.
    pub timeout: Duration,
    /// Keep providers that report unavailable in the working set instead of
    /// skipping them for this call.
    pub try_all: bool,
    pub on_provider_failed: Option<FailureCallback>,
    pub on_provider_success: Option<SuccessCallback>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout: Duration::from_secs(30),
            try_all: false,
            on_provider_failed: None,
            on_provider_success: None,
        }
    }
}

impl ChainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_try_all(mut self, try_all: bool) -> Self {
        self.try_all = try_all;
        self
    }

    pub fn on_provider_failed(mut self, cb: impl Fn(&str, &Error) + Send + Sync + 'static) -> Self {
        self.on_provider_failed = Some(Arc::new(cb));
        self
    }

    pub fn on_provider_success(
        mut self,
        cb: impl Fn(&str, &Generation) + Send + Sync + 'static,
    ) -> Self {
        self.on_provider_success = Some(Arc::new(cb));
        self
    }
}

/// Aggregate statistics across every `generate()` call.
///
/// `success_count + failure_count <= total_requests` holds at all times;
/// a request in flight is counted in `total_requests` only.
#[derive(Debug, Clone, Default)]
pub struct ChainStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub provider_usage: HashMap<String, u64>,
    pub provider_failures: HashMap<String, u64>,
    /// Running average end-to-end latency of successful requests (ms).
    pub avg_latency_ms: f64,
}

/// Ordered fallback chain over interchangeable providers.
///
/// The provider list is mutable at runtime; each `generate()` call operates
/// on an immutable snapshot taken at its start, so list mutations only affect
/// subsequent calls.
pub struct ProviderChain {
    cfg: ChainConfig,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    stats: Mutex<ChainStats>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn Provider>>, cfg: ChainConfig) -> Self {
        Self {
            cfg,
            providers: RwLock::new(providers),
            stats: Mutex::new(ChainStats::default()),
        }
    }

    /// Insert a provider, at `priority` when given (clamped to the list
    /// length), otherwise at the end of the chain.
    pub fn add_provider(&self, provider: Arc<dyn Provider>, priority: Option<usize>) {
        let mut list = self.providers.write().unwrap();
        let index = priority.unwrap_or(list.len()).min(list.len());
        list.insert(index, provider);
    }

    /// Remove a provider by identity. Returns whether one was removed.
    pub fn remove_provider(&self, name: &str) -> bool {
        let mut list = self.providers.write().unwrap();
        let before = list.len();
        list.retain(|p| p.name() != name);
        list.len() != before
    }

    /// Move a provider to `index` (clamped). Returns whether it was found.
    pub fn set_provider_priority(&self, name: &str, index: usize) -> bool {
        let mut list = self.providers.write().unwrap();
        let Some(pos) = list.iter().position(|p| p.name() == name) else {
            return false;
        };
        let provider = list.remove(pos);
        let index = index.min(list.len());
        list.insert(index, provider);
        true
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn stats(&self) -> ChainStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap() = ChainStats::default();
    }

    /// Generate content, trying each available provider in configured order.
    ///
    /// Terminal failures are [`Error::NoAvailableProviders`] (nothing was
    /// even attempted) and [`Error::AllProvidersFailed`] (every attempted
    /// provider exhausted its retries).
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let snapshot: Vec<Arc<dyn Provider>> = self.providers.read().unwrap().clone();
        self.stats.lock().unwrap().total_requests += 1;

        let working = self.probe_availability(&snapshot).await;
        if working.is_empty() {
            self.stats.lock().unwrap().failure_count += 1;
            warn!("no providers available for generation request");
            return Err(Error::NoAvailableProviders);
        }

        let mut failures: Vec<(String, String)> = Vec::new();
        for provider in &working {
            match self.attempt_provider(provider.as_ref(), request).await {
                Ok(generation) => return Ok(generation),
                Err(last_err) => {
                    self.record_failure(provider.name());
                    self.notify_failure(provider.name(), &last_err);
                    info!(
                        provider = provider.name(),
                        error = %last_err,
                        "provider exhausted, falling back"
                    );
                    failures.push((provider.name().to_string(), last_err.to_string()));
                }
            }
        }

        self.stats.lock().unwrap().failure_count += 1;
        Err(Error::AllProvidersFailed { failures })
    }

    /// Probe every provider concurrently; unavailable providers are excluded
    /// from this call's working set unless `try_all` is set.
    async fn probe_availability(&self, snapshot: &[Arc<dyn Provider>]) -> Vec<Arc<dyn Provider>> {
        let probes = snapshot.iter().map(|p| p.check_availability());
        let availability = futures::future::join_all(probes).await;
        snapshot
            .iter()
            .zip(availability)
            .filter_map(|(provider, available)| {
                if available || self.cfg.try_all {
                    Some(Arc::clone(provider))
                } else {
                    debug!(provider = provider.name(), "provider unavailable, skipped");
                    None
                }
            })
            .collect()
    }

    /// Run up to `max_retries` attempts against one provider. Returns the
    /// last error when every attempt fails.
    async fn attempt_provider(
        &self,
        provider: &dyn Provider,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, Error> {
        let attempts = self.cfg.max_retries.max(1);
        let mut last_err = Error::ProviderUnavailable {
            provider: provider.name().to_string(),
        };

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }
            let started = tokio::time::Instant::now();
            match tokio::time::timeout(self.cfg.timeout, provider.generate(request)).await {
                Ok(Ok(generation)) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.record_success(provider.name(), latency_ms);
                    self.notify_success(provider.name(), &generation);
                    debug!(
                        provider = provider.name(),
                        attempt, latency_ms, "generation succeeded"
                    );
                    return Ok(generation);
                }
                Ok(Err(err)) => {
                    warn!(
                        provider = provider.name(),
                        attempt,
                        error = %err,
                        "generation attempt failed"
                    );
                    last_err = err;
                }
                // Attempt abandoned; whatever the provider eventually
                // produces is discarded with the dropped future.
                Err(_) => {
                    let timeout_ms = self.cfg.timeout.as_millis() as u64;
                    warn!(
                        provider = provider.name(),
                        attempt, timeout_ms, "generation attempt timed out"
                    );
                    last_err = Error::AttemptTimeout {
                        provider: provider.name().to_string(),
                        timeout_ms,
                    };
                }
            }
        }
        Err(last_err)
    }

    fn record_success(&self, provider: &str, latency_ms: u64) {
        let mut stats = self.stats.lock().unwrap();
        stats.success_count += 1;
        *stats.provider_usage.entry(provider.to_string()).or_insert(0) += 1;
        let n = stats.success_count as f64;
        stats.avg_latency_ms = (stats.avg_latency_ms * (n - 1.0) + latency_ms as f64) / n;
    }

    fn record_failure(&self, provider: &str) {
        let mut stats = self.stats.lock().unwrap();
        *stats
            .provider_failures
            .entry(provider.to_string())
            .or_insert(0) += 1;
    }

    // Observability hooks must never unwind into the control flow.
    fn notify_failure(&self, provider: &str, err: &Error) {
        if let Some(cb) = &self.cfg.on_provider_failed {
            if catch_unwind(AssertUnwindSafe(|| cb(provider, err))).is_err() {
                warn!(provider, "provider-failed callback panicked");
            }
        }
    }

    fn notify_success(&self, provider: &str, generation: &Generation) {
        if let Some(cb) = &self.cfg.on_provider_success {
            if catch_unwind(AssertUnwindSafe(|| cb(provider, generation))).is_err() {
                warn!(provider, "provider-success callback panicked");
            }
        }
    }
}

/// Capped exponential backoff: `min(1000ms * 2^(attempt-1), 10000ms)` where
/// `attempt` is the 1-based attempt that just failed.
fn backoff_delay(failed_attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(failed_attempt - 1).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}
