use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use outreach_core::config::ControlPlaneConfig;
use outreach_core::{Error, Result};

use crate::breaker::CircuitBreaker;

/// Response caches are held at most this long before a refresh is attempted.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

pub(crate) struct CachedValue {
    pub(crate) value: Value,
    pub(crate) fetched_at: Instant,
}

/// Process-wide control-plane state: one circuit breaker plus the two
/// response caches. Shared by every client instance in the process and
/// mutated only by the client's own success/failure recorders. Tests inject
/// a fresh instance instead of the shared one.
pub struct ControlPlaneState {
    pub breaker: CircuitBreaker,
    rate_limits: Mutex<Option<CachedValue>>,
    feature_flags: Mutex<Option<CachedValue>>,
}

impl ControlPlaneState {
    pub fn new() -> Self {
        Self {
            breaker: CircuitBreaker::default(),
            rate_limits: Mutex::new(None),
            feature_flags: Mutex::new(None),
        }
    }

    /// The process-wide instance, surviving across client constructions.
    pub fn shared() -> Arc<ControlPlaneState> {
        static SHARED: OnceLock<Arc<ControlPlaneState>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(ControlPlaneState::new())).clone()
    }

    /// Test hook: closed breaker, empty caches.
    pub fn reset(&self) {
        self.breaker.reset();
        *lock_cache(&self.rate_limits) = None;
        *lock_cache(&self.feature_flags) = None;
    }

    pub(crate) fn cached_rate_limits(&self, require_fresh: bool) -> Option<Value> {
        read_cache(&self.rate_limits, require_fresh)
    }

    pub(crate) fn store_rate_limits(&self, value: Value) {
        *lock_cache(&self.rate_limits) = Some(CachedValue {
            value,
            fetched_at: Instant::now(),
        });
    }

    #[cfg(test)]
    pub(crate) fn store_rate_limits_at(&self, value: Value, fetched_at: Instant) {
        *lock_cache(&self.rate_limits) = Some(CachedValue { value, fetched_at });
    }

    pub(crate) fn cached_feature_flags(&self, require_fresh: bool) -> Option<Value> {
        read_cache(&self.feature_flags, require_fresh)
    }

    pub(crate) fn store_feature_flags(&self, value: Value) {
        *lock_cache(&self.feature_flags) = Some(CachedValue {
            value,
            fetched_at: Instant::now(),
        });
    }
}

impl Default for ControlPlaneState {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_cache(cache: &Mutex<Option<CachedValue>>) -> std::sync::MutexGuard<'_, Option<CachedValue>> {
    match cache.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_cache(cache: &Mutex<Option<CachedValue>>, require_fresh: bool) -> Option<Value> {
    let guard = lock_cache(cache);
    guard.as_ref().and_then(|c| {
        if !require_fresh || c.fetched_at.elapsed() < CACHE_TTL {
            Some(c.value.clone())
        } else {
            None
        }
    })
}

/// The default flag set used whenever the control plane cannot answer:
/// free tier, every premium feature off.
pub fn default_feature_flags() -> Value {
    json!({
        "tier": "free",
        "features": {
            "aiMessaging": false,
            "bulkOperations": false,
            "advancedAnalytics": false,
            "prioritySupport": false,
            "deepResearch": false,
        },
        "quotas": {},
        "rateLimits": {},
    })
}

/// Circuit-breaker-wrapped client for the remote control plane (dynamic rate
/// limits, usage metering, feature flags).
///
/// Every capability degrades to a safe default when the endpoint is
/// unconfigured, the circuit is open, or the call fails. The one deliberate
/// exception: `report_usage` surfaces a 429 as [`Error::QuotaExceeded`] —
/// and that response counts as a breaker *success*, because the service
/// answered correctly.
pub struct ControlPlaneClient {
    base_url: Option<String>,
    deployment_id: Option<String>,
    http: reqwest::Client,
    state: Arc<ControlPlaneState>,
}

impl ControlPlaneClient {
    pub fn new(config: &ControlPlaneConfig) -> Self {
        Self::with_state(config, ControlPlaneState::shared())
    }

    pub fn with_state(config: &ControlPlaneConfig, state: Arc<ControlPlaneState>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        let base_url = config
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string());
        Self {
            base_url,
            deployment_id: config.deployment_id.clone(),
            http,
            state,
        }
    }

    pub fn breaker_snapshot(&self) -> Value {
        self.state.breaker.snapshot()
    }

    /// Fetch dynamic rate limits, cached for five minutes. On any failure
    /// the last-known cache (possibly `None`) comes back — never an error.
    pub async fn sync_rate_limits(&self) -> Option<Value> {
        let base = self.base_url.as_ref()?;
        if let Some(cached) = self.state.cached_rate_limits(true) {
            return Some(cached);
        }
        if !self.state.breaker.try_acquire() {
            debug!("Circuit open, serving last-known rate limits");
            return self.state.cached_rate_limits(false);
        }

        let request = self
            .http
            .get(format!("{}/rate-limits", base))
            .query(&self.deployment_query());
        match request.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => {
                    self.state.breaker.record_success();
                    self.state.store_rate_limits(body.clone());
                    Some(body)
                }
                Err(e) => {
                    warn!(error = %e, "Rate-limit response was not JSON");
                    self.state.breaker.record_failure();
                    self.state.cached_rate_limits(false)
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "Rate-limit sync failed");
                self.state.breaker.record_failure();
                self.state.cached_rate_limits(false)
            }
            Err(e) => {
                warn!(error = %e, "Rate-limit sync failed");
                self.state.breaker.record_failure();
                self.state.cached_rate_limits(false)
            }
        }
    }

    /// Fire-and-forget usage telemetry. Never errors, never blocks the
    /// caller beyond the short request timeout.
    pub async fn report_interaction(&self, operation: &str, metadata: Value) {
        let Some(base) = self.base_url.as_ref() else {
            return;
        };
        if !self.state.breaker.try_acquire() {
            return;
        }
        let body = json!({
            "operation": operation,
            "metadata": metadata,
            "deploymentId": self.deployment_id,
        });
        match self
            .http
            .post(format!("{}/report-interaction", base))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => self.state.breaker.record_success(),
            Ok(resp) => {
                debug!(status = %resp.status(), operation, "report-interaction rejected");
                self.state.breaker.record_failure();
            }
            Err(e) => {
                debug!(error = %e, operation, "report-interaction failed");
                self.state.breaker.record_failure();
            }
        }
    }

    /// The enforcement point. A 429 becomes [`Error::QuotaExceeded`]; any
    /// other failure degrades to "allowed" — availability over strictness.
    pub async fn report_usage(&self, operation: &str, count: u64, metadata: Value) -> Result<()> {
        let Some(base) = self.base_url.as_ref() else {
            return Ok(());
        };
        if !self.state.breaker.try_acquire() {
            debug!(operation, "Circuit open, allowing usage without metering");
            return Ok(());
        }
        let body = json!({
            "operation": operation,
            "count": count,
            "metadata": metadata,
            "deploymentId": self.deployment_id,
        });
        match self
            .http
            .post(format!("{}/report-usage", base))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().as_u16() == 429 => {
                // The service answered correctly; this is not a breaker failure.
                self.state.breaker.record_success();
                let body = resp.json::<Value>().await.unwrap_or(Value::Null);
                Err(quota_exceeded_error(operation, &body))
            }
            Ok(resp) if resp.status().is_success() => {
                self.state.breaker.record_success();
                Ok(())
            }
            Ok(resp) => {
                warn!(status = %resp.status(), operation, "report-usage failed, allowing");
                self.state.breaker.record_failure();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, operation, "report-usage failed, allowing");
                self.state.breaker.record_failure();
                Ok(())
            }
        }
    }

    /// Advisory quota read. Degrades to "unknown, do not block".
    pub async fn get_quota_status(&self, operation: &str) -> Value {
        let fallback = json!({"allowed": true, "remaining": -1});
        let Some(base) = self.base_url.as_ref() else {
            return fallback;
        };
        if !self.state.breaker.try_acquire() {
            return fallback;
        }
        let body = json!({
            "operation": operation,
            "deploymentId": self.deployment_id,
        });
        match self
            .http
            .post(format!("{}/quota-status", base))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(status) => {
                    self.state.breaker.record_success();
                    status
                }
                Err(_) => {
                    self.state.breaker.record_failure();
                    fallback
                }
            },
            Ok(_) => {
                self.state.breaker.record_failure();
                fallback
            }
            Err(e) => {
                debug!(error = %e, operation, "quota-status failed, not blocking");
                self.state.breaker.record_failure();
                fallback
            }
        }
    }

    /// Feature flags, cached for five minutes. Unconfigured, circuit-open,
    /// and error paths all land on the fixed free-tier default set.
    pub async fn get_feature_flags(&self, force_refresh: bool) -> Value {
        let Some(base) = self.base_url.as_ref() else {
            return default_feature_flags();
        };
        if !force_refresh {
            if let Some(cached) = self.state.cached_feature_flags(true) {
                return cached;
            }
        }
        if !self.state.breaker.try_acquire() {
            return self
                .state
                .cached_feature_flags(false)
                .unwrap_or_else(default_feature_flags);
        }

        let request = self
            .http
            .get(format!("{}/feature-flags", base))
            .query(&self.deployment_query());
        match request.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(flags) => {
                    self.state.breaker.record_success();
                    self.state.store_feature_flags(flags.clone());
                    flags
                }
                Err(_) => {
                    self.state.breaker.record_failure();
                    self.state
                        .cached_feature_flags(false)
                        .unwrap_or_else(default_feature_flags)
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "feature-flags fetch failed");
                self.state.breaker.record_failure();
                self.state
                    .cached_feature_flags(false)
                    .unwrap_or_else(default_feature_flags)
            }
            Err(e) => {
                warn!(error = %e, "feature-flags fetch failed");
                self.state.breaker.record_failure();
                self.state
                    .cached_feature_flags(false)
                    .unwrap_or_else(default_feature_flags)
            }
        }
    }

    fn deployment_query(&self) -> Vec<(&'static str, String)> {
        self.deployment_id
            .as_ref()
            .map(|id| vec![("deploymentId", id.clone())])
            .unwrap_or_default()
    }
}

fn quota_exceeded_error(operation: &str, body: &Value) -> Error {
    let message = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("Quota exceeded")
        .to_string();
    Error::QuotaExceeded {
        operation: operation.to_string(),
        message,
    }
}
