//! Shared SMTP circuit breaker.
//!
//! The state lives in the coordination store so that a timeout streak seen by
//! one worker suppresses SMTP for every worker. All keys carry the recovery
//! window as TTL; once they expire the breaker reads as closed again.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CircuitBreakerSettings;
use crate::error::StoreError;
use crate::store::CoordinationStore;

pub const FAILURES_KEY: &str = "smtp_timeout_failures";
pub const STATUS_KEY: &str = "smtp_circuit_status";
pub const LAST_TIMEOUT_KEY: &str = "smtp_last_timeout";
pub const TOTAL_TIMEOUTS_KEY: &str = "smtp_total_timeouts_historical";
pub const TOTAL_DNS_FALLBACKS_KEY: &str = "smtp_total_dns_fallbacks_historical";

const OPEN: &str = "open";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitStatus {
    Closed,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub status: CircuitStatus,
    pub consecutive_smtp_timeouts: u64,
    pub last_timeout_at: Option<String>,
    pub total_timeouts: u64,
    pub total_dns_fallbacks: u64,
    pub threshold: u64,
    pub dns_only_mode: bool,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn CoordinationStore>,
    settings: CircuitBreakerSettings,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: CircuitBreakerSettings) -> Self {
        Self { store, settings }
    }

    pub fn threshold(&self) -> u64 {
        self.settings.threshold
    }

    /// Whether SMTP is currently suppressed.
    pub async fn is_open(&self) -> Result<bool, StoreError> {
        if self.settings.dns_only_mode {
            return Ok(true);
        }
        Ok(self.store.get(STATUS_KEY).await?.as_deref() == Some(OPEN))
    }

    /// Counts one SMTP timeout or connection failure and opens the circuit
    /// once the consecutive count reaches the threshold. Returns the count.
    pub async fn record_smtp_timeout(&self) -> Result<u64, StoreError> {
        let window = self.settings.recovery_window_secs;
        let count = self.store.incr_ex(FAILURES_KEY, window).await?.max(0) as u64;
        self.store
            .set_ex(LAST_TIMEOUT_KEY, &Utc::now().to_rfc3339(), window)
            .await?;
        self.store.incr(TOTAL_TIMEOUTS_KEY).await?;

        if count >= self.settings.threshold {
            let opened = self.store.set_nx_ex(STATUS_KEY, OPEN, window).await?;
            if opened {
                warn!(
                    consecutive_timeouts = count,
                    threshold = self.settings.threshold,
                    recovery_window_secs = window,
                    "smtp circuit opened, falling back to dns-only validation"
                );
            }
        }
        Ok(count)
    }

    /// A completed SMTP handshake. Zeroes the consecutive count; an open
    /// circuit stays open until it expires or is reset.
    pub async fn record_smtp_success(&self) -> Result<(), StoreError> {
        self.store
            .set_ex(FAILURES_KEY, "0", self.settings.recovery_window_secs)
            .await
    }

    /// An SMTP check skipped because the circuit was open.
    pub async fn record_dns_fallback(&self) -> Result<(), StoreError> {
        self.store.incr(TOTAL_DNS_FALLBACKS_KEY).await.map(|_| ())
    }

    /// End-of-unit reset of the consecutive counter.
    pub async fn reset_consecutive(&self) -> Result<(), StoreError> {
        self.record_smtp_success().await
    }

    /// Administrative reset: closes the circuit and zeroes the counter.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store
            .set_ex(FAILURES_KEY, "0", self.settings.recovery_window_secs)
            .await?;
        self.store.delete(&[STATUS_KEY.to_string()]).await?;
        info!("smtp circuit breaker reset");
        Ok(())
    }

    pub async fn state(&self) -> Result<CircuitBreakerState, StoreError> {
        let counter = |raw: Option<String>| {
            raw.and_then(|value| value.parse::<u64>().ok())
                .unwrap_or_default()
        };

        let status = if self.is_open().await? {
            CircuitStatus::Open
        } else {
            CircuitStatus::Closed
        };

        Ok(CircuitBreakerState {
            status,
            consecutive_smtp_timeouts: counter(self.store.get(FAILURES_KEY).await?),
            last_timeout_at: self.store.get(LAST_TIMEOUT_KEY).await?,
            total_timeouts: counter(self.store.get(TOTAL_TIMEOUTS_KEY).await?),
            total_dns_fallbacks: counter(self.store.get(TOTAL_DNS_FALLBACKS_KEY).await?),
            threshold: self.settings.threshold,
            dns_only_mode: self.settings.dns_only_mode,
        })
    }
}
