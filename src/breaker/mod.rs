// Circuit breaker state machine
// One instance guards one external dependency; counters are protected
// per instance so contention on one backend never blocks another.

//! # Circuit Breaker Module
//!
//! Per-dependency state machine that blocks calls to a known-bad dependency
//! until a cooldown elapses, then probes for recovery.
//!
//! ## States
//!
//! - **Closed** (initial): calls allowed; consecutive failures are counted
//!   and `failure_threshold` of them opens the circuit
//! - **Open**: calls rejected immediately with `CircuitOpen`; after
//!   `open_timeout` since the last failure the next state check moves to
//!   half-open
//! - **HalfOpen**: trial calls allowed; `success_threshold` consecutive
//!   successes close the circuit, any single failure re-opens it, and a
//!   stale trial window (`half_open_timeout` without a verdict) counts as a
//!   renewed failure
//!
//! State refresh is evaluated lazily on the next call, never by a timer.
//! The admission check and the outcome recording take the lock separately,
//! so a call can be admitted in the same instant the breaker opens (or be
//! rejected just before it would go half-open). This relaxed two-step
//! guarantee keeps the wrapped operation itself outside any lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{FlowguardError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a single circuit breaker
///
/// All values must be positive; [`CircuitBreakerConfig::validate`] enforces
/// this at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive successes while half-open before the circuit closes
    pub success_threshold: u32,
    /// Cooldown after the last failure before an open circuit admits a probe
    pub open_timeout: Duration,
    /// Maximum age of a half-open trial window before it counts as a failure
    pub half_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(FlowguardError::InvalidConfig(
                "failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(FlowguardError::InvalidConfig(
                "success_threshold must be >= 1".to_string(),
            ));
        }
        if self.open_timeout.is_zero() {
            return Err(FlowguardError::InvalidConfig(
                "open_timeout must be > 0".to_string(),
            ));
        }
        if self.half_open_timeout.is_zero() {
            return Err(FlowguardError::InvalidConfig(
                "half_open_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializable snapshot of a breaker's counters and state
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive failures (meaningful while closed)
    pub failure_count: u32,
    /// Consecutive successes (meaningful while half-open)
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Calls rejected without invoking the wrapped operation
    pub rejected_calls: u64,
    /// total_failures / total_calls, 0.0 when no calls were made
    pub failure_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub times_opened: u64,
    pub times_half_opened: u64,
    pub times_closed: u64,
}

/// Mutable breaker state, guarded by one lock per breaker instance
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    // Instants drive the timeout math, the chrono pair feeds stats
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    // Anchor of the current half-open trial window
    half_open_since: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    rejected_calls: u64,
    times_opened: u64,
    times_half_opened: u64,
    times_closed: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            half_open_since: None,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            rejected_calls: 0,
            times_opened: 0,
            times_half_opened: 0,
            times_closed: 0,
        }
    }
}

/// Per-dependency circuit breaker
///
/// Created once per registered dependency and never destroyed while the
/// process runs; mutated on every call outcome; explicitly resettable.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Invoke `operation` through the breaker.
    ///
    /// Lazily refreshes state first (open -> half-open once the cooldown has
    /// elapsed, stale half-open -> open). While open the call is rejected
    /// with [`FlowguardError::CircuitOpen`] without invoking the operation
    /// and without touching the lifetime call counters beyond rejection
    /// bookkeeping. Otherwise the operation runs outside the lock and its
    /// own error, if any, is forwarded unchanged.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut inner = self.inner.write().await;
            self.refresh_state(&mut inner);
            if inner.state == CircuitState::Open {
                inner.rejected_calls += 1;
                return Err(FlowguardError::CircuitOpen {
                    breaker: self.name.clone(),
                });
            }
            inner.total_calls += 1;
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    /// Pure availability query: true iff a call would currently be
    /// admitted. Never performs a transition itself, so fallback selection
    /// stays side-effect free; an open breaker whose cooldown has elapsed
    /// reports available because the next call's lazy refresh would admit
    /// it as a probe.
    pub async fn is_available(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.state {
            CircuitState::Open => inner
                .last_failure
                .map(|at| at.elapsed() > self.config.open_timeout)
                .unwrap_or(true),
            _ => true,
        }
    }

    /// Current state after a lazy refresh
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.write().await;
        self.refresh_state(&mut inner);
        inner.state
    }

    /// Snapshot of counters, totals and transition counts
    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.read().await;
        let failure_rate = if inner.total_calls == 0 {
            0.0
        } else {
            inner.total_failures as f64 / inner.total_calls as f64
        };
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            rejected_calls: inner.rejected_calls,
            failure_rate,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            times_opened: inner.times_opened,
            times_half_opened: inner.times_half_opened,
            times_closed: inner.times_closed,
        }
    }

    /// Administrative reset: forces closed with all counters cleared.
    /// Not part of the normal call flow.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        *inner = BreakerInner::new();
        info!(breaker = %self.name, "circuit breaker reset to closed");
    }

    /// Lazy state refresh, called with the write lock held.
    fn refresh_state(&self, inner: &mut BreakerInner) {
        match inner.state {
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| at.elapsed() > self.config.open_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.half_open_since = Some(Instant::now());
                    inner.times_half_opened += 1;
                    debug!(breaker = %self.name, "cooldown elapsed, admitting trial calls");
                }
            }
            CircuitState::HalfOpen => {
                // A trial window that outlived half_open_timeout without a
                // verdict counts as a renewed failure.
                let stale = inner
                    .half_open_since
                    .map(|at| at.elapsed() > self.config.half_open_timeout)
                    .unwrap_or(false);
                if stale {
                    self.open(inner);
                    warn!(breaker = %self.name, "half-open trial window went stale, re-opening");
                }
            }
            CircuitState::Closed => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.half_open_since = None;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.times_opened += 1;
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.total_successes += 1;
        inner.last_success_at = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.half_open_since = None;
                    inner.times_closed += 1;
                    info!(breaker = %self.name, "dependency recovered, circuit closed");
                }
            }
            // Relaxed window: the breaker opened while this call was in
            // flight. The lifetime total above is all we record.
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.total_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open(&mut inner);
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
