// Service router for interchangeable external backends
// Each registered backend owns its own circuit breaker; dispatch routes
// around an unavailable backend toward a healthy alternative.

//! # Service Router Module
//!
//! Registry of named interchangeable backends (e.g. multiple AI providers),
//! each guarded by its own [`CircuitBreaker`]. A dispatch resolves its
//! target from the explicit override, the request's own preference, or the
//! configured default, then invokes the backend through its breaker.
//!
//! ## Failover
//!
//! - If the resolved target's breaker reports unavailable, the router scans
//!   the other backends in registration order and substitutes the first
//!   available one (a single substitution, not a scan loop per call).
//! - If the breaker still rejects the call with `CircuitOpen` and a
//!   different backend is available by then, dispatch retries exactly once
//!   against that alternative; otherwise `CircuitOpen` propagates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig};
use crate::{FlowguardError, Result};

/// A routable external backend
///
/// Implementations own their transport; the router only sees an opaque
/// invocable. Failures should surface as crate errors (transport errors can
/// be funneled through `FlowguardError::Backend` via `anyhow`).
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &BackendRequest) -> Result<Value>;
}

/// A request dispatched through the router
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub id: Uuid,
    pub payload: Value,
    /// Backend this request would like to reach, consulted when no explicit
    /// override is passed to dispatch
    pub preferred_backend: Option<String>,
}

impl BackendRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            preferred_backend: None,
        }
    }

    pub fn with_preferred_backend(mut self, backend: impl Into<String>) -> Self {
        self.preferred_backend = Some(backend.into());
        self
    }
}

/// Registration entry: one backend plus its owning breaker
struct BackendEntry {
    backend: Arc<dyn Backend>,
    breaker: Arc<CircuitBreaker>,
    registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct RouterInner {
    entries: HashMap<String, BackendEntry>,
    // Scan order for substitution is registration order
    order: Vec<String>,
    default_backend: Option<String>,
}

/// Registry of named interchangeable backends with breaker-aware dispatch
#[derive(Default)]
pub struct ServiceRouter {
    inner: RwLock<RouterInner>,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `name` with default breaker thresholds
    /// (5 failures / 2 successes / 60s open / 30s half-open).
    /// The first-ever registration becomes the default backend unless one
    /// is already set.
    pub async fn register(&self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Result<()> {
        self.register_with_config(name, backend, CircuitBreakerConfig::default())
            .await
    }

    /// Register a backend with explicit breaker thresholds
    pub async fn register_with_config(
        &self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
        config: CircuitBreakerConfig,
    ) -> Result<()> {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), config)?);
        let mut inner = self.inner.write().await;
        if !inner.entries.contains_key(&name) {
            inner.order.push(name.clone());
        }
        inner.entries.insert(
            name.clone(),
            BackendEntry {
                backend,
                breaker,
                registered_at: Utc::now(),
            },
        );
        if inner.default_backend.is_none() {
            debug!(backend = %name, "first registration becomes the default backend");
            inner.default_backend = Some(name);
        }
        Ok(())
    }

    /// Dispatch a request, resolving the target from the explicit override,
    /// the request's preference, or the default backend.
    pub async fn dispatch(
        &self,
        request: &BackendRequest,
        explicit_backend: Option<&str>,
    ) -> Result<Value> {
        self.dispatch_inner(request, explicit_backend, true).await
    }

    // Boxed future because the reroute path recurses once into dispatch
    fn dispatch_inner<'a>(
        &'a self,
        request: &'a BackendRequest,
        explicit_backend: Option<&'a str>,
        allow_reroute: bool,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let (name, backend, breaker) = {
                let inner = self.inner.read().await;
                let target = explicit_backend
                    .map(str::to_string)
                    .or_else(|| request.preferred_backend.clone())
                    .or_else(|| inner.default_backend.clone())
                    .ok_or_else(|| {
                        FlowguardError::NoBackend("no backend resolved for request".to_string())
                    })?;
                let entry = inner.entries.get(&target).ok_or_else(|| {
                    FlowguardError::NoBackend(format!("backend '{}' is not registered", target))
                })?;
                (
                    target,
                    Arc::clone(&entry.backend),
                    Arc::clone(&entry.breaker),
                )
            };

            // Substitute a healthy alternative before dispatch when the chosen
            // backend's breaker reports unavailable.
            let (name, backend, breaker) = if breaker.is_available().await {
                (name, backend, breaker)
            } else {
                match self.first_available_except(&name).await {
                    Some((alt_name, alt_backend, alt_breaker)) => {
                        warn!(
                            request_id = %request.id,
                            unavailable = %name,
                            substitute = %alt_name,
                            "backend unavailable, substituting"
                        );
                        (alt_name, alt_backend, alt_breaker)
                    }
                    None => (name, backend, breaker),
                }
            };

            let outcome = breaker
                .call(|| async { backend.invoke(request).await })
                .await;

            match outcome {
                Err(FlowguardError::CircuitOpen { breaker: opened }) if allow_reroute => {
                    // Admission raced the breaker opening; retry exactly once
                    // against an alternative that is available now.
                    match self.first_available_except(&name).await {
                        Some((alt_name, _, _)) => {
                            debug!(
                                request_id = %request.id,
                                rejected_by = %opened,
                                retry_on = %alt_name,
                                "circuit open, rerouting once"
                            );
                            self.dispatch_inner(request, Some(&alt_name), false).await
                        }
                        None => Err(FlowguardError::CircuitOpen { breaker: opened }),
                    }
                }
                other => other,
            }
        }
        .boxed()
    }

    /// First registered backend, in registration order, whose breaker is
    /// available and whose name differs from `except`.
    async fn first_available_except(
        &self,
        except: &str,
    ) -> Option<(String, Arc<dyn Backend>, Arc<CircuitBreaker>)> {
        let candidates: Vec<(String, Arc<dyn Backend>, Arc<CircuitBreaker>)> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter(|name| name.as_str() != except)
                .filter_map(|name| {
                    inner.entries.get(name).map(|entry| {
                        (
                            name.clone(),
                            Arc::clone(&entry.backend),
                            Arc::clone(&entry.breaker),
                        )
                    })
                })
                .collect()
        };
        for (name, backend, breaker) in candidates {
            if breaker.is_available().await {
                return Some((name, backend, breaker));
            }
        }
        None
    }

    /// Registered backend names in registration order
    pub async fn list_backends(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    pub async fn get_backend(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .map(|entry| Arc::clone(&entry.backend))
    }

    /// Breaker owned by the named backend, for administration and tests
    pub async fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .map(|entry| Arc::clone(&entry.breaker))
    }

    pub async fn default_backend(&self) -> Option<String> {
        self.inner.read().await.default_backend.clone()
    }

    /// Set the default backend; fails when the name is unregistered
    pub async fn set_default(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.entries.contains_key(name) {
            return Err(FlowguardError::NoBackend(format!(
                "cannot set default: backend '{}' is not registered",
                name
            )));
        }
        inner.default_backend = Some(name.to_string());
        Ok(())
    }

    /// Breaker stats for every registered backend, keyed by name
    pub async fn all_breaker_stats(&self) -> HashMap<String, BreakerStats> {
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = {
            let inner = self.inner.read().await;
            inner
                .entries
                .iter()
                .map(|(name, entry)| (name.clone(), Arc::clone(&entry.breaker)))
                .collect()
        };
        let mut stats = HashMap::new();
        for (name, breaker) in breakers {
            stats.insert(name, breaker.stats().await);
        }
        stats
    }

    /// Registration time of the named backend
    pub async fn registered_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .map(|entry| entry.registered_at)
    }
}
