// Failover demo: three simulated AI backends behind the service router.
// The primary backend starts failing, its breaker opens, and traffic
// routes around it until it recovers.

use async_trait::async_trait;
use flowguard::{
    Backend, BackendRequest, CircuitBreakerConfig, FlowguardError, Result, ServiceRouter,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Simulated completion backend whose health can be toggled
struct SimulatedProvider {
    name: String,
    healthy: AtomicBool,
}

impl SimulatedProvider {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            healthy: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Backend for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &BackendRequest) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.healthy.load(Ordering::SeqCst) {
            Ok(json!({
                "provider": self.name,
                "request_id": request.id,
                "completion": format!("response from {}", self.name),
            }))
        } else {
            Err(FlowguardError::Internal(format!(
                "{}: upstream returned 503",
                self.name
            )))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowguard=debug".into()),
        )
        .init();

    let router = ServiceRouter::new();
    let primary = SimulatedProvider::new("primary");
    let secondary = SimulatedProvider::new("secondary");
    let local = SimulatedProvider::new("local");

    let tight = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout: Duration::from_millis(500),
        half_open_timeout: Duration::from_millis(500),
    };
    router
        .register_with_config("primary", Arc::clone(&primary) as Arc<dyn Backend>, tight.clone())
        .await?;
    router
        .register_with_config(
            "secondary",
            Arc::clone(&secondary) as Arc<dyn Backend>,
            tight.clone(),
        )
        .await?;
    router
        .register_with_config("local", Arc::clone(&local) as Arc<dyn Backend>, tight)
        .await?;

    println!("backends: {:?}", router.list_backends().await);
    println!("default: {:?}\n", router.default_backend().await);

    // Healthy dispatches land on the default backend
    for _ in 0..2 {
        let response = router.dispatch(&BackendRequest::new(json!({"prompt": "hi"})), None).await?;
        println!("served by {}", response["provider"]);
    }

    // Primary starts failing; three failures open its breaker
    println!("\n--- primary goes down ---");
    primary.healthy.store(false, Ordering::SeqCst);
    for n in 0..5 {
        let request = BackendRequest::new(json!({"prompt": format!("call {}", n)}));
        match router.dispatch(&request, None).await {
            Ok(response) => println!("served by {}", response["provider"]),
            Err(err) => println!("dispatch failed: {}", err),
        }
    }

    let stats = router.all_breaker_stats().await;
    for name in router.list_backends().await {
        let s = &stats[&name];
        println!(
            "{}: state={} calls={} failures={} rejected={}",
            name, s.state, s.total_calls, s.total_failures, s.rejected_calls
        );
    }

    // After the cooldown the primary recovers through half-open probes
    println!("\n--- primary recovers ---");
    primary.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    for _ in 0..3 {
        let response = router.dispatch(&BackendRequest::new(json!({"prompt": "hi"})), None).await?;
        println!("served by {}", response["provider"]);
    }

    let breaker = router.breaker("primary").await.expect("primary registered");
    println!("\nprimary breaker state: {}", breaker.stats().await.state);

    Ok(())
}
