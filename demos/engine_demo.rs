// Engine demo: registers a flaky workflow and an event-driven one, runs
// concurrent executions through the retry/backoff/timeout policy, then
// prints metrics, history and status.

use flowguard::{EngineConfig, ExecutionEngine, FlowguardError, FnWorkflow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn context_for(workflow: &str) -> HashMap<String, serde_json::Value> {
    HashMap::from([("workflow_name".to_string(), json!(workflow))])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowguard=debug".into()),
        )
        .init();

    let engine = Arc::new(ExecutionEngine::new(EngineConfig {
        max_attempts: 3,
        base_retry_delay: Duration::from_millis(100),
        execution_timeout: Duration::from_secs(2),
        max_history: 1000,
    }));

    // A workflow that fails on its first attempt, then succeeds
    let attempts = Arc::new(AtomicU32::new(0));
    let attempt_counter = Arc::clone(&attempts);
    engine
        .register_workflow(Arc::new(FnWorkflow::new("report", move |_ctx| {
            let counter = Arc::clone(&attempt_counter);
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n % 3 == 1 {
                    Err(FlowguardError::Internal("transient upstream hiccup".to_string()))
                } else {
                    Ok(json!({ "status": "success", "attempt": n }))
                }
            }
        })))
        .await?;

    // An event-driven workflow
    engine
        .register_workflow(Arc::new(
            FnWorkflow::new("audit-log", |ctx| async move {
                Ok(json!({
                    "status": "success",
                    "recorded": ctx.get("event_data").cloned(),
                }))
            })
            .with_events(["order.created", "order.cancelled"]),
        ))
        .await?;

    engine.start().await;
    println!("registered workflows: {:?}\n", engine.list_workflows().await);

    // Concurrent executions of the flaky workflow
    let mut tasks = Vec::new();
    for n in 0..5 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let result = engine.execute("report", context_for("report"), None).await;
            (n, result)
        }));
    }
    for task in tasks {
        let (n, result) = task.await.expect("task join");
        match result {
            Ok(value) => println!("run {} -> {}", n, value),
            Err(err) => println!("run {} -> error: {}", n, err),
        }
    }

    // Event fan-out
    let results = engine
        .process_event("order.created", json!({ "order_id": 1234 }))
        .await;
    println!("\nevent results: {}", json!(results));

    let metrics = engine.get_metrics().await;
    println!(
        "\nmetrics: total={} ok={} failed={} timeout={} success_rate={:.1}%",
        metrics.total_executions,
        metrics.successful_executions,
        metrics.failed_executions,
        metrics.timeout_executions,
        metrics.success_rate_percent,
    );

    for record in engine.get_workflow_history(5).await {
        println!(
            "history: {} {} {:?}",
            record.workflow_name, record.execution_id, record.status
        );
    }

    let status = engine.get_status().await;
    println!("\nstatus: {}", serde_json::to_string_pretty(&status)?);

    engine.stop().await;
    Ok(())
}
