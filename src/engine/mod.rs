// Execution engine
// Registry of named workflows, executed under a retry/backoff/timeout
// policy with thread-safe metrics and a size-bounded history.

//! # Execution Engine Module
//!
//! The engine is a passive coordinator: it validates the caller's context,
//! spawns each attempt of a workflow body as an independently cancellable
//! task, bounds it with the engine-wide per-attempt timeout, and retries
//! failures with exponential backoff. It suspends only at three points:
//! the backoff delay before a retry, the wait for a workflow body to finish
//! or hit its timeout, and the wait for `stop()` to observe cancellation of
//! all in-flight work.
//!
//! ## Module Components
//!
//! - `workflow`: the [`Workflow`] trait and a closure-backed helper
//! - `context`: [`ExecutionContext`] validation and sanitization
//! - `metrics`: [`EngineMetrics`] and its serializable snapshot
//! - `history`: the FIFO-bounded [`ExecutionRecord`] store
//!
//! Within one `execute()` call attempts are strictly sequential; across
//! calls executions interleave arbitrarily. The in-flight map, metrics and
//! history each sit behind their own lock, and no lock is ever held across
//! a workflow body await.

pub mod context;
pub mod history;
pub mod metrics;
pub mod workflow;

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{FlowguardError, Result};
use context::ExecutionContext;
use history::{ExecutionHistory, ExecutionRecord};
use metrics::{EngineMetrics, MetricsSnapshot};
use workflow::Workflow;

/// Engine-wide execution policy
///
/// The per-attempt timeout applies uniformly to every attempt of every
/// workflow; it is not configurable per workflow.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per `execute()` call before a terminal error
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_retry_delay: Duration,
    /// Time budget for a single attempt
    pub execution_timeout: Duration,
    /// FIFO bound of the execution history
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_retry_delay: Duration::from_secs(5),
            execution_timeout: Duration::from_secs(60),
            max_history: 1000,
        }
    }
}

/// Serializable status report, taken as one consistent snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub registered_workflows: usize,
    pub in_flight_executions: usize,
    pub metrics: MetricsSnapshot,
}

/// Outcome of a single attempt; the retry loop branches on the variant
/// instead of relying on error propagation.
enum AttemptOutcome {
    Completed(Value),
    Failed(FlowguardError),
    TimedOut,
}

/// Registry of named workflow definitions with a fault-tolerant executor
pub struct ExecutionEngine {
    config: EngineConfig,
    running: AtomicBool,
    workflows: RwLock<HashMap<String, Arc<dyn Workflow>>>,
    in_flight: Mutex<HashMap<String, JoinHandle<()>>>,
    history: Mutex<ExecutionHistory>,
    metrics: Mutex<EngineMetrics>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let max_history = config.max_history;
        Self {
            config,
            running: AtomicBool::new(false),
            workflows: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            history: Mutex::new(ExecutionHistory::new(max_history)),
            metrics: Mutex::new(EngineMetrics::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("execution engine started");
        }
    }

    /// Stop the engine: cancel every in-flight execution and block until
    /// each cancellation is acknowledged before clearing the in-flight set.
    /// Cancellation signals are swallowed, not surfaced as errors.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<(String, JoinHandle<()>)> =
            self.in_flight.lock().await.drain().collect();
        if handles.is_empty() {
            info!("execution engine stopped");
            return;
        }
        info!(
            in_flight = handles.len(),
            "stopping engine, cancelling in-flight executions"
        );
        let mut joins = Vec::with_capacity(handles.len());
        for (execution_id, handle) in handles {
            debug!(execution_id = %execution_id, "cancelling in-flight execution");
            handle.abort();
            joins.push(handle);
        }
        for joined in futures::future::join_all(joins).await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    warn!(error = %err, "in-flight execution panicked during shutdown");
                }
            }
        }
        info!("execution engine stopped");
    }

    /// Register a workflow under its own name; re-registering replaces the
    /// previous definition.
    pub async fn register_workflow(&self, workflow: Arc<dyn Workflow>) -> Result<()> {
        let name = workflow.name().to_string();
        context::validate_identifier("workflow_name", &name)?;
        let mut workflows = self.workflows.write().await;
        if workflows.insert(name.clone(), workflow).is_some() {
            debug!(workflow = %name, "workflow definition replaced");
        } else {
            info!(workflow = %name, "workflow registered");
        }
        Ok(())
    }

    pub async fn unregister_workflow(&self, name: &str) -> bool {
        self.workflows.write().await.remove(name).is_some()
    }

    pub async fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a registered workflow with the given context.
    ///
    /// Failure modes, in order: [`FlowguardError::NotRunning`] when the
    /// engine is stopped, [`FlowguardError::WorkflowNotFound`] for an
    /// unknown name, [`FlowguardError::Validation`] for a malformed context
    /// (never retried, never counted). After that the attempt loop runs up
    /// to `max_attempts` times with exponential backoff; the terminal
    /// outcome is recorded in metrics and history exactly once.
    pub async fn execute(
        &self,
        workflow_name: &str,
        context: HashMap<String, Value>,
        execution_id: Option<String>,
    ) -> Result<Value> {
        if !self.is_running() {
            return Err(FlowguardError::NotRunning);
        }
        let workflow = self
            .workflows
            .read()
            .await
            .get(workflow_name)
            .cloned()
            .ok_or_else(|| FlowguardError::WorkflowNotFound(workflow_name.to_string()))?;

        let ctx = ExecutionContext::from_map(workflow_name, context)?;
        workflow.validate_inputs(&ctx)?;

        if let Some(id) = &execution_id {
            context::validate_identifier("execution_id", id)?;
        }
        let execution_id = execution_id
            .or_else(|| ctx.execution_id().map(str::to_string))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if attempt > 0 {
                if !self.is_running() {
                    return Err(FlowguardError::NotRunning);
                }
                let delay = self.config.base_retry_delay * 2u32.pow(attempt - 1);
                debug!(
                    workflow = %workflow_name,
                    execution_id = %execution_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let outcome = self.run_attempt(&workflow, &ctx, &execution_id).await;

            // A successful body whose output fails validation counts as an
            // attempt failure.
            let outcome = match outcome {
                AttemptOutcome::Completed(value) => match workflow.validate_outputs(&value) {
                    Ok(()) => AttemptOutcome::Completed(value),
                    Err(err) => AttemptOutcome::Failed(err),
                },
                other => other,
            };

            let last_attempt = attempt + 1 == max_attempts;
            match outcome {
                AttemptOutcome::Completed(value) => {
                    let elapsed = started.elapsed();
                    self.record_completed(&execution_id, workflow_name, &value, elapsed)
                        .await;
                    info!(
                        workflow = %workflow_name,
                        execution_id = %execution_id,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "workflow completed"
                    );
                    return Ok(value);
                }
                AttemptOutcome::TimedOut if last_attempt => {
                    let error = FlowguardError::WorkflowTimeout {
                        workflow: workflow_name.to_string(),
                        attempts: max_attempts,
                    };
                    self.record_timeout(&execution_id, workflow_name, &error, started.elapsed())
                        .await;
                    return Err(error);
                }
                AttemptOutcome::TimedOut => {
                    warn!(
                        workflow = %workflow_name,
                        execution_id = %execution_id,
                        attempt,
                        timeout_ms = self.config.execution_timeout.as_millis() as u64,
                        "attempt timed out, will retry"
                    );
                }
                AttemptOutcome::Failed(err) if last_attempt => {
                    let error = FlowguardError::WorkflowExecution {
                        workflow: workflow_name.to_string(),
                        attempts: max_attempts,
                        source: Box::new(err),
                    };
                    self.record_failed(&execution_id, workflow_name, &error, started.elapsed())
                        .await;
                    return Err(error);
                }
                AttemptOutcome::Failed(err) => {
                    warn!(
                        workflow = %workflow_name,
                        execution_id = %execution_id,
                        attempt,
                        error = %err,
                        "attempt failed, will retry"
                    );
                }
            }
        }

        Err(FlowguardError::Internal(
            "retry loop exited without a terminal outcome".to_string(),
        ))
    }

    /// Run one attempt as an independently cancellable task, bounded by the
    /// engine-wide per-attempt timeout. In-flight bookkeeping is cleaned up
    /// on every exit path.
    async fn run_attempt(
        &self,
        workflow: &Arc<dyn Workflow>,
        ctx: &ExecutionContext,
        execution_id: &str,
    ) -> AttemptOutcome {
        let (tx, rx) = oneshot::channel();
        let body = Arc::clone(workflow);
        let attempt_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let outcome = body.execute(&attempt_ctx).await;
            let _ = tx.send(outcome);
        });
        self.in_flight
            .lock()
            .await
            .insert(execution_id.to_string(), handle);

        let waited = tokio::time::timeout(self.config.execution_timeout, rx).await;

        let handle = self.in_flight.lock().await.remove(execution_id);

        match waited {
            Err(_elapsed) => {
                // Cancel the overdue attempt and wait for it to settle so
                // the next attempt never overlaps with this one.
                if let Some(handle) = handle {
                    handle.abort();
                    let _ = handle.await;
                }
                AttemptOutcome::TimedOut
            }
            Ok(Ok(Ok(value))) => AttemptOutcome::Completed(value),
            Ok(Ok(Err(err))) => AttemptOutcome::Failed(err),
            // Sender dropped without a verdict: the task was cancelled by
            // stop() or panicked.
            Ok(Err(_recv)) => AttemptOutcome::Failed(FlowguardError::Internal(
                "execution cancelled before completion".to_string(),
            )),
        }
    }

    /// Fan an external event out to every workflow that supports it.
    /// One workflow's failure does not prevent the others from running;
    /// the returned map carries a per-workflow `{status, result|error}`.
    pub async fn process_event(
        &self,
        event_type: &str,
        event_data: Value,
    ) -> HashMap<String, Value> {
        let targets: Vec<Arc<dyn Workflow>> = {
            let workflows = self.workflows.read().await;
            workflows
                .values()
                .filter(|workflow| workflow.supported_events().contains(event_type))
                .cloned()
                .collect()
        };
        debug!(
            event_type = %event_type,
            matched = targets.len(),
            "processing event"
        );

        let mut results = HashMap::new();
        for target in targets {
            let name = target.name().to_string();
            let mut event_context = HashMap::new();
            event_context.insert("workflow_name".to_string(), json!(name));
            event_context.insert("event_type".to_string(), json!(event_type));
            event_context.insert("event_data".to_string(), event_data.clone());

            let entry = match self.execute(&name, event_context, None).await {
                Ok(result) => json!({ "status": "completed", "result": result }),
                Err(err) => {
                    warn!(workflow = %name, event_type = %event_type, error = %err,
                        "event-triggered execution failed");
                    json!({ "status": "failed", "error": err.to_string() })
                }
            };
            results.insert(name, entry);
        }
        results
    }

    /// Consistent metrics snapshot, every field read under the metrics lock
    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.lock().await.snapshot()
    }

    pub async fn get_status(&self) -> EngineStatus {
        let metrics = self.metrics.lock().await.snapshot();
        EngineStatus {
            running: self.is_running(),
            registered_workflows: self.workflows.read().await.len(),
            in_flight_executions: self.in_flight.lock().await.len(),
            metrics,
        }
    }

    /// Most recent `limit` records from the bounded history
    pub async fn get_workflow_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.history.lock().await.recent(limit)
    }

    async fn record_completed(
        &self,
        execution_id: &str,
        workflow_name: &str,
        result: &Value,
        elapsed: Duration,
    ) {
        self.metrics.lock().await.record_success(elapsed);
        self.history
            .lock()
            .await
            .push(ExecutionRecord::completed(
                execution_id,
                workflow_name,
                result.clone(),
            ));
    }

    async fn record_failed(
        &self,
        execution_id: &str,
        workflow_name: &str,
        error: &FlowguardError,
        elapsed: Duration,
    ) {
        self.metrics.lock().await.record_failure(elapsed);
        self.history.lock().await.push(ExecutionRecord::failed(
            execution_id,
            workflow_name,
            &error.to_string(),
        ));
    }

    async fn record_timeout(
        &self,
        execution_id: &str,
        workflow_name: &str,
        error: &FlowguardError,
        elapsed: Duration,
    ) {
        self.metrics.lock().await.record_timeout(elapsed);
        self.history.lock().await.push(ExecutionRecord::timed_out(
            execution_id,
            workflow_name,
            &error.to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::history::ExecutionStatus;
    use crate::engine::workflow::FnWorkflow;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio_test::assert_ok;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            max_attempts: 3,
            base_retry_delay: Duration::from_millis(10),
            execution_timeout: Duration::from_millis(200),
            max_history: 1000,
        }
    }

    async fn started_engine(config: EngineConfig) -> ExecutionEngine {
        let engine = ExecutionEngine::new(config);
        engine.start().await;
        engine
    }

    fn plain_context(workflow: &str) -> HashMap<String, Value> {
        HashMap::from([("workflow_name".to_string(), json!(workflow))])
    }

    fn ok_workflow(name: &str) -> Arc<dyn Workflow> {
        Arc::new(FnWorkflow::new(name, |_ctx| async move {
            Ok(json!({ "status": "success" }))
        }))
    }

    #[tokio::test]
    async fn execute_fails_when_engine_not_started() {
        let engine = ExecutionEngine::new(fast_config());
        engine.register_workflow(ok_workflow("demo")).await.unwrap();
        let result = engine.execute("demo", plain_context("demo"), None).await;
        assert!(matches!(result, Err(FlowguardError::NotRunning)));
    }

    #[tokio::test]
    async fn execute_fails_for_unknown_workflow() {
        let engine = started_engine(fast_config()).await;
        let result = engine.execute("ghost", plain_context("ghost"), None).await;
        assert!(matches!(result, Err(FlowguardError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn succeeds_after_two_failures_and_counts_one_execution() {
        let engine = started_engine(fast_config()).await;
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        engine
            .register_workflow(Arc::new(FnWorkflow::new("flaky", move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        Err(FlowguardError::Internal(format!("attempt {} failed", n)))
                    } else {
                        Ok(json!({ "status": "success", "attempt": n }))
                    }
                }
            })))
            .await
            .unwrap();

        let result = assert_ok!(engine.execute("flaky", plain_context("flaky"), None).await);
        assert_eq!(result["status"], json!("success"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.successful_executions, 1);
        assert_eq!(metrics.failed_executions, 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_execution_error() {
        let engine = started_engine(fast_config()).await;
        engine
            .register_workflow(Arc::new(FnWorkflow::new("doomed", |_ctx| async move {
                Err(FlowguardError::Internal("always broken".to_string()))
            })))
            .await
            .unwrap();

        let result = engine.execute("doomed", plain_context("doomed"), None).await;
        match result {
            Err(FlowguardError::WorkflowExecution {
                workflow,
                attempts,
                source,
            }) => {
                assert_eq!(workflow, "doomed");
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("always broken"));
            }
            other => panic!("expected WorkflowExecution, got {:?}", other),
        }

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.failed_executions, 1);

        let history = engine.get_workflow_history(10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn always_timing_out_workflow_surfaces_timeout_error() {
        let config = EngineConfig {
            execution_timeout: Duration::from_millis(30),
            ..fast_config()
        };
        let engine = started_engine(config).await;
        engine
            .register_workflow(Arc::new(FnWorkflow::new("slow", |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!({}))
            })))
            .await
            .unwrap();

        let result = engine.execute("slow", plain_context("slow"), None).await;
        assert!(matches!(
            result,
            Err(FlowguardError::WorkflowTimeout { attempts: 3, .. })
        ));

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.timeout_executions, 1);
        assert_eq!(metrics.successful_executions, 0);

        let history = engine.get_workflow_history(10).await;
        assert_eq!(history[0].status, ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn earlier_timeouts_are_retried_transparently() {
        let config = EngineConfig {
            execution_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let engine = started_engine(config).await;
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        engine
            .register_workflow(Arc::new(FnWorkflow::new("sluggish", move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        // First attempt outlives the per-attempt budget
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(json!({ "status": "success" }))
                }
            })))
            .await
            .unwrap();

        let result = assert_ok!(
            engine
                .execute("sluggish", plain_context("sluggish"), None)
                .await
        );
        assert_eq!(result["status"], json!("success"));

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.successful_executions, 1);
        assert_eq!(metrics.timeout_executions, 0);
    }

    #[tokio::test]
    async fn output_validation_failure_is_retried() {
        struct PickyWorkflow {
            events: std::collections::HashSet<String>,
            calls: AtomicU32,
        }

        #[async_trait::async_trait]
        impl Workflow for PickyWorkflow {
            fn name(&self) -> &str {
                "picky"
            }

            fn supported_events(&self) -> &std::collections::HashSet<String> {
                &self.events
            }

            async fn execute(&self, _ctx: &ExecutionContext) -> Result<Value> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "attempt": n }))
            }

            fn validate_outputs(&self, result: &Value) -> Result<()> {
                if result["attempt"] == json!(1) {
                    Err(FlowguardError::Validation {
                        field: "attempt".to_string(),
                        reason: "first result rejected".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
        }

        let engine = started_engine(fast_config()).await;
        engine
            .register_workflow(Arc::new(PickyWorkflow {
                events: Default::default(),
                calls: AtomicU32::new(0),
            }))
            .await
            .unwrap();

        let result = assert_ok!(engine.execute("picky", plain_context("picky"), None).await);
        assert_eq!(result["attempt"], json!(2));
        assert_eq!(engine.get_metrics().await.successful_executions, 1);
    }

    #[tokio::test]
    async fn validation_failure_touches_no_counters() {
        let engine = started_engine(fast_config()).await;
        engine.register_workflow(ok_workflow("demo")).await.unwrap();

        let mut context = plain_context("demo");
        context.insert("comment".to_string(), json!("<script>alert(1)</script>"));
        let result = engine.execute("demo", context, None).await;
        assert!(matches!(result, Err(FlowguardError::Validation { .. })));

        let mut context = plain_context("demo");
        context.insert(
            "workflow_name".to_string(),
            json!("demo\"; DROP TABLE runs;--"),
        );
        let result = engine.execute("demo", context, None).await;
        assert!(matches!(result, Err(FlowguardError::Validation { .. })));

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 0);
        assert!(engine.get_workflow_history(10).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_execution_id_is_rejected() {
        let engine = started_engine(fast_config()).await;
        engine.register_workflow(ok_workflow("demo")).await.unwrap();
        let result = engine
            .execute(
                "demo",
                plain_context("demo"),
                Some("bad id with spaces".to_string()),
            )
            .await;
        assert!(matches!(result, Err(FlowguardError::Validation { .. })));
    }

    #[tokio::test]
    async fn fifty_concurrent_successes_lose_no_update() {
        let engine = Arc::new(started_engine(fast_config()).await);
        engine.register_workflow(ok_workflow("demo")).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                engine.execute("demo", plain_context("demo"), None).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 50);
        assert_eq!(metrics.successful_executions, 50);
        assert!((metrics.success_rate_percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn concurrent_counter_workflow_scenario() {
        let engine = Arc::new(started_engine(fast_config()).await);
        let counter = Arc::new(AtomicU32::new(0));
        let body_counter = Arc::clone(&counter);
        engine
            .register_workflow(Arc::new(FnWorkflow::new("demo", move |_ctx| {
                let counter = Arc::clone(&body_counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(json!({ "status": "success", "count": n }))
                }
            })))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                engine.execute("demo", plain_context("demo"), None).await
            }));
        }

        let mut counts = Vec::new();
        for task in tasks {
            let result = task.await.unwrap().unwrap();
            assert_eq!(result["status"], json!("success"));
            counts.push(result["count"].as_u64().unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=10).collect::<Vec<u64>>());

        let metrics = engine.get_metrics().await;
        assert_eq!(metrics.total_executions, 10);
        assert_eq!(metrics.successful_executions, 10);
        assert_eq!(metrics.failed_executions, 0);
    }

    #[tokio::test]
    async fn history_respects_bound_and_limit() {
        let config = EngineConfig {
            max_history: 5,
            ..fast_config()
        };
        let engine = started_engine(config).await;
        engine.register_workflow(ok_workflow("demo")).await.unwrap();

        for _ in 0..8 {
            engine
                .execute("demo", plain_context("demo"), None)
                .await
                .unwrap();
        }

        assert_eq!(engine.get_workflow_history(100).await.len(), 5);
        assert_eq!(engine.get_workflow_history(3).await.len(), 3);
    }

    #[tokio::test]
    async fn process_event_fans_out_and_isolates_failures() {
        let engine = started_engine(fast_config()).await;
        engine
            .register_workflow(Arc::new(
                FnWorkflow::new("auditor", |ctx| async move {
                    Ok(json!({ "saw": ctx.get("event_type").cloned() }))
                })
                .with_events(["order.created"]),
            ))
            .await
            .unwrap();
        engine
            .register_workflow(Arc::new(
                FnWorkflow::new("notifier", |_ctx| async move {
                    Err(FlowguardError::Internal("smtp down".to_string()))
                })
                .with_events(["order.created"]),
            ))
            .await
            .unwrap();
        engine
            .register_workflow(Arc::new(
                FnWorkflow::new("unrelated", |_ctx| async move { Ok(json!({})) })
                    .with_events(["invoice.paid"]),
            ))
            .await
            .unwrap();

        let results = engine
            .process_event("order.created", json!({ "order_id": 7 }))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["auditor"]["status"], json!("completed"));
        assert_eq!(
            results["auditor"]["result"]["saw"],
            json!("order.created")
        );
        assert_eq!(results["notifier"]["status"], json!("failed"));
        assert!(results["notifier"]["error"]
            .as_str()
            .unwrap()
            .contains("smtp down"));
        assert!(!results.contains_key("unrelated"));
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_executions() {
        let engine = Arc::new(started_engine(EngineConfig {
            max_attempts: 1,
            execution_timeout: Duration::from_secs(30),
            ..fast_config()
        })
        .await);
        engine
            .register_workflow(Arc::new(FnWorkflow::new("endless", |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(json!({}))
            })))
            .await
            .unwrap();

        let runner = Arc::clone(&engine);
        let execution = tokio::spawn(async move {
            runner
                .execute("endless", plain_context("endless"), None)
                .await
        });

        // Let the attempt get in flight before stopping
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.get_status().await.in_flight_executions, 1);

        engine.stop().await;
        assert_eq!(engine.get_status().await.in_flight_executions, 0);
        assert!(!engine.is_running());

        let result = execution.await.unwrap();
        assert!(result.is_err());

        // New work is refused after stop
        let refused = engine.execute("endless", plain_context("endless"), None).await;
        assert!(matches!(refused, Err(FlowguardError::NotRunning)));
    }

    #[tokio::test]
    async fn status_reports_registry_and_metrics() {
        let engine = started_engine(fast_config()).await;
        engine.register_workflow(ok_workflow("one")).await.unwrap();
        engine.register_workflow(ok_workflow("two")).await.unwrap();
        engine
            .execute("one", plain_context("one"), None)
            .await
            .unwrap();

        let status = engine.get_status().await;
        assert!(status.running);
        assert_eq!(status.registered_workflows, 2);
        assert_eq!(status.in_flight_executions, 0);
        assert_eq!(status.metrics.total_executions, 1);

        assert_eq!(engine.list_workflows().await, vec!["one", "two"]);
        assert!(engine.unregister_workflow("two").await);
        assert!(!engine.unregister_workflow("two").await);
    }
}
