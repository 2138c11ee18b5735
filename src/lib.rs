// Flowguard - fault-tolerant execution core
// Runs named workflows under a concurrent scheduler with retry, backoff and
// per-attempt timeouts, and shields calls to interchangeable external
// backends behind per-backend circuit breakers with automatic failover.

//! # Flowguard Library
//!
//! This is the main library crate for Flowguard, the execution core of an
//! automation platform. This file serves as the **library root** and defines
//! the public API that external crates can use.
//!
//! ## Core Components
//!
//! ### Circuit Breaker (`breaker` module)
//! - [`CircuitBreaker`]: per-dependency state machine (Closed / Open / HalfOpen)
//! - Blocks calls to a known-bad dependency until a cooldown elapses, then
//!   probes for recovery with trial calls
//! - [`BreakerStats`]: serializable snapshot of counters and transitions
//!
//! ### Service Router (`router` module)
//! - [`ServiceRouter`]: registry of named interchangeable backends, each
//!   owning its own [`CircuitBreaker`]
//! - Dispatches a request to a chosen backend and substitutes a healthy
//!   alternative when the chosen one is unavailable
//! - [`Backend`]: the trait every routable backend implements
//!
//! ### Execution Engine (`engine` module)
//! - [`ExecutionEngine`]: registry of named workflow definitions
//! - Runs a workflow with validated input under a retry/backoff/timeout
//!   policy, maintains thread-safe metrics and a size-bounded history
//! - [`Workflow`]: the trait every executable workflow implements
//!
//! Dependency order is strictly `breaker` -> `router` -> `engine`; the engine
//! has no compile-time dependency on the router (workflow bodies use it
//! incidentally).
//!
//! ## Usage Example
//! ```rust,no_run
//! use flowguard::{EngineConfig, ExecutionEngine};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn run(workflow: std::sync::Arc<dyn flowguard::Workflow>) -> flowguard::Result<()> {
//! let engine = ExecutionEngine::new(EngineConfig::default());
//! engine.register_workflow(workflow).await?;
//! engine.start().await;
//!
//! let mut context = HashMap::new();
//! context.insert("workflow_name".to_string(), json!("demo"));
//! let result = engine.execute("demo", context, None).await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

// Circuit breaker state machine (leaf module, no crate-internal deps)
pub mod breaker;

// Backend registry and dispatch with breaker-aware failover
pub mod router;

// Workflow registry, retry/backoff/timeout loop, metrics and history
pub mod engine;

// Re-export core types for easy access - users can import directly from the
// crate root instead of navigating the module hierarchy
pub use breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use engine::{
    context::ExecutionContext,
    history::{ExecutionRecord, ExecutionStatus},
    metrics::MetricsSnapshot,
    workflow::{FnWorkflow, Workflow},
    EngineConfig, EngineStatus, ExecutionEngine,
};
pub use router::{Backend, BackendRequest, ServiceRouter};

use thiserror::Error;

/// Custom error types for Flowguard operations
///
/// Every fallible operation in the crate returns [`Result<T>`] with this
/// enum as the error type. The engine's retry loop recovers locally from
/// per-attempt failures and only surfaces `WorkflowTimeout` /
/// `WorkflowExecution` after attempts are exhausted; the router recovers
/// locally from a single breaker-open condition before surfacing
/// `CircuitOpen`.
#[derive(Error, Debug)]
pub enum FlowguardError {
    /// The engine has not been started (or has been stopped)
    #[error("execution engine is not running")]
    NotRunning,

    /// Error when a workflow definition cannot be found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Context validation or sanitization failed; never retried
    #[error("validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The final attempt exceeded its time budget
    #[error("workflow '{workflow}' timed out after {attempts} attempt(s)")]
    WorkflowTimeout { workflow: String, attempts: u32 },

    /// Wraps the last underlying failure once attempts are exhausted
    #[error("workflow '{workflow}' failed after {attempts} attempt(s): {source}")]
    WorkflowExecution {
        workflow: String,
        attempts: u32,
        #[source]
        source: Box<FlowguardError>,
    },

    /// A circuit breaker refused dispatch while open
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    /// No backend could be resolved for a dispatch
    #[error("no backend available: {0}")]
    NoBackend(String),

    /// Invalid breaker or engine configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Opaque failure raised by a backend invocation
    /// Using anyhow::Error so backends can surface transport errors untyped
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, FlowguardError>;
