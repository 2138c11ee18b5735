//! Workflow trait and a closure-backed implementation
//!
//! A workflow is a named, externally supplied unit of work. The engine
//! stores a shared reference and drives it through validation, the retry
//! loop and the per-attempt timeout; the body itself stays opaque.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;

use super::context::ExecutionContext;
use crate::Result;

/// A named, executable workflow definition
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    /// External event types this workflow reacts to in
    /// [`ExecutionEngine::process_event`](super::ExecutionEngine::process_event)
    fn supported_events(&self) -> &HashSet<String>;

    /// Input validation hook, run once before the first attempt.
    /// A failure here is surfaced immediately and never retried.
    fn validate_inputs(&self, _context: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// The workflow body. May be invoked several times (one per attempt);
    /// each invocation runs as an independently cancellable task.
    async fn execute(&self, context: &ExecutionContext) -> Result<Value>;

    /// Output validation hook, run on each successful attempt's result.
    /// A failure counts as an attempt failure and is retried.
    fn validate_outputs(&self, _result: &Value) -> Result<()> {
        Ok(())
    }
}

type WorkflowBody = dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Closure-backed [`Workflow`] for demos and tests
///
/// ```rust
/// use flowguard::FnWorkflow;
/// use serde_json::json;
///
/// let workflow = FnWorkflow::new("echo", |ctx| async move {
///     Ok(json!({ "echoed": ctx.parameters().len() }))
/// })
/// .with_events(["message.received"]);
/// ```
pub struct FnWorkflow {
    name: String,
    events: HashSet<String>,
    body: Box<WorkflowBody>,
}

impl FnWorkflow {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            events: HashSet::new(),
            body: Box::new(move |ctx| body(ctx).boxed()),
        }
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Workflow for FnWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_events(&self) -> &HashSet<String> {
        &self.events
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<Value> {
        (self.body)(context.clone()).await
    }
}
