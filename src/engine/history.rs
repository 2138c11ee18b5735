//! FIFO-bounded execution history
//!
//! Append-only record store with immediate oldest-first eviction: the store
//! never holds more than `max_records` entries once an append returns.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Terminal status of one `execute()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Timeout,
}

/// One recorded execution outcome
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
    /// Workflow result for completed executions
    pub result: Option<Value>,
    /// Error message for failed/timed-out executions
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn completed(execution_id: &str, workflow_name: &str, result: Value) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: ExecutionStatus::Completed,
            timestamp: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(execution_id: &str, workflow_name: &str, error: &str) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: ExecutionStatus::Failed,
            timestamp: Utc::now(),
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn timed_out(execution_id: &str, workflow_name: &str, error: &str) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: ExecutionStatus::Timeout,
            timestamp: Utc::now(),
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Bounded FIFO store of execution records
#[derive(Debug)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    max_records: usize,
}

impl ExecutionHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_records.min(1024)),
            max_records,
        }
    }

    /// Append a record, evicting the oldest entries immediately so the
    /// bound is never exceeded once this returns.
    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push_back(record);
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    /// Most recent `limit` records, newest last
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
