//! Thread-safe engine execution metrics
//!
//! One terminal outcome is recorded per `execute()` call regardless of how
//! many attempts it took, so `total == successful + failed + timeout` holds
//! at every observable instant. The engine keeps the struct behind a lock
//! and hands out [`MetricsSnapshot`] copies.

use serde::Serialize;
use std::time::Duration;

/// Mutable metrics, owned by the engine behind its metrics lock
#[derive(Debug, Default)]
pub struct EngineMetrics {
    total_executions: u64,
    successful_executions: u64,
    failed_executions: u64,
    timeout_executions: u64,
    total_execution_time: Duration,
}

impl EngineMetrics {
    pub fn record_success(&mut self, elapsed: Duration) {
        self.total_executions += 1;
        self.successful_executions += 1;
        self.total_execution_time += elapsed;
    }

    pub fn record_failure(&mut self, elapsed: Duration) {
        self.total_executions += 1;
        self.failed_executions += 1;
        self.total_execution_time += elapsed;
    }

    pub fn record_timeout(&mut self, elapsed: Duration) {
        self.total_executions += 1;
        self.timeout_executions += 1;
        self.total_execution_time += elapsed;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_executions;
        let average = if total == 0 {
            0.0
        } else {
            self.total_execution_time.as_secs_f64() / total as f64
        };
        let success_rate = if total == 0 {
            0.0
        } else {
            self.successful_executions as f64 / total as f64 * 100.0
        };
        MetricsSnapshot {
            total_executions: total,
            successful_executions: self.successful_executions,
            failed_executions: self.failed_executions,
            timeout_executions: self.timeout_executions,
            total_execution_time_seconds: self.total_execution_time.as_secs_f64(),
            average_execution_time_seconds: average,
            success_rate_percent: success_rate,
        }
    }
}

/// Consistent, serializable view of the metrics at one instant
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timeout_executions: u64,
    pub total_execution_time_seconds: f64,
    pub average_execution_time_seconds: f64,
    pub success_rate_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_stay_consistent() {
        let mut metrics = EngineMetrics::default();
        metrics.record_success(Duration::from_millis(100));
        metrics.record_failure(Duration::from_millis(50));
        metrics.record_timeout(Duration::from_millis(250));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_executions, 3);
        assert_eq!(
            snap.total_executions,
            snap.successful_executions + snap.failed_executions + snap.timeout_executions
        );
        assert!((snap.total_execution_time_seconds - 0.4).abs() < 1e-9);
    }

    #[test]
    fn empty_metrics_report_zero_rates() {
        let snap = EngineMetrics::default().snapshot();
        assert_eq!(snap.total_executions, 0);
        assert_eq!(snap.average_execution_time_seconds, 0.0);
        assert_eq!(snap.success_rate_percent, 0.0);
    }

    #[test]
    fn success_rate_is_percentage() {
        let mut metrics = EngineMetrics::default();
        metrics.record_success(Duration::from_millis(10));
        metrics.record_success(Duration::from_millis(10));
        metrics.record_failure(Duration::from_millis(10));
        metrics.record_timeout(Duration::from_millis(10));
        let snap = metrics.snapshot();
        assert!((snap.success_rate_percent - 50.0).abs() < 1e-9);
    }
}
