//! Metrics collection for HydraAI
//!
//! This module provides Prometheus metrics for observability.
//! Coordinator and worker metrics live in one registry; each binary only
//! moves the counters it owns.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for HydraAI
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub coordinator: CoordinatorMetrics,
    pub worker: WorkerMetrics,
}

/// Coordinator-specific metrics
#[derive(Debug, Clone)]
pub struct CoordinatorMetrics {
    /// New accounts created
    pub registrations_total: IntCounter,

    /// Tasks handed to workers
    pub tasks_issued_total: IntCounter,

    /// Tasks completed with an accepted result
    pub tasks_completed_total: IntCounter,

    /// Current size of the pending pool
    pub tasks_pending: IntGauge,

    /// Submissions rejected by validation
    pub submissions_rejected_total: IntCounter,

    /// Updates folded into the global model
    pub blends_total: IntCounter,

    /// Time spent holding the parameter lock for a blend
    pub blend_duration: Histogram,

    /// Paid queries served
    pub queries_total: IntCounter,

    /// Paid queries refused for lack of balance
    pub queries_rejected_total: IntCounter,

    /// Tasks created by the generator
    pub tasks_generated_total: IntCounter,

    /// Expired leases returned to the pending pool
    pub tasks_requeued_total: IntCounter,
}

/// Worker-specific metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Tasks trained locally
    pub tasks_trained_total: IntCounter,

    /// Local training duration
    pub train_duration: Histogram,

    /// Failed result submissions
    pub submit_failures_total: IntCounter,

    /// Failed task fetches (not counting an empty queue)
    pub fetch_failures_total: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("counter registered once");
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::new(name, help).expect("valid gauge definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("gauge registered once");
    metric
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    let metric = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("valid histogram definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("histogram registered once");
    metric
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let coordinator = CoordinatorMetrics {
            registrations_total: counter(
                &registry,
                "coordinator_registrations_total",
                "Total number of new worker accounts",
            ),
            tasks_issued_total: counter(
                &registry,
                "coordinator_tasks_issued_total",
                "Total number of tasks handed to workers",
            ),
            tasks_completed_total: counter(
                &registry,
                "coordinator_tasks_completed_total",
                "Total number of tasks completed",
            ),
            tasks_pending: gauge(
                &registry,
                "coordinator_tasks_pending",
                "Current number of pending tasks",
            ),
            submissions_rejected_total: counter(
                &registry,
                "coordinator_submissions_rejected_total",
                "Total number of rejected result submissions",
            ),
            blends_total: counter(
                &registry,
                "coordinator_blends_total",
                "Total number of updates blended into the global model",
            ),
            blend_duration: histogram(
                &registry,
                "coordinator_blend_duration_seconds",
                "Blend duration in seconds",
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            ),
            queries_total: counter(
                &registry,
                "coordinator_queries_total",
                "Total number of paid queries served",
            ),
            queries_rejected_total: counter(
                &registry,
                "coordinator_queries_rejected_total",
                "Total number of paid queries refused for insufficient balance",
            ),
            tasks_generated_total: counter(
                &registry,
                "coordinator_tasks_generated_total",
                "Total number of tasks generated",
            ),
            tasks_requeued_total: counter(
                &registry,
                "coordinator_tasks_requeued_total",
                "Total number of expired tasks returned to pending",
            ),
        };

        let worker = WorkerMetrics {
            tasks_trained_total: counter(
                &registry,
                "worker_tasks_trained_total",
                "Total number of tasks trained locally",
            ),
            train_duration: histogram(
                &registry,
                "worker_train_duration_seconds",
                "Local training duration in seconds",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            ),
            submit_failures_total: counter(
                &registry,
                "worker_submit_failures_total",
                "Total number of failed result submissions",
            ),
            fetch_failures_total: counter(
                &registry,
                "worker_fetch_failures_total",
                "Total number of failed task fetches",
            ),
        };

        MetricsRegistry {
            registry,
            coordinator,
            worker,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.coordinator.tasks_issued_total.inc();
        metrics.coordinator.tasks_pending.set(10);
        metrics.worker.tasks_trained_total.inc();

        let output = metrics.gather();
        assert!(output.contains("coordinator_tasks_issued_total"));
        assert!(output.contains("coordinator_tasks_pending 10"));
        assert!(output.contains("worker_tasks_trained_total"));
    }

    #[test]
    fn test_latency_timer_passes_result_through() {
        let metrics = MetricsRegistry::new();
        let value = metrics.coordinator.blend_duration.time(|| 41 + 1);

        assert_eq!(value, 42);
        assert_eq!(metrics.coordinator.blend_duration.get_sample_count(), 1);
    }
}
