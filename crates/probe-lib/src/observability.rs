//! Observability infrastructure for the prober
//!
//! Provides:
//! - Prometheus metrics (probe results and latency, liveness notifications, workers)
//! - Structured JSON logging with tracing, including the unhealthy-container event sink

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for probe latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProbeMetricsInner> = OnceLock::new();

struct ProbeMetricsInner {
    probe_results: IntCounterVec,
    probe_duration_seconds: HistogramVec,
    liveness_updates: IntCounter,
    probe_workers: IntGauge,
}

impl ProbeMetricsInner {
    fn new() -> Self {
        Self {
            probe_results: register_int_counter_vec!(
                "probe_agent_probe_results_total",
                "Probe cycles by probe kind and result",
                &["probe", "result"]
            )
            .expect("Failed to register probe_results_total"),

            probe_duration_seconds: register_histogram_vec!(
                "probe_agent_probe_duration_seconds",
                "Time spent running a probe cycle, retries included",
                &["probe"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_duration_seconds"),

            liveness_updates: register_int_counter!(
                "probe_agent_liveness_updates_total",
                "Liveness failure notifications dispatched"
            )
            .expect("Failed to register liveness_updates_total"),

            probe_workers: register_int_gauge!(
                "probe_agent_probe_workers",
                "Number of running probe workers"
            )
            .expect("Failed to register probe_workers"),
        }
    }
}

/// Handle to the global prober metrics.
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ProbeMetrics {
    _private: (),
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProbeMetricsInner {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new)
    }

    /// Record one finished probe cycle
    pub fn observe_probe(&self, probe: &str, result: &str, duration_secs: f64) {
        let inner = self.inner();
        inner.probe_results.with_label_values(&[probe, result]).inc();
        inner
            .probe_duration_seconds
            .with_label_values(&[probe])
            .observe(duration_secs);
    }

    pub fn inc_liveness_updates(&self) {
        self.inner().liveness_updates.inc();
    }

    pub fn set_probe_workers(&self, count: i64) {
        self.inner().probe_workers.set(count);
    }
}

/// Object an event is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerReference {
    pub namespace: String,
    pub pod: String,
    pub pod_uid: String,
    pub container: String,
}

/// Sink for human-readable warning events
pub trait EventRecorder: Send + Sync {
    fn warning(&self, reference: &ContainerReference, reason: &str, message: &str);
}

/// Structured logger for prober events
///
/// Provides consistent JSON-formatted logging for unhealthy containers,
/// liveness notifications and agent lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a liveness notification handed to the restart consumer
    pub fn log_liveness_update(&self, namespace: &str, pod: &str) {
        warn!(
            event = "liveness_failed",
            node = %self.node_name,
            namespace = %namespace,
            pod_name = %pod,
            "Pod failed liveness, restart requested"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, pods: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            pods = pods,
            "Probe agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Probe agent shutting down"
        );
    }
}

impl EventRecorder for StructuredLogger {
    fn warning(&self, reference: &ContainerReference, reason: &str, message: &str) {
        warn!(
            event = "container_unhealthy",
            node = %self.node_name,
            namespace = %reference.namespace,
            pod_name = %reference.pod,
            pod_uid = %reference.pod_uid,
            container = %reference.container,
            reason = %reason,
            message = %message,
            "Container probe did not succeed"
        );
    }
}
