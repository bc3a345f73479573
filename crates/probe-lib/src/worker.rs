//! Periodic probe workers
//!
//! One worker runs per (pod, container, probe kind). Workers run probe
//! cycles through the [`ProbeEngine`], apply success and failure thresholds,
//! and publish readiness to the [`StatusManager`] and liveness results to
//! the [`ResultsCache`].

use crate::liveness::ResultUpdate;
use crate::models::{Pod, PodPhase, Probe, ProbeKind};
use crate::observability::{ContainerReference, EventRecorder, ProbeMetrics};
use crate::probe::{ProbeEngine, ProbeResult};
use crate::readiness::StatusManager;
use crate::store::PodLister;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

const CONTAINER_UNHEALTHY: &str = "ContainerUnhealthy";

/// Latest liveness result per container, publishing only on change
pub struct ResultsCache {
    results: DashMap<String, ProbeResult>,
    updates: mpsc::Sender<ResultUpdate>,
}

impl ResultsCache {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<ResultUpdate>) {
        let (updates, updates_rx) = mpsc::channel(buffer_size);
        let cache = Self {
            results: DashMap::new(),
            updates,
        };
        (cache, updates_rx)
    }

    pub fn get(&self, container_id: &str) -> Option<ProbeResult> {
        self.results.get(container_id).map(|r| *r)
    }

    /// Record a result; an update is sent when it differs from the cached one
    pub async fn set(&self, pod_uid: &str, container_id: &str, result: ProbeResult) {
        let previous = self.results.insert(container_id.to_string(), result);
        if previous == Some(result) {
            return;
        }

        let update = ResultUpdate {
            pod_uid: pod_uid.to_string(),
            container_id: container_id.to_string(),
            result,
        };
        if self.updates.send(update).await.is_err() {
            debug!(container_id = %container_id, "Result stream closed, dropping update");
        }
    }

    pub fn remove(&self, container_id: &str) {
        self.results.remove(container_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkerKey {
    pod_uid: String,
    container: String,
    kind: ProbeKind,
}

type WorkerMap = DashMap<WorkerKey, oneshot::Sender<()>>;

/// Starts and stops probe workers as pods come and go
pub struct WorkerManager {
    engine: ProbeEngine,
    pods: Arc<dyn PodLister>,
    status: Arc<dyn StatusManager>,
    liveness_results: Arc<ResultsCache>,
    recorder: Arc<dyn EventRecorder>,
    metrics: ProbeMetrics,
    workers: Arc<WorkerMap>,
}

impl WorkerManager {
    pub fn new(
        engine: ProbeEngine,
        pods: Arc<dyn PodLister>,
        status: Arc<dyn StatusManager>,
        liveness_results: Arc<ResultsCache>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            engine,
            pods,
            status,
            liveness_results,
            recorder,
            metrics: ProbeMetrics::new(),
            workers: Arc::new(DashMap::new()),
        }
    }

    /// Start a worker for every probe the pod declares
    pub fn add_pod(&self, pod: &Pod) {
        for container in &pod.containers {
            for kind in [ProbeKind::Readiness, ProbeKind::Liveness] {
                let Some(probe) = container.probe(kind) else {
                    continue;
                };

                let key = WorkerKey {
                    pod_uid: pod.uid.clone(),
                    container: container.name.clone(),
                    kind,
                };
                if self.workers.contains_key(&key) {
                    debug!(
                        pod = %pod,
                        container = %container.name,
                        probe = %kind,
                        "Probe worker already exists"
                    );
                    continue;
                }

                let (stop_tx, stop_rx) = oneshot::channel();
                let worker = Worker {
                    key: key.clone(),
                    probe: probe.clone(),
                    engine: self.engine.clone(),
                    pods: self.pods.clone(),
                    status: self.status.clone(),
                    liveness_results: self.liveness_results.clone(),
                    recorder: self.recorder.clone(),
                    metrics: self.metrics.clone(),
                    workers: self.workers.clone(),
                    container_id: None,
                    last_result: None,
                    result_run: 0,
                    on_hold: false,
                };
                self.workers.insert(key, stop_tx);
                tokio::spawn(worker.run(stop_rx));
            }
        }
        self.metrics.set_probe_workers(self.workers.len() as i64);
    }

    /// Stop the pod's workers and forget its cached liveness results
    pub fn remove_pod(&self, pod: &Pod) {
        for container in &pod.containers {
            for kind in [ProbeKind::Readiness, ProbeKind::Liveness] {
                let key = WorkerKey {
                    pod_uid: pod.uid.clone(),
                    container: container.name.clone(),
                    kind,
                };
                if let Some((_, stop)) = self.workers.remove(&key) {
                    let _ = stop.send(());
                }
            }
        }
        for status in &pod.status.container_statuses {
            if let Some(id) = &status.container_id {
                self.liveness_results.remove(id);
            }
        }
        self.metrics.set_probe_workers(self.workers.len() as i64);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

struct Worker {
    key: WorkerKey,
    probe: Probe,
    engine: ProbeEngine,
    pods: Arc<dyn PodLister>,
    status: Arc<dyn StatusManager>,
    liveness_results: Arc<ResultsCache>,
    recorder: Arc<dyn EventRecorder>,
    metrics: ProbeMetrics,
    workers: Arc<WorkerMap>,
    container_id: Option<String>,
    last_result: Option<ProbeResult>,
    result_run: u32,
    /// Set after a reported liveness failure, cleared by a new container id
    on_hold: bool,
}

impl Worker {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        debug!(
            pod_uid = %self.key.pod_uid,
            container = %self.key.container,
            probe = %self.key.kind,
            "Starting probe worker"
        );

        let delay = sleep(self.probe.initial_delay());
        tokio::pin!(delay);
        let stopped = tokio::select! {
            _ = &mut stop => true,
            _ = &mut delay => false,
        };

        if !stopped {
            let mut ticker = interval(self.probe.period());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if !self.do_probe().await {
                            break;
                        }
                    }
                }
            }
        }

        // Only deregister if no newer worker took over the key
        drop(stop);
        self.workers.remove_if(&self.key, |_, tx| tx.is_closed());
        self.metrics.set_probe_workers(self.workers.len() as i64);
        debug!(
            pod_uid = %self.key.pod_uid,
            container = %self.key.container,
            probe = %self.key.kind,
            "Probe worker stopped"
        );
    }

    /// Run one probe cycle. Returns false when the worker should stop.
    async fn do_probe(&mut self) -> bool {
        let Some(pod) = self.pods.find_by_uid(&self.key.pod_uid) else {
            info!(pod_uid = %self.key.pod_uid, "Pod is gone, stopping probe worker");
            return false;
        };
        if matches!(pod.status.phase, PodPhase::Succeeded | PodPhase::Failed) {
            debug!(pod = %pod, "Pod has exited, stopping probe worker");
            return false;
        }
        let Some(container) = pod.container(&self.key.container) else {
            info!(pod = %pod, container = %self.key.container, "Container is gone, stopping probe worker");
            return false;
        };
        let Some(container_id) = pod.container_id_for_name(&container.name) else {
            debug!(pod = %pod, container = %container.name, "Container not started yet");
            return true;
        };

        if self.container_id.as_deref() != Some(container_id) {
            self.container_id = Some(container_id.to_string());
            self.last_result = None;
            self.result_run = 0;
            self.on_hold = false;
            if self.key.kind == ProbeKind::Readiness {
                self.status
                    .set_container_readiness(&pod.uid, container_id, false)
                    .await;
            }
        }

        if self.on_hold {
            debug!(pod = %pod, container = %container.name, "Waiting for container restart");
            return true;
        }

        let start = Instant::now();
        let outcome = self
            .engine
            .probe(self.key.kind, &pod, container, container_id)
            .await;

        let reference = || ContainerReference {
            namespace: pod.namespace.clone(),
            pod: pod.name.clone(),
            pod_uid: pod.uid.clone(),
            container: container.name.clone(),
        };
        let (result, label) = match &outcome {
            Ok(o) if o.result == ProbeResult::Success => (ProbeResult::Success, o.result.as_str()),
            Ok(o) => {
                self.recorder.warning(
                    &reference(),
                    CONTAINER_UNHEALTHY,
                    &format!("{} probe failed: {}", self.key.kind, o.output),
                );
                (ProbeResult::Failure, o.result.as_str())
            }
            Err(e) => {
                debug!(pod = %pod, container = %container.name, error = %e, "Probe errored");
                self.recorder.warning(
                    &reference(),
                    CONTAINER_UNHEALTHY,
                    &format!("{} probe errored: {e}", self.key.kind),
                );
                (ProbeResult::Failure, "error")
            }
        };
        self.metrics.observe_probe(
            self.key.kind.as_str(),
            label,
            start.elapsed().as_secs_f64(),
        );

        if self.last_result == Some(result) {
            self.result_run += 1;
        } else {
            self.last_result = Some(result);
            self.result_run = 1;
        }

        let threshold = match result {
            ProbeResult::Success => self.probe.success_threshold(),
            _ => self.probe.failure_threshold(),
        };
        if self.result_run < threshold {
            return true;
        }

        match self.key.kind {
            ProbeKind::Readiness => {
                self.status
                    .set_container_readiness(&pod.uid, container_id, result == ProbeResult::Success)
                    .await;
            }
            ProbeKind::Liveness => {
                self.liveness_results
                    .set(&pod.uid, container_id, result)
                    .await;
                if result == ProbeResult::Failure {
                    // The container is due for a restart; probe its successor
                    self.result_run = 0;
                    self.on_hold = true;
                }
            }
        }
        true
    }
}
