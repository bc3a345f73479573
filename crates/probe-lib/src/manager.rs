//! Prober composition
//!
//! Wires the readiness tracker, the liveness dispatcher and the probe
//! workers into one facade for the agent.

use crate::liveness::{LivenessDispatcher, LivenessUpdate, LIVENESS_UPDATE_BUFFER};
use crate::models::Pod;
use crate::observability::EventRecorder;
use crate::probe::ProbeEngine;
use crate::readiness::{ReadinessManager, ReadinessTracker, StatusManager};
use crate::store::PodLister;
use crate::worker::{ResultsCache, WorkerManager};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Facade over readiness tracking, liveness dispatch and probe workers
pub struct ProberManager {
    readiness: Arc<ReadinessTracker>,
    liveness: Option<LivenessDispatcher>,
    // Keeps the liveness stream open for as long as the manager lives
    _liveness_updates: mpsc::Sender<LivenessUpdate>,
    workers: WorkerManager,
}

impl ProberManager {
    /// Create a manager over the given pod lister and probe engine.
    ///
    /// Returns the manager and the stream of liveness notifications. The
    /// stream stays open until the manager is dropped, shutdown included.
    pub fn new(
        pods: Arc<dyn PodLister>,
        engine: ProbeEngine,
        recorder: Arc<dyn EventRecorder>,
    ) -> (Self, mpsc::Receiver<LivenessUpdate>) {
        let readiness = Arc::new(ReadinessTracker::new(pods.clone()));
        let (results, results_rx) = ResultsCache::new(LIVENESS_UPDATE_BUFFER);
        let (liveness, updates) = LivenessDispatcher::new(pods.clone(), results_rx);
        let liveness_updates = liveness.updates_sender();
        let workers = WorkerManager::new(
            engine,
            pods,
            readiness.clone(),
            Arc::new(results),
            recorder,
        );

        let manager = Self {
            readiness,
            liveness: Some(liveness),
            _liveness_updates: liveness_updates,
            workers,
        };
        (manager, updates)
    }

    /// Start the liveness dispatcher. Only the first call starts anything.
    pub fn start(&mut self, shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        self.readiness.start();
        self.liveness.take().map(|liveness| liveness.start(shutdown))
    }

    /// Begin probing the pod's containers
    pub fn add_pod(&self, pod: &Pod) {
        self.workers.add_pod(pod);
    }

    /// Stop probing the pod's containers
    pub fn remove_pod(&self, pod: &Pod) {
        self.workers.remove_pod(pod);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.worker_count()
    }
}

#[async_trait]
impl ReadinessManager for ProberManager {
    async fn pod_containers_readiness(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Option<HashMap<String, bool>> {
        self.readiness.pod_containers_readiness(namespace, pod).await
    }
}
