//! Liveness failure dispatch
//!
//! Turns liveness probe results into per-pod notifications for the restart
//! consumer. Pods that already reached a terminal state never produce one.

use crate::observability::ProbeMetrics;
use crate::probe::ProbeResult;
use crate::store::PodLister;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the outbound notification queue
pub const LIVENESS_UPDATE_BUFFER: usize = 20;

/// A pod failed its liveness checks and should be re-evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessUpdate {
    pub namespace: String,
    pub pod: String,
}

/// Latest liveness result of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultUpdate {
    pub pod_uid: String,
    pub container_id: String,
    pub result: ProbeResult,
}

/// Consumes result updates and emits [`LivenessUpdate`]s.
///
/// Every failure for a live pod is forwarded; there is no suppression of
/// repeated notifications for the same pod.
pub struct LivenessDispatcher {
    pods: Arc<dyn PodLister>,
    results: mpsc::Receiver<ResultUpdate>,
    updates: mpsc::Sender<LivenessUpdate>,
    metrics: ProbeMetrics,
}

impl LivenessDispatcher {
    /// Create a dispatcher reading from `results`.
    ///
    /// Returns the dispatcher and the receiving end of its notification queue.
    pub fn new(
        pods: Arc<dyn PodLister>,
        results: mpsc::Receiver<ResultUpdate>,
    ) -> (Self, mpsc::Receiver<LivenessUpdate>) {
        let (updates, updates_rx) = mpsc::channel(LIVENESS_UPDATE_BUFFER);

        let dispatcher = Self {
            pods,
            results,
            updates,
            metrics: ProbeMetrics::new(),
        };

        (dispatcher, updates_rx)
    }

    /// Another handle on the outbound queue.
    ///
    /// The queue closes only once every handle is dropped, so a holder keeps
    /// it open after the dispatch loop exits.
    pub fn updates_sender(&self) -> mpsc::Sender<LivenessUpdate> {
        self.updates.clone()
    }

    /// Spawn the dispatch loop
    pub fn start(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Dispatch until shutdown is signalled or the result stream ends.
    ///
    /// Updates still buffered at shutdown are left unprocessed.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting liveness dispatcher");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down liveness dispatcher");
                    break;
                }
                update = self.results.recv() => match update {
                    Some(update) => self.update_pod_liveness(update).await,
                    None => {
                        debug!("Result stream closed, stopping liveness dispatcher");
                        break;
                    }
                }
            }
        }
    }

    async fn update_pod_liveness(&self, update: ResultUpdate) {
        debug!(
            pod_uid = %update.pod_uid,
            container_id = %update.container_id,
            result = %update.result,
            "Got liveness result"
        );

        if update.result != ProbeResult::Failure {
            return;
        }

        let Some(pod) = self.pods.find_by_uid(&update.pod_uid) else {
            debug!(pod_uid = %update.pod_uid, "Unable to find pod, dropping update");
            return;
        };

        if pod.is_terminated() {
            debug!(
                namespace = %pod.namespace,
                pod = %pod.name,
                "Pod is terminated, no update"
            );
            return;
        }

        // Blocks while the queue is full
        let notification = LivenessUpdate {
            namespace: pod.namespace.clone(),
            pod: pod.name.clone(),
        };
        if self.updates.send(notification).await.is_err() {
            debug!(namespace = %pod.namespace, pod = %pod.name, "No liveness consumer, dropping update");
            return;
        }
        self.metrics.inc_liveness_updates();
    }
}
