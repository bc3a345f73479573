//! Container readiness tracking
//!
//! Readiness workers report per-container readiness through the
//! [`StatusManager`] contract; [`ReadinessTracker`] keeps the latest bit per
//! (namespace, pod, container) and answers readiness queries.

use crate::models::{Pod, PodStatus};
use crate::store::PodLister;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// namespace -> pod name -> container name -> ready
type ReadinessMap = HashMap<String, HashMap<String, HashMap<String, bool>>>;

/// Status sink the probe workers report into
#[async_trait]
pub trait StatusManager: Send + Sync {
    fn start(&self);

    /// Current status of the pod with the given uid
    fn pod_status(&self, pod_uid: &str) -> Option<PodStatus>;

    fn set_pod_status(&self, pod: &Pod, status: &PodStatus);

    async fn set_container_readiness(&self, pod_uid: &str, container_id: &str, ready: bool);

    fn terminate_pod(&self, pod: &Pod);

    fn remove_orphaned_statuses(&self, pod_uids: &HashSet<String>);
}

/// Readiness queries exposed upward
#[async_trait]
pub trait ReadinessManager: Send + Sync {
    /// Container name to readiness for a pod, if anything was recorded for it
    async fn pod_containers_readiness(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Option<HashMap<String, bool>>;
}

/// Readiness state shared by every reporter and reader.
///
/// The whole map sits behind one lock. Entries are created on first report
/// and are never pruned; stale entries of deleted pods live until restart.
pub struct ReadinessTracker {
    pods: Arc<dyn PodLister>,
    readiness: RwLock<ReadinessMap>,
}

impl ReadinessTracker {
    pub fn new(pods: Arc<dyn PodLister>) -> Self {
        Self {
            pods,
            readiness: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StatusManager for ReadinessTracker {
    fn start(&self) {
        debug!(method = "ReadinessTracker::start", "Starting");
    }

    fn pod_status(&self, pod_uid: &str) -> Option<PodStatus> {
        let status = self.pods.find_by_uid(pod_uid).map(|pod| pod.status);
        if status.is_none() {
            debug!(pod_uid = %pod_uid, "Unable to find pod");
        }
        status
    }

    fn set_pod_status(&self, pod: &Pod, status: &PodStatus) {
        // Pod status is owned by the workload store
        debug!(
            namespace = %pod.namespace,
            pod = %pod.name,
            status = ?status,
            "Ignoring pod status"
        );
    }

    async fn set_container_readiness(&self, pod_uid: &str, container_id: &str, ready: bool) {
        debug!(
            pod_uid = %pod_uid,
            container_id = %container_id,
            ready,
            "Setting container readiness"
        );

        let Some(pod) = self.pods.find_by_uid(pod_uid) else {
            debug!(pod_uid = %pod_uid, "Unable to find pod");
            return;
        };

        let Some(container) = pod.container_name_for_id(container_id) else {
            debug!(
                namespace = %pod.namespace,
                pod = %pod.name,
                container_id = %container_id,
                "Unable to find container"
            );
            return;
        };

        let mut readiness = self.readiness.write().await;
        readiness
            .entry(pod.namespace.clone())
            .or_default()
            .entry(pod.name.clone())
            .or_default()
            .insert(container.to_string(), ready);
    }

    fn terminate_pod(&self, pod: &Pod) {
        debug!(namespace = %pod.namespace, pod = %pod.name, "Terminate pod");
    }

    fn remove_orphaned_statuses(&self, pod_uids: &HashSet<String>) {
        debug!(pod_uids = ?pod_uids, "Remove orphaned statuses");
    }
}

#[async_trait]
impl ReadinessManager for ReadinessTracker {
    async fn pod_containers_readiness(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Option<HashMap<String, bool>> {
        let readiness = self.readiness.read().await;
        readiness.get(namespace)?.get(pod).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerStatus, PodPhase};
    use crate::store::PodStore;

    fn pod(namespace: &str, name: &str, uid: &str, containers: &[(&str, &str)]) -> Pod {
        Pod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            deletion_timestamp: None,
            containers: Vec::new(),
            status: PodStatus {
                phase: PodPhase::Running,
                container_statuses: containers
                    .iter()
                    .map(|(name, id)| ContainerStatus {
                        name: name.to_string(),
                        container_id: Some(id.to_string()),
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    fn tracker_with(pods: Vec<Pod>) -> ReadinessTracker {
        let store = PodStore::new();
        for p in pods {
            store.upsert(p);
        }
        ReadinessTracker::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_set_and_get_readiness() {
        let tracker = tracker_with(vec![pod("default", "web", "u1", &[("app", "c1")])]);

        tracker.set_container_readiness("u1", "c1", true).await;
        let readiness = tracker
            .pod_containers_readiness("default", "web")
            .await
            .unwrap();
        assert_eq!(readiness, HashMap::from([("app".to_string(), true)]));

        tracker.set_container_readiness("u1", "c1", false).await;
        let readiness = tracker
            .pod_containers_readiness("default", "web")
            .await
            .unwrap();
        assert!(!readiness["app"]);
    }

    #[tokio::test]
    async fn test_multiple_containers_and_pods() {
        let tracker = tracker_with(vec![
            pod("default", "web", "u1", &[("app", "c1"), ("sidecar", "c2")]),
            pod("other", "web", "u2", &[("app", "c3")]),
        ]);

        tracker.set_container_readiness("u1", "c1", true).await;
        tracker.set_container_readiness("u1", "c2", false).await;
        tracker.set_container_readiness("u2", "c3", true).await;

        let web = tracker
            .pod_containers_readiness("default", "web")
            .await
            .unwrap();
        assert_eq!(web.len(), 2);
        assert!(web["app"]);
        assert!(!web["sidecar"]);

        let other = tracker.pod_containers_readiness("other", "web").await.unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_updates_are_ignored() {
        let tracker = tracker_with(vec![pod("default", "web", "u1", &[("app", "c1")])]);
        tracker.set_container_readiness("u1", "c1", true).await;

        tracker.set_container_readiness("missing", "c1", false).await;
        tracker.set_container_readiness("u1", "missing", false).await;

        let readiness = tracker
            .pod_containers_readiness("default", "web")
            .await
            .unwrap();
        assert_eq!(readiness, HashMap::from([("app".to_string(), true)]));
    }

    #[tokio::test]
    async fn test_unknown_pod_has_no_readiness() {
        let tracker = tracker_with(vec![pod("default", "web", "u1", &[("app", "c1")])]);
        assert!(tracker.pod_containers_readiness("default", "web").await.is_none());
        assert!(tracker.pod_containers_readiness("nope", "web").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_survive_pod_removal() {
        let store = Arc::new(PodStore::new());
        store.upsert(pod("default", "web", "u1", &[("app", "c1")]));
        let tracker = ReadinessTracker::new(store.clone());

        tracker.set_container_readiness("u1", "c1", true).await;
        store.remove("u1");
        tracker.remove_orphaned_statuses(&HashSet::from(["u1".to_string()]));

        assert!(tracker
            .pod_containers_readiness("default", "web")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_pod_status_lookup() {
        let tracker = tracker_with(vec![pod("default", "web", "u1", &[("app", "c1")])]);
        assert_eq!(tracker.pod_status("u1").unwrap().phase, PodPhase::Running);
        assert!(tracker.pod_status("u2").is_none());
    }
}
