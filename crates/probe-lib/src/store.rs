//! Workload lookup
//!
//! The prober never owns pods. It reads them through [`PodLister`], which
//! the workload store implements. [`PodStore`] is an in-memory store for
//! static manifests and tests.

use crate::models::Pod;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::path::Path;
use tracing::{debug, info};

/// Read access to the pods currently known on the node
pub trait PodLister: Send + Sync {
    /// Snapshot of all current pods
    fn list_pods(&self) -> Vec<Pod>;

    /// Find a pod by uid with a linear scan over [`list_pods`](Self::list_pods)
    fn find_by_uid(&self, uid: &str) -> Option<Pod> {
        self.list_pods().into_iter().find(|p| p.uid == uid)
    }
}

/// In-memory pod store keyed by pod uid
#[derive(Debug, Default)]
pub struct PodStore {
    pods: DashMap<String, Pod>,
}

impl PodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load pods from a JSON manifest holding an array of pods
    pub fn load_manifest(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pod manifest {}", path.display()))?;
        let pods: Vec<Pod> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse pod manifest {}", path.display()))?;

        let store = Self::new();
        for pod in pods {
            store.upsert(pod);
        }
        info!(path = %path.display(), pods = store.len(), "Loaded pod manifest");
        Ok(store)
    }

    /// Insert or replace a pod
    pub fn upsert(&self, pod: Pod) {
        debug!(pod = %pod, "Upserting pod");
        self.pods.insert(pod.uid.clone(), pod);
    }

    pub fn remove(&self, uid: &str) -> Option<Pod> {
        debug!(pod_uid = %uid, "Removing pod");
        self.pods.remove(uid).map(|(_, v)| v)
    }

    pub fn get(&self, uid: &str) -> Option<Pod> {
        self.pods.get(uid).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

impl PodLister for PodStore {
    fn list_pods(&self) -> Vec<Pod> {
        self.pods.iter().map(|r| r.value().clone()).collect()
    }
}
