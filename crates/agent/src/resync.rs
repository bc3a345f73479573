//! Periodic reconciliation of the pod manifest with the running probers

use probe_lib::{Pod, PodLister, PodStore, ProberManager};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Re-read the manifest every `every` until shutdown
pub async fn run(
    path: PathBuf,
    store: Arc<PodStore>,
    manager: Arc<ProberManager>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The initial load already happened at startup
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Stopping manifest resync");
                break;
            }
            _ = ticker.tick() => match PodStore::load_manifest(&path) {
                Ok(fresh) => apply(&store, &manager, fresh.list_pods()),
                Err(e) => warn!(path = %path.display(), error = %format!("{e:#}"), "Failed to reload pod manifest"),
            }
        }
    }
}

/// Make `store` and the running workers match `pods`
pub fn apply(store: &PodStore, manager: &ProberManager, pods: Vec<Pod>) {
    let wanted: HashSet<&str> = pods.iter().map(|p| p.uid.as_str()).collect();

    let mut removed = 0;
    for known in store.list_pods() {
        if !wanted.contains(known.uid.as_str()) {
            manager.remove_pod(&known);
            store.remove(&known.uid);
            removed += 1;
        }
    }

    let mut added = 0;
    for pod in pods {
        if store.get(&pod.uid).is_none() {
            added += 1;
        }
        store.upsert(pod.clone());
        // Existing workers are kept; probes new to a known pod get one
        manager.add_pod(&pod);
    }

    if added > 0 || removed > 0 {
        info!(added, removed, pods = store.len(), "Pod manifest resynced");
    }
}
