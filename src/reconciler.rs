//! Level-driven single-worker reconciler loop (spec.md §4.9).
//!
//! The worker dequeues one Ingress key at a time, recomputes the *entire*
//! desired state from the cached Ingress/Service/Node lists via
//! [`translate`], and calls `ClusterManager::checkpoint` then `gc` with the
//! resulting live name sets. This mirrors the teacher's
//! `Controller::new(...).shutdown_on_signal().run(reconcile, error_policy,
//! context)` shape (`controllers/cloudflared.rs`), generalized away from
//! `kube::runtime`'s watch-stream machinery since the real Kubernetes API is
//! an out-of-scope collaborator here: in place of a `Controller` we drive a
//! hand-rolled FIFO work queue, and in place of `Action::requeue(duration)`
//! we re-enqueue with our own backoff bookkeeping.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::cluster_manager::ClusterManager;
use crate::error::{CloudErrorKind, ControllerError};
use crate::translate::{translate, Ingress, Node, Service, TranslateInput};
use crate::naming::Namer;
use crate::cloud::types::TlsCert;
use std::collections::HashMap;

/// External collaborator seam standing in for the Kubernetes API watch
/// machinery (spec.md §1 Out of scope): supplies the cached, level-driven
/// view of Ingresses/Services/Nodes/TLS secrets the translator needs. A
/// production implementation would back this with a `kube::runtime::reflector`
/// store; tests back it with a plain in-memory struct.
pub trait ClusterState: Send + Sync {
    fn ingresses(&self) -> Vec<Ingress>;
    fn services(&self) -> Vec<Service>;
    fn nodes(&self) -> Vec<Node>;
    fn tls_secrets(&self) -> HashMap<String, TlsCert>;
}

/// A client-go-`workqueue`-style FIFO-per-key queue: a key already `dirty`
/// is not re-enqueued while it is pending or in flight, and a key marked
/// dirty again while its current run is `processing` is re-queued exactly
/// once after that run finishes (spec.md §5, "work queue's FIFO per key
/// with deduplication of in-flight keys").
struct WorkQueueInner {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
}

pub struct WorkQueue {
    inner: Mutex<WorkQueueInner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(WorkQueueInner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues `key` unless it's already dirty (queued or in flight).
    pub fn enqueue(&self, key: impl Into<String>) {
        let key = key.into();
        let mut inner = self.inner.lock().expect("workqueue mutex poisoned");
        if inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            // Will be re-queued by `done` once the in-flight run completes.
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Blocks until a key is available, moving it from `queue` to
    /// `processing`. Returns `None` only when `shutdown` has drained the
    /// queue and no further work will arrive.
    async fn dequeue(&self, stop: &Notify) -> Option<String> {
        loop {
            {
                let mut inner = self.inner.lock().expect("workqueue mutex poisoned");
                if let Some(key) = inner.queue.pop_front() {
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = stop.notified() => return None,
            }
        }
    }

    /// Marks `key`'s current run finished; if it was marked dirty again
    /// mid-run, re-queues it for another pass.
    fn done(&self, key: &str) {
        let mut inner = self.inner.lock().expect("workqueue mutex poisoned");
        inner.processing.remove(key);
        if inner.dirty.remove(key) {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-key retry bookkeeping for the bounded-transient-retry and
/// exponential-quota-backoff rules in spec.md §4.9.
#[derive(Default)]
struct KeyBackoff {
    transient_attempts: u32,
    quota_attempts: u32,
}

/// Drives the work queue against a `ClusterManager`, translating the
/// current `ClusterState` snapshot into desired state on every dequeue.
pub struct Reconciler {
    state: Arc<dyn ClusterState>,
    manager: Arc<ClusterManager>,
    namer: Namer,
    accepted_ingress_class: String,
    queue: Arc<WorkQueue>,
    stop: Arc<Notify>,
    transient_retry_budget: u32,
    quota_backoff_base: Duration,
    transient_requeue_delay: Duration,
    healthy: Arc<std::sync::atomic::AtomicBool>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<dyn ClusterState>,
        manager: Arc<ClusterManager>,
        namer: Namer,
        accepted_ingress_class: impl Into<String>,
        transient_retry_budget: u32,
        quota_backoff_base: Duration,
        transient_requeue_delay: Duration,
    ) -> Self {
        Self {
            state,
            manager,
            namer,
            accepted_ingress_class: accepted_ingress_class.into(),
            queue: Arc::new(WorkQueue::new()),
            stop: Arc::new(Notify::new()),
            transient_retry_budget,
            quota_backoff_base,
            transient_requeue_delay,
            healthy: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// `true` unless a permission-class (non-retryable) error was the most
    /// recent outcome of a reconcile; surfaced by the `/health` endpoint.
    pub fn healthy(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.healthy.clone()
    }

    /// Runs the single worker until `shutdown` is called. Mirrors the
    /// teacher's `shutdown_on_signal().run(reconcile, error_policy,
    /// context)` loop shape: dequeue, run, classify-and-requeue on error.
    pub async fn run(&self) {
        info!("reconciler worker starting");
        let mut backoffs: HashMap<String, KeyBackoff> = HashMap::new();

        while let Some(key) = self.queue.dequeue(&self.stop).await {
            match self.reconcile_once().await {
                Ok(()) => {
                    backoffs.remove(&key);
                    self.healthy.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                Err(err) => self.error_policy(&key, err, &mut backoffs),
            }
            self.queue.done(&key);
        }
        info!("reconciler worker stopped");
    }

    /// Classifies `err` per spec.md §4.9/§7 and either requeues the key
    /// with the appropriate delay or gives up on it.
    fn error_policy(&self, key: &str, err: ControllerError, backoffs: &mut HashMap<String, KeyBackoff>) {
        if let ControllerError::Validation { reason, .. } = &err {
            warn!(%key, %reason, "malformed ingress, not requeuing");
            backoffs.remove(key);
            return;
        }

        match err.cloud_kind() {
            Some(CloudErrorKind::NotFound) => {
                // Benign on delete/get-before-create paths; treated as success.
            }
            Some(CloudErrorKind::Quota) => {
                let entry = backoffs.entry(key.to_string()).or_default();
                entry.quota_attempts += 1;
                let delay = self.quota_backoff_base * 2u32.saturating_pow(entry.quota_attempts - 1);
                warn!(%key, attempt = entry.quota_attempts, ?delay, "quota error, requeuing with backoff");
                self.requeue_after(key, delay);
            }
            Some(CloudErrorKind::Permission) => {
                warn!(%key, error = %err, "permission error, reconcile will not be retried");
                self.healthy.store(false, std::sync::atomic::Ordering::SeqCst);
            }
            Some(CloudErrorKind::Conflict) => {
                // L7Pool already retries a Conflict once internally; seeing
                // one here means that retry also lost the race. Requeue
                // immediately rather than burning the transient budget.
                warn!(%key, "conflict survived internal retry, requeuing");
                self.requeue_after(key, Duration::from_secs(1));
            }
            Some(CloudErrorKind::Transient) | None => {
                let entry = backoffs.entry(key.to_string()).or_default();
                entry.transient_attempts += 1;
                if entry.transient_attempts > self.transient_retry_budget {
                    warn!(%key, "transient retry budget exhausted, requeuing at standard delay");
                    self.requeue_after(key, self.transient_requeue_delay);
                    backoffs.remove(key);
                } else {
                    warn!(%key, attempt = entry.transient_attempts, error = %err, "transient error, retrying");
                    self.requeue_after(key, Duration::from_millis(100));
                }
            }
        }
    }

    fn requeue_after(&self, key: &str, delay: Duration) {
        let queue = self.queue.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Rebuilds desired state from the full cached `ClusterState` and
    /// checkpoints it, then garbage-collects anything no longer live. Level-
    /// driven: every dequeue recomputes from scratch rather than diffing
    /// against the specific key that triggered it.
    async fn reconcile_once(&self) -> Result<(), ControllerError> {
        let ingresses = self.state.ingresses();
        let services = self.state.services();
        let nodes = self.state.nodes();
        let tls_secrets = self.state.tls_secrets();

        let (lb_infos, node_ports, node_names) = translate(
            TranslateInput {
                ingresses: &ingresses,
                services: &services,
                nodes: &nodes,
                tls_secrets: &tls_secrets,
                accepted_ingress_class: &self.accepted_ingress_class,
            },
            &self.namer,
        )?;

        let live_lb_names: Vec<String> = lb_infos.iter().map(|l| l.ingress_key.clone()).collect();

        self.manager
            .checkpoint(lb_infos, node_names, node_ports.clone())
            .await?;
        self.manager.gc(&live_lb_names, &node_ports).await
    }

    /// Wakes the worker loop with no further work; it exits `run` once the
    /// queue drains and `dequeue` observes the stop signal.
    pub fn shutdown(&self) {
        self.stop.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;
    use crate::translate::{BackendRef, IngressPath, IngressRule};
    use std::sync::Mutex as StdMutex;

    struct FakeState {
        ingresses: StdMutex<Vec<Ingress>>,
        services: Vec<Service>,
        nodes: Vec<Node>,
    }

    impl ClusterState for FakeState {
        fn ingresses(&self) -> Vec<Ingress> {
            self.ingresses.lock().unwrap().clone()
        }
        fn services(&self) -> Vec<Service> {
            self.services.clone()
        }
        fn nodes(&self) -> Vec<Node> {
            self.nodes.clone()
        }
        fn tls_secrets(&self) -> HashMap<String, TlsCert> {
            HashMap::new()
        }
    }

    fn ingress(name: &str) -> Ingress {
        Ingress {
            namespace: "default".to_string(),
            name: name.to_string(),
            annotations: HashMap::new(),
            default_backend: None,
            tls: Vec::new(),
            rules: vec![IngressRule {
                host: "a.example.com".to_string(),
                paths: vec![IngressPath {
                    path: "/".to_string(),
                    backend: BackendRef {
                        service_name: "svc1".to_string(),
                        service_port: 80,
                    },
                }],
            }],
        }
    }

    fn reconciler(state: Arc<FakeState>) -> (Reconciler, Arc<FakeCloud>) {
        let cloud = Arc::new(FakeCloud::new());
        let manager = Arc::new(ClusterManager::new(
            cloud.clone(),
            Namer::new("u"),
            "us-central1-a",
            30000,
            "/",
            "130.211.0.0/22",
        ));
        let reconciler = Reconciler::new(
            state,
            manager,
            Namer::new("u"),
            "gce",
            3,
            Duration::from_secs(30),
            Duration::from_secs(15),
        );
        (reconciler, cloud)
    }

    #[tokio::test]
    async fn worker_checkpoints_on_enqueue_then_drains_on_shutdown() {
        let state = Arc::new(FakeState {
            ingresses: StdMutex::new(vec![ingress("foo")]),
            services: vec![Service {
                namespace: "default".to_string(),
                name: "svc1".to_string(),
                node_ports: HashMap::from([(80, 30001)]),
            }],
            nodes: vec![Node {
                name: "n1".to_string(),
                zone: "us-central1-a".to_string(),
                ready: true,
            }],
        });
        let (reconciler, cloud) = reconciler(state);
        let queue = reconciler.queue();
        queue.enqueue("default/foo");

        let handle = tokio::spawn(async move { reconciler.run().await });
        // Give the single worker a chance to drain the one enqueued key.
        for _ in 0..50 {
            if cloud
                .get_backend_service("k8s-be-30001--u")
                .await
                .unwrap()
                .is_some()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(cloud
            .get_backend_service("k8s-be-30001--u")
            .await
            .unwrap()
            .is_some());

        queue.enqueue("__noop__"); // dummy key so dequeue loop wakes once more
        handle.abort();
    }

    #[test]
    fn work_queue_dedupes_key_already_dirty() {
        let queue = WorkQueue::new();
        queue.enqueue("default/foo");
        queue.enqueue("default/foo");
        let inner = queue.inner.lock().unwrap();
        assert_eq!(inner.queue.len(), 1);
    }

    #[test]
    fn work_queue_requeues_key_marked_dirty_while_processing() {
        let queue = WorkQueue::new();
        queue.enqueue("default/foo");
        {
            let mut inner = queue.inner.lock().unwrap();
            let key = inner.queue.pop_front().unwrap();
            inner.processing.insert(key);
        }
        queue.enqueue("default/foo");
        {
            let inner = queue.inner.lock().unwrap();
            assert!(inner.queue.is_empty());
            assert!(inner.dirty.contains("default/foo"));
        }
        queue.done("default/foo");
        let inner = queue.inner.lock().unwrap();
        assert_eq!(inner.queue.len(), 1);
    }
}
