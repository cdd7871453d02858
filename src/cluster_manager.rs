//! Top-level orchestrator: runs the pools in dependency order on
//! `checkpoint`, reverse order on `gc` (spec.md §4.8).

use std::sync::Arc;

use tracing::info;

use crate::cloud::types::{L7RuntimeInfo, NodeName, NodePort};
use crate::cloud::CloudCompute;
use crate::error::Result;
use crate::naming::Namer;
use crate::pools::{BackendPool, FirewallPool, HealthCheckPool, InstanceGroupPool, L7Pool};

pub struct ClusterManager {
    backends: Arc<BackendPool>,
    instance_groups: Arc<InstanceGroupPool>,
    l7s: L7Pool,
    firewall: FirewallPool,
    default_backend_port: u16,
}

impl ClusterManager {
    pub fn new(
        client: Arc<dyn CloudCompute>,
        namer: Namer,
        zone: impl Into<String>,
        default_backend_port: u16,
        default_health_check_path: impl Into<String>,
        firewall_source_range: impl Into<String>,
    ) -> Self {
        let health_checks = Arc::new(HealthCheckPool::new(
            client.clone(),
            namer.clone(),
            default_health_check_path,
        ));
        let instance_groups = Arc::new(InstanceGroupPool::new(client.clone(), namer.clone(), zone));
        let backends = Arc::new(BackendPool::new(
            client.clone(),
            namer.clone(),
            instance_groups.clone(),
            health_checks,
        ));
        let l7s = L7Pool::new(client.clone(), namer.clone(), default_backend_port);
        let firewall = FirewallPool::new(client, namer, firewall_source_range);

        Self {
            backends,
            instance_groups,
            l7s,
            firewall,
            default_backend_port,
        }
    }

    /// 1. dedup nodePorts; 2. BackendPool.sync; 3. InstanceGroupPool.sync;
    /// 4. L7Pool.sync; 5. FirewallPool.sync (only if nodePorts non-empty,
    /// removed otherwise).
    pub async fn checkpoint(
        &self,
        lb_infos: Vec<L7RuntimeInfo>,
        node_names: Vec<NodeName>,
        node_ports: Vec<NodePort>,
    ) -> Result<()> {
        let mut ports = node_ports;
        ports.sort_unstable();
        ports.dedup();

        info!(count = ports.len(), "checkpoint: syncing backends");
        self.backends.sync(&ports).await?;

        info!(count = node_names.len(), "checkpoint: syncing instance group");
        self.instance_groups.sync(&node_names).await?;

        info!(count = lb_infos.len(), "checkpoint: syncing l7s");
        self.l7s.sync(lb_infos).await?;

        if ports.is_empty() {
            self.firewall.shutdown().await?;
        } else {
            let mut firewall_ports = ports.clone();
            firewall_ports.push(self.default_backend_port);
            self.firewall.sync(&firewall_ports, &node_names).await?;
        }

        Ok(())
    }

    /// L7Pool first (it references backends), then BackendPool. Both errors
    /// are collected; the first is returned, but Backend GC still runs even
    /// if L7 GC failed.
    pub async fn gc(&self, live_lb_names: &[String], live_ports: &[NodePort]) -> Result<()> {
        let l7_result = self.l7s.gc(live_lb_names).await;
        let backend_result = self.backends.gc(live_ports).await;

        l7_result?;
        backend_result
    }

    /// Calls every pool's shutdown in reverse dependency order: Firewall,
    /// L7, Instance group membership is left to the cloud's own lifecycle
    /// (nodes aren't owned by this controller), Backend.
    pub async fn shutdown(&self) -> Result<()> {
        self.firewall.shutdown().await?;
        self.l7s.shutdown().await?;
        self.backends.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;

    fn manager() -> (ClusterManager, Arc<FakeCloud>) {
        let cloud = Arc::new(FakeCloud::new());
        let manager = ClusterManager::new(
            cloud.clone(),
            Namer::new("u"),
            "us-central1-a",
            30000,
            "/",
            "130.211.0.0/22",
        );
        (manager, cloud)
    }

    fn runtime_info(key: &str, port: &str) -> L7RuntimeInfo {
        L7RuntimeInfo {
            ingress_key: key.to_string(),
            allow_http: true,
            tls: None,
            static_ip_name: None,
            pre_shared_cert: None,
            default_backend: None,
            host_rules: vec![(
                "a.example.com".to_string(),
                vec![("/".to_string(), format!("k8s-be-{port}--u"))],
            )],
        }
    }

    #[tokio::test]
    async fn checkpoint_creates_full_resource_graph_for_one_ingress() {
        let (manager, cloud) = manager();
        manager
            .checkpoint(
                vec![runtime_info("foo-bar", "30001")],
                vec!["n1".to_string(), "n2".to_string()],
                vec![30001],
            )
            .await
            .unwrap();

        assert!(cloud
            .get_backend_service("k8s-be-30001--u")
            .await
            .unwrap()
            .is_some());
        let ig = cloud
            .get_instance_group("k8s-ig--u", "us-central1-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ig.instances.len(), 2);
        assert_eq!(ig.ports, vec![30001]);
        assert!(cloud.firewall_exists());
        let fw = cloud.get_firewall("k8s-fw-l7--u").await.unwrap().unwrap();
        assert!(fw.allowed_ports.contains(&30001));
        assert!(fw.allowed_ports.contains(&30000));
    }

    #[tokio::test]
    async fn checkpoint_with_no_ports_removes_firewall() {
        let (manager, cloud) = manager();
        manager
            .checkpoint(vec![runtime_info("foo-bar", "30001")], vec!["n1".to_string()], vec![30001])
            .await
            .unwrap();
        assert!(cloud.firewall_exists());

        manager.checkpoint(vec![], vec![], vec![]).await.unwrap();
        assert!(!cloud.firewall_exists());
    }

    #[tokio::test]
    async fn gc_runs_l7_then_backend_and_aggregates_first_error() {
        let (manager, cloud) = manager();
        manager
            .checkpoint(vec![runtime_info("foo-bar", "30001")], vec!["n1".to_string()], vec![30001])
            .await
            .unwrap();

        manager.gc(&[], &[]).await.unwrap();

        assert_eq!(cloud.backend_service_names().len(), 0);
        assert_eq!(cloud.url_map_names().len(), 0);
    }

    #[tokio::test]
    async fn second_ingress_sharing_node_port_creates_no_duplicate_backend() {
        let (manager, cloud) = manager();
        manager
            .checkpoint(vec![runtime_info("foo-bar", "30001")], vec!["n1".to_string()], vec![30001])
            .await
            .unwrap();
        manager
            .checkpoint(
                vec![runtime_info("foo-bar", "30001"), runtime_info("baz-qux", "30001")],
                vec!["n1".to_string()],
                vec![30001],
            )
            .await
            .unwrap();

        assert_eq!(cloud.calls("create_backend_service"), 2); // default backend + one nodePort backend
        assert_eq!(cloud.url_map_names().len(), 2);
    }

    /// spec.md §8 scenario 3: deleting one of two Ingresses sharing a
    /// NodePort tears down only that Ingress's L7, leaving the shared
    /// backend and firewall untouched.
    #[tokio::test]
    async fn deleting_one_of_two_sharing_ingresses_keeps_shared_backend_and_firewall() {
        let (manager, cloud) = manager();
        manager
            .checkpoint(
                vec![runtime_info("foo-bar", "30001"), runtime_info("baz-qux", "30001")],
                vec!["n1".to_string()],
                vec![30001],
            )
            .await
            .unwrap();
        assert_eq!(cloud.url_map_names().len(), 2);

        manager
            .checkpoint(vec![runtime_info("baz-qux", "30001")], vec!["n1".to_string()], vec![30001])
            .await
            .unwrap();
        manager.gc(&["baz-qux".to_string()], &[30001]).await.unwrap();

        assert_eq!(cloud.url_map_names().len(), 1);
        assert!(cloud
            .get_backend_service("k8s-be-30001--u")
            .await
            .unwrap()
            .is_some());
        assert!(cloud.firewall_exists());
    }

    /// spec.md §8 scenario 5 (foreign half): a BackendService named with a
    /// different cluster UID is never touched by this controller's GC even
    /// though it looks orphaned.
    #[tokio::test]
    async fn gc_never_touches_a_foreign_cluster_uids_resources() {
        use crate::cloud::types::{Backend, BackendService, BalancingMode};

        let (manager, cloud) = manager();
        cloud
            .create_backend_service(BackendService {
                name: "k8s-be-30003--otherUID".to_string(),
                self_link: "self/k8s-be-30003--otherUID".to_string(),
                port: 30003,
                health_checks: vec![],
                backends: vec![Backend {
                    group: "self/some-other-ig".to_string(),
                    balancing_mode: BalancingMode::Rate,
                }],
            })
            .await
            .unwrap();

        manager.gc(&[], &[]).await.unwrap();

        assert!(cloud
            .get_backend_service("k8s-be-30003--otherUID")
            .await
            .unwrap()
            .is_some());
    }

    /// spec.md §8 scenario 6: a quota failure partway through a checkpoint
    /// surfaces as a quota-classified error without rolling back the
    /// resources already materialized, and a retried checkpoint under
    /// sufficient quota completes the rest without duplicating work.
    #[tokio::test]
    async fn quota_failure_mid_checkpoint_preserves_prior_work_and_resumes_cleanly() {
        use crate::cloud::fake::InjectedFailure;
        use crate::error::CloudErrorKind;

        let (manager, cloud) = manager();
        cloud.inject_failure(InjectedFailure {
            operation_prefix: "create_backend_service".to_string(),
            kind: CloudErrorKind::Quota,
            on_call_number: 3,
        });

        let infos = vec![
            runtime_info("a", "30001"),
            runtime_info("b", "30002"),
            runtime_info("c", "30003"),
        ];
        let err = manager
            .checkpoint(infos.clone(), vec!["n1".to_string()], vec![30001, 30002, 30003])
            .await
            .unwrap_err();
        assert_eq!(err.cloud_kind(), Some(CloudErrorKind::Quota));

        assert!(cloud
            .get_backend_service("k8s-be-30001--u")
            .await
            .unwrap()
            .is_some());
        assert!(cloud
            .get_backend_service("k8s-be-30002--u")
            .await
            .unwrap()
            .is_some());

        manager
            .checkpoint(infos, vec!["n1".to_string()], vec![30001, 30002, 30003])
            .await
            .unwrap();

        assert!(cloud
            .get_backend_service("k8s-be-30003--u")
            .await
            .unwrap()
            .is_some());
        // 3 attempts in the failed batch (a, b, the failing c) + the retried
        // create for c + the shared default backend's one lazy create.
        assert_eq!(cloud.calls("create_backend_service"), 5);
    }
}
